#[macro_use]
extern crate lazy_static;

use anyhow::bail;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cloudinary::{CloudinaryConfig, CloudinaryStore};
use crate::media::{DirectoryStore, MediaStore, Migrator};
use crate::pipeline::{Pipeline, PipelineConfig};

mod cloudinary;
mod content;
mod frontmatter;
mod inline;
mod media;
mod normalize;
mod pipeline;
mod tags;
mod template;

/// linaro-mdx migrates the legacy Jekyll blog posts and author records of the Linaro website into
/// the MDX content collections of the new site, moving every referenced image onto the media host
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Directory of legacy blog posts, named `yyyy-mm-dd-<slug>.md`
    #[arg(long, default_value = "./old_content/blogs")]
    blogs: PathBuf,

    /// Directory of legacy author records
    #[arg(long, default_value = "./old_content/authors")]
    authors: PathBuf,

    /// Checkout of the legacy website, image paths in documents resolve against it
    #[arg(long, default_value = "./website")]
    website_root: PathBuf,

    /// Output root, `blogs/`, `authors/` and `tags/` are created beneath it
    #[arg(short, long, default_value = "./new_content")]
    output: PathBuf,

    /// Posts from this many of the most recent years are already on the new site and are skipped
    #[arg(long, default_value_t = 2)]
    recent_years: usize,

    /// Copy media into this directory instead of uploading to Cloudinary
    #[arg(long)]
    media_dir: Option<PathBuf>,

    /// Cloudinary credentials as `cloudinary://<api_key>:<api_secret>@<cloud_name>`
    #[arg(long, env = "CLOUDINARY_URL", hide_env_values = true)]
    cloudinary_url: Option<String>,

    /// Per upload timeout in milliseconds
    #[arg(long, default_value_t = 60_000_000)]
    upload_timeout_ms: u64,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("linaro_mdx={level}")));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn media_store(cli: &Cli) -> anyhow::Result<Arc<dyn MediaStore>> {
    if let Some(dir) = &cli.media_dir {
        info!("Storing media under {}", dir.display());
        return Ok(Arc::new(DirectoryStore::new(dir.clone())));
    }
    let Some(url) = &cli.cloudinary_url else {
        bail!("Either --media-dir or CLOUDINARY_URL must be set");
    };
    let config = CloudinaryConfig::from_url(url)?;
    info!("Uploading media to Cloudinary cloud {}", config.cloud_name);
    Ok(Arc::new(CloudinaryStore::new(config)))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine, credentials may come from the environment
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let migrator = Migrator::new(
        media_store(&cli)?,
        cli.website_root.clone(),
        Duration::from_millis(cli.upload_timeout_ms),
    );
    let config = PipelineConfig {
        blogs_dir: cli.blogs,
        authors_dir: cli.authors,
        output_dir: cli.output,
        recent_years: cli.recent_years,
    };
    let report = Pipeline::new(config, migrator).run().await?;

    info!(
        "Wrote {} posts, {} authors and {} tags ({} posts left out as already migrated)",
        report.blogs_written, report.authors_written, report.tags_written, report.documents_excluded
    );
    info!(
        "Media: {} uploaded, {} already present, {} failed",
        report.assets_uploaded, report.assets_existing, report.assets_failed
    );
    if report.mdx_warnings > 0 {
        info!("{} posts need manual MDX fixes", report.mdx_warnings);
    }
    if report.documents_failed > 0 {
        bail!("{} documents failed to migrate", report.documents_failed);
    }
    Ok(())
}
