use anyhow::Context;
use futures::future::join_all;
use markdown::mdast::{Node, Yaml};
use regex::Regex;
use serde_yaml::Mapping;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::content::{check_mdx, ContentTree, Walk};
use crate::frontmatter::{parse_frontmatter, rewrite_author, rewrite_post, serialize_frontmatter};
use crate::inline::rewrite_inline;
use crate::media::{AssetOutcome, AssetReference, MediaStore, Migrator};
use crate::normalize::canonical_author_slug;
use crate::tags::{TagRule, TAG_RULES};

lazy_static! {
    // Leading year of a dated post file name
    static ref RE_POST_YEAR: Regex = Regex::new(r"^(?<year>\d{4})-").unwrap();
}

// =============

const LEGACY_EXTENSIONS: &[&str] = &["md", "markdown"];
const MDX_EXT: &str = "mdx";
const MD_EXT: &str = "md";
const BLOGS_DIR: &str = "blogs";
const AUTHORS_DIR: &str = "authors";
const TAGS_DIR: &str = "tags";
/// Post file names start with `yyyy-mm-dd-`
const DATE_PREFIX_SEGMENTS: usize = 3;

// =============

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub blogs_dir: PathBuf,
    pub authors_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Posts from this many of the most recent years in the corpus already exist on the new site
    pub recent_years: usize,
}

/// Totals for one run, logged at the end
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub blogs_written: usize,
    pub authors_written: usize,
    pub tags_written: usize,
    pub documents_failed: usize,
    pub documents_excluded: usize,
    pub assets_uploaded: usize,
    pub assets_existing: usize,
    pub assets_failed: usize,
    pub mdx_warnings: usize,
}

#[derive(Debug, Default)]
struct Tally {
    blogs_written: AtomicUsize,
    authors_written: AtomicUsize,
    tags_written: AtomicUsize,
    documents_failed: AtomicUsize,
    documents_excluded: AtomicUsize,
    assets_uploaded: AtomicUsize,
    assets_existing: AtomicUsize,
    assets_failed: AtomicUsize,
    mdx_warnings: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Tally {
    fn snapshot(&self) -> RunReport {
        let get = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        RunReport {
            blogs_written: get(&self.blogs_written),
            authors_written: get(&self.authors_written),
            tags_written: get(&self.tags_written),
            documents_failed: get(&self.documents_failed),
            documents_excluded: get(&self.documents_excluded),
            assets_uploaded: get(&self.assets_uploaded),
            assets_existing: get(&self.assets_existing),
            assets_failed: get(&self.assets_failed),
            mdx_warnings: get(&self.mdx_warnings),
        }
    }
}

/// A migrated document and the assets that must land on the media host before it is written
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub text: String,
    pub assets: Vec<AssetReference>,
}

// =============

/// convert_blog migrates a whole blog post: frontmatter first, then the body rules
pub fn convert_blog(source: String) -> anyhow::Result<Converted> {
    let mut tree = ContentTree::parse(source)?;
    let data = read_frontmatter(&tree)?;
    let rewritten = rewrite_post(data).context("Failed to migrate frontmatter")?;
    replace_frontmatter(&mut tree, &rewritten.frontmatter)?;

    let mut assets = rewritten.assets;
    assets.extend(rewrite_inline(&mut tree)?);
    Ok(Converted {
        text: tree.serialize(),
        assets,
    })
}

/// convert_author migrates an author record. Author bodies are carried over as they are.
pub fn convert_author(source: String) -> anyhow::Result<Converted> {
    let mut tree = ContentTree::parse(source)?;
    let data = read_frontmatter(&tree)?;
    let rewritten = rewrite_author(data);
    replace_frontmatter(&mut tree, &rewritten.frontmatter)?;
    Ok(Converted {
        text: tree.serialize(),
        assets: rewritten.assets,
    })
}

/// tag_document is the content entry for one canonical tag, it only carries the display name
pub fn tag_document(rule: &TagRule) -> anyhow::Result<String> {
    let mut data = Mapping::new();
    data.insert("name".into(), rule.display_name.into());
    Ok(format!("{}\n", serialize_frontmatter(&data)?))
}

fn read_frontmatter(tree: &ContentTree) -> anyhow::Result<Mapping> {
    let raw = tree
        .frontmatter()
        .context("Document has no frontmatter block")?;
    parse_frontmatter(raw).context("Failed to parse frontmatter")
}

/// Only the first frontmatter block is replaced
fn replace_frontmatter(tree: &mut ContentTree, frontmatter: &Mapping) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(frontmatter).context("Failed to serialize frontmatter")?;
    tree.replace_where(
        Walk::First,
        |node| matches!(node, Node::Yaml(_)),
        |node, _| {
            Ok(Some(Node::Yaml(Yaml {
                value: yaml.clone(),
                position: node.position().cloned(),
            })))
        },
    )?;
    Ok(())
}

// =============

/// blog_output_name drops the date prefix and switches to the MDX extension
///
/// Example:
///     "2019-05-14-hello-world.md"
///     "hello-world.mdx"
pub fn blog_output_name(file_name: &str) -> Option<String> {
    let segments: Vec<&str> = file_name.splitn(DATE_PREFIX_SEGMENTS + 1, '-').collect();
    let name = segments.get(DATE_PREFIX_SEGMENTS).filter(|name| !name.is_empty())?;
    let stem = Path::new(name).file_stem()?.to_str()?;
    Some(format!("{stem}.{MDX_EXT}"))
}

/// author_output_name keys author records by their canonical slug
///
/// Example:
///     "Jane.Doe.md"
///     "jane-doe.md"
pub fn author_output_name(file_name: &str) -> Option<String> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    Some(format!("{}.{MD_EXT}", canonical_author_slug(stem)))
}

/// recent_years finds the `count` most recent years among dated post file names
pub fn recent_years<'a, I>(file_names: I, count: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let years: BTreeSet<&str> = file_names
        .into_iter()
        .filter_map(|name| RE_POST_YEAR.captures(name))
        .filter_map(|caps| caps.name("year"))
        .map(|year| year.as_str())
        .collect();
    years.into_iter().rev().take(count).map(String::from).collect()
}

fn file_name(path: &Path) -> anyhow::Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("File name is not valid UTF-8: {}", path.display()))
}

/// list_documents returns the legacy documents directly inside `dir`, sorted by name
///
/// A missing directory is an error, stray non-markdown files are skipped.
pub fn list_documents(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to read directory {}", dir.display()))?;
        let path = entry.into_path();
        if !path.is_file() {
            continue;
        }
        let is_markdown = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| LEGACY_EXTENSIONS.contains(&ext));
        if !is_markdown {
            debug!("Skipping non-markdown file {}", path.display());
            continue;
        }
        documents.push(path);
    }
    Ok(documents)
}

// =============

/// Pipeline runs the three migration passes: blog posts, author records and tag entries
pub struct Pipeline {
    config: PipelineConfig,
    migrator: Migrator<dyn MediaStore>,
    tally: Tally,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, migrator: Migrator<dyn MediaStore>) -> Self {
        Self {
            config,
            migrator,
            tally: Tally::default(),
        }
    }

    /// run migrates everything and returns once every document and upload has settled
    ///
    /// Individual documents and uploads may fail without stopping the run, their failures are
    /// logged and counted in the report.
    pub async fn run(&self) -> anyhow::Result<RunReport> {
        for dir in [BLOGS_DIR, AUTHORS_DIR, TAGS_DIR] {
            let out = self.config.output_dir.join(dir);
            fs::create_dir_all(&out)
                .await
                .with_context(|| format!("Failed to create output directory {}", out.display()))?;
        }

        let blogs = self.select_blogs(list_documents(&self.config.blogs_dir)?)?;
        let authors = list_documents(&self.config.authors_dir)?;
        info!(
            "Migrating {} blog posts and {} authors",
            blogs.len(),
            authors.len()
        );

        tokio::join!(
            self.migrate_all(&blogs, |path| self.migrate_blog(path)),
            self.migrate_all(&authors, |path| self.migrate_author(path)),
            self.write_tags(),
        );
        Ok(self.tally.snapshot())
    }

    /// Posts from the most recent years were written for the new site and are left out
    fn select_blogs(&self, blogs: Vec<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
        let names = blogs
            .iter()
            .map(|path| file_name(path))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let cutover = recent_years(names.iter().copied(), self.config.recent_years);
        if !cutover.is_empty() {
            info!("Leaving out posts from {}", cutover.join(", "));
        }

        let mut selected = Vec::with_capacity(blogs.len());
        for path in blogs {
            let name = file_name(&path)?;
            if cutover.iter().any(|year| name.starts_with(year.as_str())) {
                debug!("Excluding {name}");
                bump(&self.tally.documents_excluded);
                continue;
            }
            selected.push(path);
        }
        Ok(selected)
    }

    async fn migrate_all<'a, F, Fut>(&self, paths: &'a [PathBuf], migrate: F)
    where
        F: Fn(&'a Path) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let results = join_all(paths.iter().map(|path| {
            let fut = migrate(path.as_path());
            async move { (path, fut.await) }
        }))
        .await;
        for (path, result) in results {
            if let Err(err) = result {
                bump(&self.tally.documents_failed);
                error!("Failed to migrate {}: {:#}", path.display(), err);
            }
        }
    }

    async fn migrate_blog(&self, path: &Path) -> anyhow::Result<()> {
        let name = file_name(path)?;
        let out_name = blog_output_name(name)
            .with_context(|| format!("{name} does not start with a yyyy-mm-dd- date"))?;
        let source = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let converted = convert_blog(source)?;

        self.migrate_assets(&converted.assets).await;
        let out = self.config.output_dir.join(BLOGS_DIR).join(&out_name);
        fs::write(&out, &converted.text)
            .await
            .with_context(|| format!("Failed to write {}", out.display()))?;
        bump(&self.tally.blogs_written);
        info!("Migrated {name} to {}", out.display());

        if let Err(message) = check_mdx(&converted.text) {
            bump(&self.tally.mdx_warnings);
            warn!("{} will not compile as MDX: {message}", out.display());
        }
        Ok(())
    }

    async fn migrate_author(&self, path: &Path) -> anyhow::Result<()> {
        let name = file_name(path)?;
        let out_name = author_output_name(name)
            .with_context(|| format!("{name} has no usable author name"))?;
        let source = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let converted = convert_author(source)?;

        self.migrate_assets(&converted.assets).await;
        let out = self.config.output_dir.join(AUTHORS_DIR).join(&out_name);
        fs::write(&out, &converted.text)
            .await
            .with_context(|| format!("Failed to write {}", out.display()))?;
        bump(&self.tally.authors_written);
        info!("Migrated {name} to {}", out.display());
        Ok(())
    }

    async fn migrate_assets(&self, assets: &[AssetReference]) {
        let outcomes = join_all(
            assets
                .iter()
                .map(|asset| self.migrator.ensure_migrated(asset)),
        )
        .await;
        for outcome in outcomes {
            let counter = match outcome {
                AssetOutcome::Uploaded => &self.tally.assets_uploaded,
                AssetOutcome::AlreadyPresent => &self.tally.assets_existing,
                AssetOutcome::Failed => &self.tally.assets_failed,
            };
            bump(counter);
        }
    }

    async fn write_tags(&self) {
        let writes = TAG_RULES.iter().map(|rule| async move {
            let out = self
                .config
                .output_dir
                .join(TAGS_DIR)
                .join(format!("{}.{MD_EXT}", rule.key));
            let result = match tag_document(rule) {
                Ok(document) => fs::write(&out, document)
                    .await
                    .with_context(|| format!("Failed to write {}", out.display())),
                Err(err) => Err(err),
            };
            (rule, result)
        });
        for (rule, result) in join_all(writes).await {
            match result {
                Ok(()) => bump(&self.tally.tags_written),
                Err(err) => {
                    bump(&self.tally.documents_failed);
                    error!("Failed to write tag {}: {:#}", rule.key, err);
                }
            }
        }
    }
}
