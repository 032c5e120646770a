use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::fs;
use url::Url;

use crate::media::{MediaStore, UploadError, UploadOutcome};

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Credentials for the Cloudinary upload API
#[derive(Clone, PartialEq, Eq)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

// Keep the secret out of logs
impl std::fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl CloudinaryConfig {
    /// from_url parses the `cloudinary://<api_key>:<api_secret>@<cloud_name>` form the Cloudinary
    /// SDKs read from `CLOUDINARY_URL`
    pub fn from_url(raw: &str) -> anyhow::Result<Self> {
        let url = Url::parse(raw).context("CLOUDINARY_URL is not a valid URL")?;
        if url.scheme() != "cloudinary" {
            bail!(
                "CLOUDINARY_URL must use the cloudinary:// scheme, got {}://",
                url.scheme()
            );
        }
        let cloud_name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .context("CLOUDINARY_URL has no cloud name")?;
        let api_secret = url.password().context("CLOUDINARY_URL has no API secret")?;
        if url.username().is_empty() {
            bail!("CLOUDINARY_URL has no API key");
        }
        Ok(Self {
            cloud_name: cloud_name.to_string(),
            api_key: url.username().to_string(),
            api_secret: urlencoding::decode(api_secret)?.into_owned(),
        })
    }
}

/// sign computes the request signature over the sorted, `&` joined parameters
///
/// SHA-1 is the algorithm Cloudinary verifies unless an account opts into SHA-256.
pub fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let payload = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha1::digest(format!("{payload}{api_secret}").as_bytes()))
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    existing: Option<bool>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct CloudinaryStore {
    config: CloudinaryConfig,
    client: Client,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn upload_url(&self) -> String {
        format!("{API_BASE}/{}/image/upload", self.config.cloud_name)
    }

    /// The text fields of an upload request: the signed parameters, then `api_key` and
    /// `signature`, which are not part of the signature
    fn upload_fields(
        &self,
        canonical_id: &str,
        overwrite: bool,
        timestamp: i64,
    ) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("overwrite", overwrite.to_string()),
            ("public_id", canonical_id.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        let signature = sign(&fields, &self.config.api_secret);
        fields.push(("api_key", self.config.api_key.clone()));
        fields.push(("signature", signature));
        fields
    }
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(
        &self,
        local_path: &Path,
        canonical_id: &str,
        overwrite: bool,
        timeout: Duration,
    ) -> Result<UploadOutcome, UploadError> {
        let bytes = fs::read(local_path)
            .await
            .map_err(|source| UploadError::Source {
                path: local_path.to_path_buf(),
                source,
            })?;
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| canonical_id.to_string());

        let fields = self.upload_fields(
            canonical_id,
            overwrite,
            OffsetDateTime::now_utc().unix_timestamp(),
        );
        let mut form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        for (key, value) in fields {
            form = form.text(key, value);
        }

        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();
        let body: UploadResponse = response.json().await?;

        if let Some(err) = body.error {
            return Err(UploadError::Rejected {
                public_id: canonical_id.to_string(),
                message: err.message,
            });
        }
        if !status.is_success() {
            return Err(UploadError::Rejected {
                public_id: canonical_id.to_string(),
                message: format!("HTTP {status}"),
            });
        }
        Ok(UploadOutcome {
            existing: body.existing.unwrap_or(false),
        })
    }
}
