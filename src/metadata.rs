use crate::error::{PipelineError, Result};
use crate::types::ImageMetadata;
use async_trait::async_trait;
use log::{error, info};
use reqwest::header::HeaderMap;
use url::Url;

const META_PREFIX: &str = "x-amz-meta-";

/// Capture metadata stored with each uploaded image.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Never fails; missing values are "Unknown".
    async fn lookup(&self, image_ref: &str) -> ImageMetadata;
}

/// Reads user metadata headers from an S3-compatible object store with `HEAD`.
pub struct HttpMetadataStore {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpMetadataStore {
    pub fn new(client: reqwest::Client, base_url: Url, access_token: Option<String>) -> Self {
        HttpMetadataStore {
            client,
            base_url,
            access_token,
        }
    }

    fn object_url(&self, image_ref: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(image_ref.trim_start_matches('/'))?)
    }

    async fn request(&self, image_ref: &str) -> Result<ImageMetadata> {
        let url = self.object_url(image_ref)?;
        let mut request = self.client.head(url.clone());
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::Status {
                endpoint: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }
        Ok(metadata_from_headers(response.headers()))
    }
}

fn metadata_from_headers(headers: &HeaderMap) -> ImageMetadata {
    let defaults = ImageMetadata::default();
    let value = |key: &str, default: String| {
        headers
            .get(format!("{}{}", META_PREFIX, key).as_str())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    };
    ImageMetadata {
        captured_at: value("datetime", defaults.captured_at),
        location: value("location", defaults.location),
        violation_type: value("type", defaults.violation_type),
        fine_amount: value("fineamount", defaults.fine_amount),
    }
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn lookup(&self, image_ref: &str) -> ImageMetadata {
        match self.request(image_ref).await {
            Ok(metadata) => {
                info!("Metadata for {}: {:?}", image_ref, metadata);
                metadata
            }
            Err(e) => {
                error!("Error retrieving metadata for {}: {}", image_ref, e);
                ImageMetadata::default()
            }
        }
    }
}
