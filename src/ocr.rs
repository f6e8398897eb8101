use crate::error::{PipelineError, Result};
use crate::types::TextDetection;
use async_trait::async_trait;
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Text detection over a stored image.
#[async_trait]
pub trait TextDetector: Send + Sync {
    /// Any failure surfaces as an empty list.
    async fn detect_text(&self, image_ref: &str) -> Vec<TextDetection>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectTextResponse {
    #[serde(default)]
    text_detections: Vec<TextDetection>,
}

/// Calls a remote text-detection endpoint with `{"image": <ref>}`.
pub struct HttpTextDetector {
    client: reqwest::Client,
    url: Url,
    access_token: Option<String>,
}

impl HttpTextDetector {
    pub fn new(client: reqwest::Client, url: Url, access_token: Option<String>) -> Self {
        HttpTextDetector {
            client,
            url,
            access_token,
        }
    }

    async fn request(&self, image_ref: &str) -> Result<Vec<TextDetection>> {
        let mut request = self
            .client
            .post(self.url.clone())
            .json(&json!({ "image": image_ref }));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::Status {
                endpoint: self.url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }
        let body: DetectTextResponse = response.json().await?;
        Ok(body.text_detections)
    }
}

#[async_trait]
impl TextDetector for HttpTextDetector {
    async fn detect_text(&self, image_ref: &str) -> Vec<TextDetection> {
        match self.request(image_ref).await {
            Ok(detections) => {
                info!("Detected {} text regions in {}", detections.len(), image_ref);
                detections
            }
            Err(e) => {
                error!("Text detection failed for {}: {}", image_ref, e);
                vec![]
            }
        }
    }
}
