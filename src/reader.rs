use crate::detector::Detector;
use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::ocr::TextDetector;
use crate::router::{Route, Router};
use crate::types::{PlateCandidate, TextDetection, TextFragment};
use log::info;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub candidate: PlateCandidate,
    pub route: Route,
}

/// Handles one arriving image: text detection, plate extraction, metadata
/// lookup and routing.
pub struct PlateReader {
    detector: Detector,
    text_detector: Arc<dyn TextDetector>,
    metadata: Arc<dyn MetadataStore>,
    router: Router,
}

impl PlateReader {
    pub fn new(
        detector: Detector,
        text_detector: Arc<dyn TextDetector>,
        metadata: Arc<dyn MetadataStore>,
        router: Router,
    ) -> Self {
        PlateReader {
            detector,
            text_detector,
            metadata,
            router,
        }
    }

    /// `detections` skips the OCR call when the caller already has the text.
    pub async fn process_image(
        &self,
        image_ref: &str,
        detections: Option<Vec<TextDetection>>,
    ) -> Result<ReadOutcome> {
        info!("Processing image {}", image_ref);
        let detections = match detections {
            Some(d) => d,
            None => self.text_detector.detect_text(image_ref).await,
        };
        let detected_text = detections
            .iter()
            .map(|d| d.detected_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        info!("Detected text: {}", detected_text);

        let fragments: Vec<TextFragment> = detections.iter().map(TextFragment::from).collect();
        let candidate = self.detector.detect(&fragments);
        info!(
            "Final plate {} | jurisdiction {}",
            candidate.text,
            candidate.jurisdiction()
        );

        let metadata = self.metadata.lookup(image_ref).await;
        let route = self
            .router
            .route(&candidate, &metadata, image_ref, &detected_text)
            .await?;
        Ok(ReadOutcome { candidate, route })
    }
}
