use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Placeholder for any field that could not be resolved.
pub const UNKNOWN: &str = "Unknown";
/// Jurisdiction reported when no jurisdiction name was detected.
pub const UNKNOWN_JURISDICTION: &str = "unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn unknown_jurisdiction() -> String {
    UNKNOWN_JURISDICTION.to_string()
}

fn or_unknown(value: &str) -> String {
    if value.trim().is_empty() {
        unknown()
    } else {
        value.to_string()
    }
}

/// One OCR observation, reduced to what plate extraction needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub confidence: f64,
    pub bounding_box_area: f64,
}

impl TextFragment {
    pub fn new(text: &str, confidence: f64, bounding_box_area: f64) -> Self {
        TextFragment {
            text: text.to_string(),
            confidence,
            bounding_box_area,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoundingBox {
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Geometry {
    pub bounding_box: Option<BoundingBox>,
}

/// Text detection as reported by the OCR service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextDetection {
    pub detected_text: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

impl From<&TextDetection> for TextFragment {
    fn from(detection: &TextDetection) -> Self {
        let area = detection
            .geometry
            .as_ref()
            .and_then(|g| g.bounding_box)
            .map(|b| b.width * b.height)
            .filter(|a| a.is_finite())
            .unwrap_or(0.0);
        TextFragment::new(&detection.detected_text, detection.confidence, area)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlateCandidate {
    pub text: String,
    pub jurisdiction_guess: Option<String>,
}

impl PlateCandidate {
    pub fn jurisdiction(&self) -> &str {
        self.jurisdiction_guess
            .as_deref()
            .unwrap_or(UNKNOWN_JURISDICTION)
    }
}

/// Capture metadata stored alongside an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub captured_at: String,
    pub location: String,
    pub violation_type: String,
    pub fine_amount: String,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        ImageMetadata {
            captured_at: unknown(),
            location: unknown(),
            violation_type: unknown(),
            fine_amount: unknown(),
        }
    }
}

/// Unit of work placed on the fast-lane queue.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub plate: String,
    #[serde(default = "unknown_jurisdiction")]
    pub jurisdiction: String,
    #[serde(default = "unknown")]
    pub captured_at: String,
    #[serde(default = "unknown")]
    pub location: String,
    #[serde(default = "unknown")]
    pub violation_type: String,
    #[serde(default = "unknown")]
    pub fine_amount: String,
    #[serde(default = "unknown")]
    pub image_ref: String,
}

impl ViolationEvent {
    pub fn new(candidate: &PlateCandidate, metadata: &ImageMetadata, image_ref: &str) -> Self {
        ViolationEvent {
            plate: candidate.text.clone(),
            jurisdiction: candidate.jurisdiction().to_string(),
            captured_at: metadata.captured_at.clone(),
            location: metadata.location.clone(),
            violation_type: metadata.violation_type.clone(),
            fine_amount: metadata.fine_amount.clone(),
            image_ref: image_ref.to_string(),
        }
    }

    /// Parses a queue body, rejecting anything without a usable plate.
    pub fn parse(body: &str) -> Result<Self> {
        let event: ViolationEvent = serde_json::from_str(body)
            .map_err(|e| PipelineError::MalformedBody(format!("{}: {}", e, body)))?;
        if event.plate.trim().is_empty() {
            return Err(PipelineError::MalformedBody(format!("empty plate in {}", body)).into());
        }
        Ok(event)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRecord {
    pub plate: String,
    pub owner: String,
    pub email: String,
    pub vehicle_description: String,
}

impl VehicleRecord {
    pub fn unknown(plate: &str) -> Self {
        VehicleRecord {
            plate: plate.to_string(),
            owner: unknown(),
            email: unknown(),
            vehicle_description: unknown(),
        }
    }
}

/// Fully merged violation, the row written by the persister.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalViolationRecord {
    pub plate: String,
    #[serde(default = "unknown_jurisdiction")]
    pub jurisdiction: String,
    #[serde(default = "unknown")]
    pub captured_at: String,
    #[serde(default = "unknown")]
    pub location: String,
    #[serde(default = "unknown")]
    pub violation_type: String,
    #[serde(default = "unknown")]
    pub fine_amount: String,
    #[serde(default = "unknown")]
    pub image_ref: String,
    #[serde(default = "unknown")]
    pub owner: String,
    #[serde(default = "unknown")]
    pub email: String,
    #[serde(default = "unknown")]
    pub vehicle: String,
}

impl CanonicalViolationRecord {
    /// Merges detection output with the resolved owner; blank fields become "Unknown".
    pub fn merge(event: &ViolationEvent, vehicle: &VehicleRecord) -> Self {
        CanonicalViolationRecord {
            plate: or_unknown(&event.plate),
            jurisdiction: if event.jurisdiction.trim().is_empty() {
                unknown_jurisdiction()
            } else {
                event.jurisdiction.clone()
            },
            captured_at: or_unknown(&event.captured_at),
            location: or_unknown(&event.location),
            violation_type: or_unknown(&event.violation_type),
            fine_amount: or_unknown(&event.fine_amount),
            image_ref: or_unknown(&event.image_ref),
            owner: or_unknown(&vehicle.owner),
            email: or_unknown(&vehicle.email),
            vehicle: or_unknown(&vehicle.vehicle_description),
        }
    }

    pub fn parse(body: &str) -> Result<Self> {
        let record: CanonicalViolationRecord = serde_json::from_str(body)
            .map_err(|e| PipelineError::MalformedBody(format!("{}: {}", e, body)))?;
        if record.plate.trim().is_empty() {
            return Err(PipelineError::MalformedBody(format!("empty plate in {}", body)).into());
        }
        Ok(record)
    }
}

/// Slow-lane row kept for manual review.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfStateRecord {
    pub plate: String,
    pub jurisdiction: String,
    pub detected_text: String,
    #[serde(flatten)]
    pub metadata: ImageMetadata,
    pub image_ref: String,
    pub processed_at: String,
}
