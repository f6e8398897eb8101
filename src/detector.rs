//! Plate and jurisdiction extraction from OCR text fragments.
//!
//! Selection order:
//! 1. a fragment in the home-jurisdiction plate format wins outright and forces
//!    the home jurisdiction;
//! 2. otherwise the plate-shaped fragment with the largest bounding box, then
//!    the highest confidence, then the earliest position;
//! 3. with no plate-shaped fragment at all, a synthetic `UNKNOWN-<digits>` id.

use crate::config::JURISDICTIONS;
use crate::types::{PlateCandidate, TextFragment};
use chrono::{TimeZone, Utc};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicI64, Ordering};

static PLATE_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9-]{4,8}$").unwrap());

/// Digit, three letters, three digits (e.g. 8ABC123).
static HOME_PLATE_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9][A-Z]{3}[0-9]{3}$").unwrap());

/// Any listed jurisdiction name appearing anywhere in a fragment.
static JURISDICTION_TEXT: Lazy<Regex> = Lazy::new(|| {
    let names: Vec<String> = JURISDICTIONS.iter().map(|name| regex::escape(name)).collect();
    Regex::new(&format!("(?i){}", names.join("|"))).unwrap()
});

static LAST_SYNTHETIC_MILLIS: AtomicI64 = AtomicI64::new(0);

pub const SYNTHETIC_PREFIX: &str = "UNKNOWN-";

pub struct Detector {
    home_jurisdiction: String,
}

impl Detector {
    pub fn new(home_jurisdiction: &str) -> Self {
        Detector {
            home_jurisdiction: home_jurisdiction.to_ascii_uppercase(),
        }
    }

    /// Never fails; an empty or useless fragment list yields a synthetic plate.
    pub fn detect(&self, fragments: &[TextFragment]) -> PlateCandidate {
        let jurisdiction_guess = self.find_jurisdiction(fragments);

        let candidates: Vec<&TextFragment> = fragments
            .iter()
            .filter(|f| PLATE_SHAPE.is_match(&f.text))
            .collect();

        if let Some(home) = candidates
            .iter()
            .find(|f| HOME_PLATE_FORMAT.is_match(&f.text))
        {
            info!(
                "Detected {} format plate {}",
                self.home_jurisdiction, home.text
            );
            return PlateCandidate {
                text: home.text.clone(),
                jurisdiction_guess: Some(self.home_jurisdiction.clone()),
            };
        }

        match best_candidate(&candidates) {
            Some(best) => {
                info!(
                    "Detected plate {} (jurisdiction {:?})",
                    best.text, jurisdiction_guess
                );
                PlateCandidate {
                    text: best.text.clone(),
                    jurisdiction_guess,
                }
            }
            None => {
                let text = synthetic_plate_id();
                info!("No plate-shaped text found, using {}", text);
                PlateCandidate {
                    text,
                    jurisdiction_guess,
                }
            }
        }
    }

    /// The first fragment mentioning a jurisdiction, uppercased as a whole.
    /// Surrounding words stay, so "Visit California Parks" is not the home
    /// jurisdiction.
    fn find_jurisdiction(&self, fragments: &[TextFragment]) -> Option<String> {
        fragments
            .iter()
            .find(|fragment| JURISDICTION_TEXT.is_match(&fragment.text))
            .map(|fragment| {
                debug!("Jurisdiction text found in '{}'", fragment.text);
                fragment.text.trim().to_ascii_uppercase()
            })
    }
}

/// Largest area, then highest confidence; earlier fragments win exact ties.
fn best_candidate<'a>(candidates: &[&'a TextFragment]) -> Option<&'a TextFragment> {
    candidates.iter().copied().fold(None, |best, current| match best {
        None => Some(current),
        Some(prev) => {
            let better = current.bounding_box_area > prev.bounding_box_area
                || (current.bounding_box_area == prev.bounding_box_area
                    && current.confidence > prev.confidence);
            Some(if better { current } else { prev })
        }
    })
}

/// `UNKNOWN-` followed by the UTC time as `YYYYMMDDhhmmssSSS`, unique per process.
pub fn synthetic_plate_id() -> String {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_SYNTHETIC_MILLIS.load(Ordering::SeqCst);
    let millis = loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_SYNTHETIC_MILLIS.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => break next,
            Err(actual) => last = actual,
        }
    };
    let timestamp = Utc
        .timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now);
    format!(
        "{}{}",
        SYNTHETIC_PREFIX,
        timestamp.format("%Y%m%d%H%M%S%3f")
    )
}
