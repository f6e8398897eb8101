use crate::db::ViolationStore;
use crate::error::Result;
use crate::queue::MessageQueue;
use crate::types::{ImageMetadata, OutOfStateRecord, PlateCandidate, ViolationEvent};
use chrono::{SecondsFormat, Utc};
use log::info;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "lane")]
pub enum Route {
    /// Queued for owner lookup.
    #[serde(rename_all = "camelCase")]
    FastLane { message_id: String },
    /// Stored directly for manual review.
    #[serde(rename_all = "camelCase")]
    SlowLane { row_id: i64 },
}

/// Sends home-jurisdiction events to the fast-lane queue and writes everything
/// else straight to the out-of-state table.
pub struct Router {
    home_jurisdiction: String,
    fast_lane: Arc<dyn MessageQueue>,
    store: ViolationStore,
}

impl Router {
    pub fn new(home_jurisdiction: &str, fast_lane: Arc<dyn MessageQueue>, store: ViolationStore) -> Self {
        Router {
            home_jurisdiction: home_jurisdiction.to_ascii_uppercase(),
            fast_lane,
            store,
        }
    }

    pub async fn route(
        &self,
        candidate: &PlateCandidate,
        metadata: &ImageMetadata,
        image_ref: &str,
        detected_text: &str,
    ) -> Result<Route> {
        let event = ViolationEvent::new(candidate, metadata, image_ref);
        if event.jurisdiction == self.home_jurisdiction {
            let body = serde_json::to_string(&event)?;
            let message_id = self.fast_lane.send(&body).await?;
            info!(
                "{} plate {} sent to {} as {}",
                self.home_jurisdiction,
                event.plate,
                self.fast_lane.name(),
                message_id
            );
            Ok(Route::FastLane { message_id })
        } else {
            info!(
                "Out-of-jurisdiction plate {} ({}), storing for review",
                event.plate, event.jurisdiction
            );
            let record = OutOfStateRecord {
                plate: event.plate,
                jurisdiction: event.jurisdiction,
                detected_text: detected_text.to_string(),
                metadata: metadata.clone(),
                image_ref: event.image_ref,
                processed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            };
            let row_id = self.store.insert_out_of_state(&record).await?;
            Ok(Route::SlowLane { row_id })
        }
    }
}
