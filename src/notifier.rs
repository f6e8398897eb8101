use crate::error::{PipelineError, Result};
use crate::types::CanonicalViolationRecord;
use async_trait::async_trait;
use log::{error, info};
use serde_json::json;
use url::Url;

pub const SUBJECT: &str = "Traffic Violation Notice";

/// Fire-and-forget notification transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<()>;
}

pub struct HttpPublisher {
    client: reqwest::Client,
    url: Url,
    access_token: Option<String>,
}

impl HttpPublisher {
    pub fn new(client: reqwest::Client, url: Url, access_token: Option<String>) -> Self {
        HttpPublisher {
            client,
            url,
            access_token,
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<()> {
        let mut request = self.client.post(self.url.clone()).json(&json!({
            "topic": topic,
            "subject": subject,
            "message": message,
        }));
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
        Ok(())
    }
}

/// Kinds reported by a storage change feed. The persister only emits
/// `Insert`; the others are accepted and ignored so the notifier can sit
/// behind any feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

/// Change to a stored violation row.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub kind: ChangeKind,
    pub new_row: Option<CanonicalViolationRecord>,
}

impl StorageEvent {
    pub fn inserted(row: CanonicalViolationRecord) -> Self {
        StorageEvent {
            kind: ChangeKind::Insert,
            new_row: Some(row),
        }
    }
}

pub struct Notifier {
    publisher: Box<dyn Publisher>,
    topic: String,
}

impl Notifier {
    pub fn new(publisher: Box<dyn Publisher>, topic: &str) -> Self {
        Notifier {
            publisher,
            topic: topic.to_string(),
        }
    }

    /// Publishes an owner notice for fresh inserts. Returns whether a notice
    /// was sent; publish failures are logged and not retried.
    pub async fn handle(&self, event: &StorageEvent) -> bool {
        if event.kind != ChangeKind::Insert {
            info!("Skipping non-insert storage event {:?}", event.kind);
            return false;
        }
        let row = match &event.new_row {
            Some(row) => row,
            None => {
                error!("Insert event without row data");
                return false;
            }
        };
        let message = compose_message(row);
        match self.publisher.publish(&self.topic, SUBJECT, &message).await {
            Ok(()) => {
                info!("Violation notice for plate {} published", row.plate);
                true
            }
            Err(e) => {
                error!(
                    "Error publishing violation notice for plate {}: {}",
                    row.plate, e
                );
                false
            }
        }
    }
}

pub fn compose_message(row: &CanonicalViolationRecord) -> String {
    format!(
        "Your vehicle was involved in a traffic violation. \
         Please pay the specified fine amount within 30 days.\n\
         \n\
         Date: {}\n\
         Violation Address: {}\n\
         Vehicle: {}\n\
         License Plate: {}\n\
         Violation Type: {}\n\
         Ticket Amount: {}\n\
         \n\
         For any inquiries, please contact the DMV.\n",
        row.captured_at, row.location, row.vehicle, row.plate, row.violation_type, row.fine_amount
    )
}
