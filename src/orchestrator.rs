use crate::error::Result;
use crate::queue::{MessageQueue, QueueMessage};
use crate::reference::ReferenceResolver;
use crate::types::{CanonicalViolationRecord, ViolationEvent};
use crate::worker::Stage;
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

/// Fast-lane stage: owner lookup, merge, forward to the persistence queue.
pub struct Orchestrator {
    resolver: Arc<ReferenceResolver>,
    persistence: Arc<dyn MessageQueue>,
}

impl Orchestrator {
    pub fn new(resolver: Arc<ReferenceResolver>, persistence: Arc<dyn MessageQueue>) -> Self {
        Orchestrator {
            resolver,
            persistence,
        }
    }

    pub fn enrich(&self, event: &ViolationEvent) -> CanonicalViolationRecord {
        let vehicle = self.resolver.resolve(&event.plate);
        CanonicalViolationRecord::merge(event, &vehicle)
    }
}

#[async_trait]
impl Stage for Orchestrator {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn process(&self, message: &QueueMessage<String>) -> Result<()> {
        let event = ViolationEvent::parse(&message.body)?;
        info!("Received violation for plate {} from fast lane", event.plate);

        let record = self.enrich(&event);
        let body = serde_json::to_string(&record)?;
        let message_id = self.persistence.send(&body).await?;
        info!(
            "Forwarded violation for plate {} to {} as {}",
            record.plate,
            self.persistence.name(),
            message_id
        );
        Ok(())
    }
}
