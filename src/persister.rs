use crate::db::ViolationStore;
use crate::error::Result;
use crate::notifier::{Notifier, StorageEvent};
use crate::queue::QueueMessage;
use crate::types::CanonicalViolationRecord;
use crate::worker::Stage;
use async_trait::async_trait;
use log::info;

/// Persistence stage: one canonical record per message, one row per record.
/// Fresh inserts are handed to the notifier. A redelivered record whose row
/// never got its notice is notified then.
pub struct Persister {
    store: ViolationStore,
    notifier: Notifier,
}

impl Persister {
    pub fn new(store: ViolationStore, notifier: Notifier) -> Self {
        Persister { store, notifier }
    }
}

#[async_trait]
impl Stage for Persister {
    fn name(&self) -> &str {
        "persister"
    }

    async fn process(&self, message: &QueueMessage<String>) -> Result<()> {
        let record = CanonicalViolationRecord::parse(&message.body)?;
        info!("Persisting violation for plate {}", record.plate);
        let fresh = self.store.insert_violation(&record).await?;
        if !fresh {
            if !self.store.notice_pending(&record).await? {
                return Ok(());
            }
            info!("Notice for plate {} was never sent, sending now", record.plate);
        }
        if self.notifier.handle(&StorageEvent::inserted(record.clone())).await {
            self.store.mark_notified(&record).await?;
        }
        Ok(())
    }
}
