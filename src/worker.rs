//! Cooperative polling loop shared by the queue-driven stages.
//!
//! One message is in flight at a time. The source message is acknowledged
//! only after its stage reports success; otherwise it stays on the queue and
//! is redelivered once the visibility window expires. Shutdown is observed
//! only while idle, so a received message is always handled to completion.

use crate::config::PollSettings;
use crate::error::Result;
use crate::queue::{MessageQueue, QueueMessage};
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    /// Handles one message; an error leaves the message unacknowledged.
    async fn process(&self, message: &QueueMessage<String>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Idle,
    Acknowledged,
    Failed,
}

pub struct Worker<S> {
    queue: Arc<dyn MessageQueue>,
    stage: S,
    settings: PollSettings,
}

impl<S: Stage> Worker<S> {
    pub fn new(queue: Arc<dyn MessageQueue>, stage: S, settings: PollSettings) -> Self {
        Worker {
            queue,
            stage,
            settings,
        }
    }

    /// Receives at most one message and drives it through the stage.
    pub async fn poll_once(&self) -> Result<Poll> {
        match self.queue.receive(self.settings.wait).await? {
            Some(message) => self.handle(message).await,
            None => Ok(Poll::Idle),
        }
    }

    async fn handle(&self, message: QueueMessage<String>) -> Result<Poll> {
        if message.receive_count > 1 {
            warn!(
                "{}: message {} redelivered ({} receives), may duplicate earlier work",
                self.stage.name(),
                message.message_id,
                message.receive_count
            );
        }
        if let Err(e) = self.stage.process(&message).await {
            error!(
                "{}: message {} not acknowledged: {}",
                self.stage.name(),
                message.message_id,
                e
            );
            return Ok(Poll::Failed);
        }
        self.queue.acknowledge(&message.delivery_token).await?;
        info!(
            "{}: deleted message {} from {}",
            self.stage.name(),
            message.message_id,
            self.queue.name()
        );
        Ok(Poll::Acknowledged)
    }

    /// Polls until `shutdown` flips to true. Only the receive wait and the
    /// backoff sleep are interrupted; a received message is always finished.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("{} running on {}", self.stage.name(), self.queue.name());
        while !*shutdown.borrow() {
            let received = tokio::select! {
                received = self.queue.receive(self.settings.wait) => received,
                _ = shutdown.changed() => break,
            };
            let outcome = match received {
                Ok(Some(message)) => self.handle(message).await,
                Ok(None) => Ok(Poll::Idle),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(Poll::Acknowledged) => continue,
                Ok(Poll::Idle) | Ok(Poll::Failed) => {}
                Err(e) => error!(
                    "{}: error polling {}: {}",
                    self.stage.name(),
                    self.queue.name(),
                    e
                ),
            }
            tokio::select! {
                _ = sleep(self.settings.backoff) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("{} stopped", self.stage.name());
    }
}
