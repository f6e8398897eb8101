use crate::db::SharedConnection;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rusqlite::{params, OptionalExtension};
use std::convert::TryFrom;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;

/// Opaque handle proving a particular receive of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryToken(String);

impl From<&str> for DeliveryToken {
    fn from(token: &str) -> Self {
        DeliveryToken(token.to_string())
    }
}

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct QueueMessage<T> {
    pub message_id: String,
    pub body: T,
    pub delivery_token: DeliveryToken,
    /// 1 on first delivery; higher values mean the message was redelivered.
    pub receive_count: u32,
}

/// At-least-once queue. A received message stays hidden for the visibility
/// window and is redelivered unless acknowledged before it expires.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, body: &str) -> Result<String>;
    async fn receive(&self, max_wait: Duration) -> Result<Option<QueueMessage<String>>>;
    async fn acknowledge(&self, token: &DeliveryToken) -> Result<()>;
}

const POLL_STEP: Duration = Duration::from_millis(200);

/// Queue persisted in the `queue_message` table.
pub struct SqliteQueue {
    conn: SharedConnection,
    name: String,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(conn: SharedConnection, name: &str, visibility_timeout: Duration) -> Self {
        SqliteQueue {
            conn,
            name: name.to_string(),
            visibility_timeout,
        }
    }

    async fn try_claim(&self) -> Result<Option<QueueMessage<String>>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp_millis();
        let row: Option<(i64, String, String, i64)> = tx
            .query_row(
                "SELECT id, message_id, body, receive_count FROM queue_message
                 WHERE queue = ?1 AND visible_at <= ?2 ORDER BY id LIMIT 1",
                params![self.name, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let (id, message_id, body, receive_count) = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let token = Uuid::new_v4().to_string();
        let hidden_until = now + self.visibility_timeout.as_millis() as i64;
        tx.execute(
            "UPDATE queue_message SET visible_at = ?1, receipt_handle = ?2,
                receive_count = receive_count + 1 WHERE id = ?3",
            params![hidden_until, token, id],
        )?;
        tx.commit()?;
        Ok(Some(QueueMessage {
            message_id,
            body,
            delivery_token: DeliveryToken(token),
            receive_count: u32::try_from(receive_count + 1).unwrap_or(u32::MAX),
        }))
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO queue_message (queue, message_id, body, visible_at) VALUES (?1, ?2, ?3, ?4)",
            params![self.name, message_id, body, Utc::now().timestamp_millis()],
        )?;
        debug!("Queued message {} on {}", message_id, self.name);
        Ok(message_id)
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<QueueMessage<String>>> {
        let started = Instant::now();
        loop {
            if let Some(message) = self.try_claim().await? {
                return Ok(Some(message));
            }
            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                return Ok(None);
            }
            sleep(POLL_STEP.min(max_wait - elapsed)).await;
        }
    }

    async fn acknowledge(&self, token: &DeliveryToken) -> Result<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM queue_message WHERE queue = ?1 AND receipt_handle = ?2",
            params![self.name, token.0],
        )?;
        if deleted == 0 {
            return Err(PipelineError::StaleDeliveryToken {
                queue: self.name.clone(),
                token: token.0.clone(),
            }
            .into());
        }
        debug!("Acknowledged message on {}", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn queue(visibility: Duration) -> SqliteQueue {
        SqliteQueue::new(db::open_in_memory().unwrap(), "test", visibility)
    }

    #[tokio::test]
    async fn receive_hides_message_until_acknowledged() {
        let q = queue(Duration::from_secs(30));
        let id = q.send("hello").await.unwrap();

        let message = q.receive(Duration::from_millis(0)).await.unwrap().unwrap();
        assert_eq!(message.message_id, id);
        assert_eq!(message.body, "hello");
        assert_eq!(message.receive_count, 1);

        assert!(q.receive(Duration::from_millis(0)).await.unwrap().is_none());
        q.acknowledge(&message.delivery_token).await.unwrap();
        assert!(q.acknowledge(&message.delivery_token).await.is_err());
    }

    #[tokio::test]
    async fn expired_visibility_window_redelivers() {
        let q = queue(Duration::from_millis(50));
        q.send("again").await.unwrap();

        let first = q.receive(Duration::from_millis(0)).await.unwrap().unwrap();
        sleep(Duration::from_millis(80)).await;
        let second = q.receive(Duration::from_millis(0)).await.unwrap().unwrap();
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(second.receive_count, 2);
        assert_ne!(first.delivery_token, second.delivery_token);

        // The first receiver lost its claim when the window expired.
        assert!(q.acknowledge(&first.delivery_token).await.is_err());
        q.acknowledge(&second.delivery_token).await.unwrap();
        assert!(q.receive(Duration::from_millis(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queues_sharing_a_database_are_isolated() {
        let conn = db::open_in_memory().unwrap();
        let a = SqliteQueue::new(conn.clone(), "a", Duration::from_secs(30));
        let b = SqliteQueue::new(conn, "b", Duration::from_secs(30));
        a.send("for a").await.unwrap();
        assert!(b.receive(Duration::from_millis(0)).await.unwrap().is_none());
        assert_eq!(a.receive(Duration::from_millis(0)).await.unwrap().unwrap().body, "for a");
    }

    #[tokio::test]
    async fn receive_waits_for_late_message() {
        let conn = db::open_in_memory().unwrap();
        let producer = SqliteQueue::new(conn.clone(), "late", Duration::from_secs(30));
        let consumer = SqliteQueue::new(conn, "late", Duration::from_secs(30));
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            producer.send("late").await.unwrap();
        });
        let message = consumer.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(message.unwrap().body, "late");
    }

    #[tokio::test]
    async fn messages_are_received_oldest_first() {
        let q = queue(Duration::from_secs(30));
        q.send("one").await.unwrap();
        q.send("two").await.unwrap();
        let first = q.receive(Duration::from_millis(0)).await.unwrap().unwrap();
        let second = q.receive(Duration::from_millis(0)).await.unwrap().unwrap();
        assert_eq!((first.body.as_str(), second.body.as_str()), ("one", "two"));
    }
}
