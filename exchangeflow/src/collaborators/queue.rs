//! Named message queues with at-least-once delivery.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::errors::CollaboratorError;

/// A received message. It stays invisible to other receivers until its
/// visibility timeout lapses; it must be deleted to be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Stable message id.
    pub id: String,
    /// Receipt for this delivery; deleting requires the latest receipt.
    pub pop_receipt: String,
    /// Message body.
    pub body: String,
    /// How many times the message has been received.
    pub dequeue_count: u32,
}

/// Client for a queue service hosting several named queues.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Creates the queue if it does not exist.
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), CollaboratorError>;

    /// Appends a message.
    async fn enqueue(&self, queue: &str, body: String) -> Result<(), CollaboratorError>;

    /// Receives up to `max_messages` visible messages.
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<QueueMessage>, CollaboratorError>;

    /// Acknowledges a message.
    async fn delete(&self, queue: &str, message: &QueueMessage) -> Result<(), CollaboratorError>;
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    pop_receipt: String,
    dequeue_count: u32,
    visible_at: Instant,
}

/// In-memory queue service.
#[derive(Debug)]
pub struct InMemoryQueueService {
    queues: Mutex<HashMap<String, Vec<StoredMessage>>>,
    visibility_timeout: Duration,
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl InMemoryQueueService {
    /// Creates a service whose received messages stay hidden for
    /// `visibility_timeout`.
    #[must_use]
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            visibility_timeout,
        }
    }

    /// Total messages in `queue`, visible or not.
    #[must_use]
    pub fn len(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, Vec::len)
    }

    /// Bodies of every message in `queue`, in enqueue order.
    #[must_use]
    pub fn bodies(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    fn missing(queue: &str) -> CollaboratorError {
        CollaboratorError::NotFound {
            kind: "queue",
            key: queue.to_string(),
        }
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueService {
    async fn create_if_not_exists(&self, queue: &str) -> Result<(), CollaboratorError> {
        self.queues.lock().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn enqueue(&self, queue: &str, body: String) -> Result<(), CollaboratorError> {
        let mut queues = self.queues.lock();
        let messages = queues.get_mut(queue).ok_or_else(|| Self::missing(queue))?;
        messages.push(StoredMessage {
            id: Uuid::new_v4().to_string(),
            body,
            pop_receipt: String::new(),
            dequeue_count: 0,
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<QueueMessage>, CollaboratorError> {
        let now = Instant::now();
        let mut queues = self.queues.lock();
        let messages = queues.get_mut(queue).ok_or_else(|| Self::missing(queue))?;
        let received = messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages)
            .map(|m| {
                m.dequeue_count += 1;
                m.pop_receipt = Uuid::new_v4().to_string();
                m.visible_at = now + self.visibility_timeout;
                QueueMessage {
                    id: m.id.clone(),
                    pop_receipt: m.pop_receipt.clone(),
                    body: m.body.clone(),
                    dequeue_count: m.dequeue_count,
                }
            })
            .collect();
        Ok(received)
    }

    async fn delete(&self, queue: &str, message: &QueueMessage) -> Result<(), CollaboratorError> {
        let mut queues = self.queues.lock();
        let messages = queues.get_mut(queue).ok_or_else(|| Self::missing(queue))?;
        let index = messages
            .iter()
            .position(|m| m.id == message.id && m.pop_receipt == message.pop_receipt)
            .ok_or_else(|| CollaboratorError::NotFound {
                kind: "queue message",
                key: message.id.clone(),
            })?;
        messages.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_requires_queue() {
        let service = InMemoryQueueService::default();
        let err = service.enqueue("q", "x".to_string()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_received_messages_are_hidden_until_timeout() {
        let service = InMemoryQueueService::default();
        service.create_if_not_exists("q").await.unwrap();
        service.enqueue("q", "a".to_string()).await.unwrap();
        service.enqueue("q", "b".to_string()).await.unwrap();

        let first = service.receive("q", 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].body, "a");

        let second = service.receive("q", 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, "b");
    }

    #[tokio::test]
    async fn test_undeleted_message_is_redelivered() {
        let service = InMemoryQueueService::new(Duration::ZERO);
        service.create_if_not_exists("q").await.unwrap();
        service.enqueue("q", "a".to_string()).await.unwrap();

        let first = service.receive("q", 1).await.unwrap();
        let again = service.receive("q", 1).await.unwrap();
        assert_eq!(again[0].id, first[0].id);
        assert_eq!(again[0].dequeue_count, 2);

        // The stale receipt no longer acknowledges.
        assert!(service.delete("q", &first[0]).await.is_err());
        service.delete("q", &again[0]).await.unwrap();
        assert_eq!(service.len("q"), 0);
    }
}
