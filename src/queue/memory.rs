//! In-memory message queue.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;

use super::{
    check_batch, MessageQueue, PeekedMessage, QueueError, QueueResult, ReceivedMessage,
};
use crate::metrics::QUEUE_MESSAGES_TOTAL;

#[derive(Debug)]
struct Entry {
    id: String,
    text: String,
    inserted_at: DateTime<Utc>,
    visible_at: Instant,
    pop_receipt: Option<String>,
    dequeue_count: u32,
}

pub struct MemoryQueue {
    name: String,
    messages: Mutex<VecDeque<Entry>>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
        }
    }

    /// Messages currently stored, visible or not.
    pub fn len(&self) -> usize {
        self.messages.lock().expect("mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count(&self, outcome: &'static str, n: usize) {
        counter!(QUEUE_MESSAGES_TOTAL, "queue" => self.name.clone(), "outcome" => outcome)
            .increment(n as u64);
    }
}

impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, text: &str) -> Pin<Box<dyn Future<Output = QueueResult<String>> + Send + '_>> {
        let text = text.to_string();
        Box::pin(async move {
            let id = uuid::Uuid::new_v4().to_string();
            self.messages
                .lock()
                .expect("mutex poisoned")
                .push_back(Entry {
                    id: id.clone(),
                    text,
                    inserted_at: Utc::now(),
                    visible_at: Instant::now(),
                    pop_receipt: None,
                    dequeue_count: 0,
                });
            self.count("sent", 1);
            Ok(id)
        })
    }

    fn peek(
        &self,
        max: usize,
    ) -> Pin<Box<dyn Future<Output = QueueResult<Vec<PeekedMessage>>> + Send + '_>> {
        Box::pin(async move {
            check_batch(max)?;
            let now = Instant::now();
            let messages = self.messages.lock().expect("mutex poisoned");
            Ok(messages
                .iter()
                .filter(|m| m.visible_at <= now)
                .take(max)
                .map(|m| PeekedMessage {
                    id: m.id.clone(),
                    text: m.text.clone(),
                    inserted_at: m.inserted_at,
                })
                .collect())
        })
    }

    fn receive(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Pin<Box<dyn Future<Output = QueueResult<Vec<ReceivedMessage>>> + Send + '_>> {
        Box::pin(async move {
            check_batch(max)?;
            let now = Instant::now();
            let received: Vec<ReceivedMessage> = {
                let mut messages = self.messages.lock().expect("mutex poisoned");
                messages
                    .iter_mut()
                    .filter(|m| m.visible_at <= now)
                    .take(max)
                    .map(|m| {
                        let receipt = uuid::Uuid::new_v4().to_string();
                        m.visible_at = now + visibility;
                        m.pop_receipt = Some(receipt.clone());
                        m.dequeue_count += 1;
                        ReceivedMessage {
                            id: m.id.clone(),
                            text: m.text.clone(),
                            pop_receipt: receipt,
                            dequeue_count: m.dequeue_count,
                        }
                    })
                    .collect()
            };
            if !received.is_empty() {
                self.count("received", received.len());
            }
            Ok(received)
        })
    }

    fn delete(
        &self,
        id: &str,
        pop_receipt: &str,
    ) -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send + '_>> {
        let id = id.to_string();
        let pop_receipt = pop_receipt.to_string();
        Box::pin(async move {
            {
                let mut messages = self.messages.lock().expect("mutex poisoned");
                let Some(pos) = messages.iter().position(|m| m.id == id) else {
                    return Err(QueueError::MessageNotFound(id));
                };
                if messages[pos].pop_receipt.as_deref() != Some(pop_receipt.as_str()) {
                    return Err(QueueError::PopReceiptMismatch(id));
                }
                messages.remove(pos);
            }
            self.count("deleted", 1);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_peek_does_not_dequeue() {
        let q = MemoryQueue::new("order-queue");
        q.send("one").await.unwrap();
        q.send("two").await.unwrap();

        let peeked = q.peek(10).await.unwrap();
        assert_eq!(peeked.len(), 2);
        assert_eq!(peeked[0].text, "one");
        assert_eq!(q.peek(1).await.unwrap().len(), 1);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn test_receive_hides_message() {
        let q = MemoryQueue::new("order-queue");
        let id = q.send("hello").await.unwrap();

        let got = q.receive(5, LONG).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, id);
        assert_eq!(got[0].dequeue_count, 1);

        assert!(q.receive(5, LONG).await.unwrap().is_empty());
        assert!(q.peek(5).await.unwrap().is_empty());
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_latest_receipt() {
        let q = MemoryQueue::new("order-queue");
        let id = q.send("hello").await.unwrap();

        let first = q.receive(1, Duration::ZERO).await.unwrap().remove(0);
        let second = q.receive(1, LONG).await.unwrap().remove(0);
        assert_eq!(second.dequeue_count, 2);

        let err = q.delete(&id, &first.pop_receipt).await.unwrap_err();
        assert!(matches!(err, QueueError::PopReceiptMismatch(_)));

        q.delete(&id, &second.pop_receipt).await.unwrap();
        assert!(q.is_empty());
        let err = q.delete(&id, &second.pop_receipt).await.unwrap_err();
        assert!(matches!(err, QueueError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn test_message_reappears_after_visibility() {
        let q = MemoryQueue::new("order-queue");
        q.send("retry me").await.unwrap();
        q.receive(1, Duration::from_millis(20)).await.unwrap();
        assert!(q.peek(1).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let again = q.receive(1, LONG).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].text, "retry me");
    }

    #[tokio::test]
    async fn test_batch_size_bounds() {
        let q = MemoryQueue::new("q");
        assert!(matches!(
            q.peek(0).await.unwrap_err(),
            QueueError::InvalidBatchSize(0)
        ));
        assert!(q.receive(33, LONG).await.is_err());
    }
}
