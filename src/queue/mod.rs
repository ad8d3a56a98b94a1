//! Message queues.
//!
//! A [`MessageQueue`] is one named queue of text messages. Received messages
//! stay hidden for a visibility timeout and are removed only by `delete`
//! with the pop receipt of the latest receive.

pub mod memory;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryQueue;

/// Largest batch a single `peek` or `receive` may ask for.
pub const MAX_BATCH: usize = 32;

pub const ORDER_QUEUE: &str = "order-queue";
pub const PRODUCT_QUEUE: &str = "product-queue";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message {0} not found")]
    MessageNotFound(String),

    #[error("pop receipt for message {0} does not match")]
    PopReceiptMismatch(String),

    #[error("batch size must be between 1 and {MAX_BATCH}, got {0}")]
    InvalidBatchSize(usize),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// A message seen without being dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeekedMessage {
    pub id: String,
    pub text: String,
    pub inserted_at: DateTime<Utc>,
}

/// A dequeued message, hidden until deleted or its visibility lapses.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: String,
    pub text: String,
    pub pop_receipt: String,
    pub dequeue_count: u32,
}

pub trait MessageQueue: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Append a message. Returns its id.
    fn send(&self, text: &str) -> Pin<Box<dyn Future<Output = QueueResult<String>> + Send + '_>>;

    /// Up to `max` visible messages, oldest first, without dequeuing them.
    fn peek(
        &self,
        max: usize,
    ) -> Pin<Box<dyn Future<Output = QueueResult<Vec<PeekedMessage>>> + Send + '_>>;

    /// Dequeue up to `max` visible messages, hiding each for `visibility`.
    fn receive(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Pin<Box<dyn Future<Output = QueueResult<Vec<ReceivedMessage>>> + Send + '_>>;

    fn delete(
        &self,
        id: &str,
        pop_receipt: &str,
    ) -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send + '_>>;
}

pub(crate) fn check_batch(max: usize) -> QueueResult<()> {
    if (1..=MAX_BATCH).contains(&max) {
        Ok(())
    } else {
        Err(QueueError::InvalidBatchSize(max))
    }
}
