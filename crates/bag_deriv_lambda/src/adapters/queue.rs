use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    /// The queue's approximate receive count; 1 on first delivery.
    pub receive_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Blocking queue gateway with explicit delete-on-success semantics.
pub trait MessageQueue {
    /// Long-polls for up to `max_messages`, waiting at most `wait`.
    fn receive_messages(&self, max_messages: u32, wait: Duration) -> Result<Vec<QueueMessage>, QueueError>;

    fn delete_message(&self, receipt_handle: &str, timeout: Duration) -> Result<(), QueueError>;
}
