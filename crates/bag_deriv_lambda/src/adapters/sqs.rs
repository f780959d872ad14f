use std::future::Future;
use std::time::Duration;

use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use tokio::runtime::Handle;

use crate::adapters::queue::{MessageQueue, QueueError, QueueMessage};

/// Longest long-poll wait SQS accepts.
pub const MAX_WAIT_SECONDS: u64 = 20;

#[derive(Clone)]
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    runtime: Handle,
    call_timeout: Duration,
}

impl SqsQueue {
    pub fn new(
        client: aws_sdk_sqs::Client,
        queue_url: impl Into<String>,
        runtime: Handle,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            runtime,
            call_timeout,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    fn block_on<T>(
        &self,
        timeout: Duration,
        call: impl Future<Output = Result<T, QueueError>>,
    ) -> Result<T, QueueError> {
        self.runtime.block_on(async move {
            tokio::time::timeout(timeout, call)
                .await
                .unwrap_or_else(|_| Err(QueueError::Timeout(timeout)))
        })
    }
}

impl MessageQueue for SqsQueue {
    fn receive_messages(&self, max_messages: u32, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let wait_seconds = wait.as_secs().min(MAX_WAIT_SECONDS);
        let request = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(i32::try_from(max_messages.clamp(1, 10)).unwrap_or(10))
            .wait_time_seconds(i32::try_from(wait_seconds).unwrap_or(0))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount);

        self.block_on(Duration::from_secs(wait_seconds) + self.call_timeout, async move {
            let output = request.send().await.map_err(|error| {
                QueueError::Unavailable(format!(
                    "failed to receive messages: {}",
                    DisplayErrorContext(&error)
                ))
            })?;
            Ok(output.messages().iter().filter_map(queue_message).collect())
        })
    }

    fn delete_message(&self, receipt_handle: &str, timeout: Duration) -> Result<(), QueueError> {
        let request = self
            .client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle);

        self.block_on(timeout, async move {
            request.send().await.map(|_| ()).map_err(|error| {
                QueueError::Unavailable(format!(
                    "failed to delete message: {}",
                    DisplayErrorContext(&error)
                ))
            })
        })
    }
}

fn queue_message(message: &Message) -> Option<QueueMessage> {
    let message_id = message.message_id()?;
    let Some(receipt_handle) = message.receipt_handle() else {
        tracing::warn!(
            component = "sqs_queue",
            event = "message_without_receipt",
            message_id,
            "received message cannot be deleted; skipping"
        );
        return None;
    };
    let receive_count = message
        .attributes()
        .and_then(|attributes| attributes.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    Some(QueueMessage {
        message_id: message_id.to_string(),
        receipt_handle: receipt_handle.to_string(),
        body: message.body().unwrap_or_default().to_string(),
        receive_count,
    })
}
