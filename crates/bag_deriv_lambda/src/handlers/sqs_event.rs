use std::sync::Arc;

use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent, SqsMessage};
use lambda_runtime::{Error, LambdaEvent};

use crate::adapters::object_store::ObjectStore;
use crate::adapters::queue::{MessageQueue, QueueMessage};
use crate::deadline::DeadlinePolicy;
use crate::handlers::consumer::{BatchReport, QueueConsumer};

const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

/// Consumes one Lambda SQS batch. Retained messages are reported back as
/// batch item failures so the event source mapping never deletes them.
pub async fn handle_sqs_event<S, Q>(
    consumer: Arc<QueueConsumer<S, Q>>,
    policy: DeadlinePolicy,
    event: LambdaEvent<SqsEvent>,
) -> Result<SqsBatchResponse, Error>
where
    S: ObjectStore + Send + Sync + 'static,
    Q: MessageQueue + Send + Sync + 'static,
{
    let deadline = policy.deadline_at_epoch_millis(event.context.deadline);
    let messages = queue_messages(&event.payload)?;
    tracing::info!(
        component = "sqs_event_handler",
        event = "batch_received",
        request_id = %event.context.request_id,
        messages = messages.len(),
        remaining_ms = deadline.remaining().as_millis() as u64,
    );

    let report = tokio::task::spawn_blocking(move || consumer.consume_batch(&messages, &deadline))
        .await
        .map_err(|error| Error::from(format!("batch worker did not complete: {error}")))?;

    Ok(batch_response(&report))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqsEventError {
    /// A record that cannot be named in `batchItemFailures` would be deleted
    /// unprocessed, so the whole invocation fails and the batch is redelivered.
    #[error("sqs record {index} has no message id")]
    MissingMessageId { index: usize },
}

pub fn queue_messages(event: &SqsEvent) -> Result<Vec<QueueMessage>, SqsEventError> {
    event
        .records
        .iter()
        .enumerate()
        .map(|(index, record)| queue_message(index, record))
        .collect()
}

fn queue_message(index: usize, record: &SqsMessage) -> Result<QueueMessage, SqsEventError> {
    let Some(message_id) = record.message_id.clone() else {
        tracing::error!(
            component = "sqs_event_handler",
            event = "record_without_message_id",
            index,
            "failing the batch so no record is deleted unprocessed"
        );
        return Err(SqsEventError::MissingMessageId { index });
    };

    let receive_count = record
        .attributes
        .get(RECEIVE_COUNT_ATTRIBUTE)
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    Ok(QueueMessage {
        message_id,
        receipt_handle: record.receipt_handle.clone().unwrap_or_default(),
        body: record.body.clone().unwrap_or_default(),
        receive_count,
    })
}

pub fn batch_response(report: &BatchReport) -> SqsBatchResponse {
    SqsBatchResponse {
        batch_item_failures: report
            .retained_message_ids()
            .into_iter()
            .map(|message_id| BatchItemFailure {
                item_identifier: message_id.to_string(),
            })
            .collect(),
    }
}
