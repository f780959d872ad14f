use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use bag_deriv_core::contract::{payload_fingerprint, QueueKind};
use bag_deriv_core::outcome::{FailureKind, ProcessingResult, Stage};
use bag_deriv_core::storage_keys::failure_record_object_key;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::object_store::ObjectStore;
use crate::adapters::queue::{MessageQueue, QueueError, QueueMessage};
use crate::deadline::Deadline;
use crate::handlers::work_item::{process_message, ProcessorSettings};

pub const FAILURE_RECORD_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub queue: QueueKind,
    pub max_concurrency: usize,
    pub failure_record_bucket: String,
    /// Terminal failure records are also stored under this prefix when set.
    pub failure_record_prefix: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to build worker pool: {0}")]
    Pool(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Deleted,
    /// Left on the queue; it becomes visible again after the visibility timeout.
    Retained,
    DeleteFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    Completed { result: ProcessingResult },
    Panicked { detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageReport {
    pub message_id: String,
    pub outcome: MessageOutcome,
    pub disposition: Disposition,
}

impl MessageReport {
    pub fn result(&self) -> Option<&ProcessingResult> {
        match &self.outcome {
            MessageOutcome::Completed { result } => Some(result),
            MessageOutcome::Panicked { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub messages: Vec<MessageReport>,
}

impl BatchReport {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.messages
            .iter()
            .filter(|report| report.disposition == disposition)
            .count()
    }

    pub fn retained_message_ids(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|report| report.disposition == Disposition::Retained)
            .map(|report| report.message_id.as_str())
            .collect()
    }

    pub fn report_for(&self, message_id: &str) -> Option<&MessageReport> {
        self.messages
            .iter()
            .find(|report| report.message_id == message_id)
    }
}

/// Record emitted for every message that will never succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminalFailureRecord {
    pub message_id: String,
    pub queue: QueueKind,
    pub failure_kind: FailureKind,
    pub stage: Stage,
    pub detail: String,
    pub receive_count: u32,
    pub payload_sha256: String,
    pub event_time: String,
}

/// Dispatches queue messages to the work item processor over a bounded pool
/// and settles each message with the queue.
pub struct QueueConsumer<S, Q> {
    store: S,
    queue: Q,
    processor: ProcessorSettings,
    settings: ConsumerSettings,
    pool: rayon::ThreadPool,
}

impl<S, Q> QueueConsumer<S, Q>
where
    S: ObjectStore + Sync,
    Q: MessageQueue + Sync,
{
    pub fn new(
        store: S,
        queue: Q,
        processor: ProcessorSettings,
        settings: ConsumerSettings,
    ) -> Result<Self, ConsumerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.max_concurrency.max(1))
            .thread_name(|index| format!("bag-deriv-worker-{index}"))
            .build()
            .map_err(|error| ConsumerError::Pool(error.to_string()))?;

        Ok(Self {
            store,
            queue,
            processor,
            settings,
            pool,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Receives one batch and consumes it.
    pub fn poll_once(
        &self,
        max_messages: u32,
        wait: Duration,
        deadline: &Deadline,
    ) -> Result<BatchReport, ConsumerError> {
        let messages = self.queue.receive_messages(max_messages, wait)?;
        if messages.is_empty() {
            return Ok(BatchReport::default());
        }
        Ok(self.consume_batch(&messages, deadline))
    }

    pub fn consume_batch(&self, messages: &[QueueMessage], deadline: &Deadline) -> BatchReport {
        let started_at = Instant::now();
        let reports: Vec<MessageReport> = self.pool.install(|| {
            messages
                .par_iter()
                .map(|message| self.consume_message(message, deadline))
                .collect()
        });
        let report = BatchReport { messages: reports };

        tracing::info!(
            component = "queue_consumer",
            event = "batch_completed",
            queue = %self.settings.queue,
            messages = report.messages.len(),
            deleted = report.count(Disposition::Deleted),
            retained = report.count(Disposition::Retained),
            delete_failed = report.count(Disposition::DeleteFailed),
            duration_ms = started_at.elapsed().as_millis() as u64,
        );
        report
    }

    fn consume_message(&self, message: &QueueMessage, deadline: &Deadline) -> MessageReport {
        let started_at = Instant::now();
        tracing::debug!(
            component = "queue_consumer",
            event = "message_received",
            message_id = %message.message_id,
            receive_count = message.receive_count,
        );

        let processed = catch_unwind(AssertUnwindSafe(|| {
            process_message(
                self.settings.queue,
                &message.body,
                &self.processor,
                deadline,
                &self.store,
            )
        }));

        let result = match processed {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                tracing::error!(
                    component = "queue_consumer",
                    event = "message_panicked",
                    queue = %self.settings.queue,
                    message_id = %message.message_id,
                    detail = %detail,
                );
                return MessageReport {
                    message_id: message.message_id.clone(),
                    outcome: MessageOutcome::Panicked { detail },
                    disposition: Disposition::Retained,
                };
            }
        };

        let disposition = match &result {
            ProcessingResult::Success { .. } => self.delete(message, deadline),
            ProcessingResult::FatalFailure { .. } => {
                self.emit_terminal_failure(message, &result, deadline);
                self.delete(message, deadline)
            }
            ProcessingResult::RetryableFailure { reason } => {
                tracing::warn!(
                    component = "queue_consumer",
                    event = "message_retained",
                    queue = %self.settings.queue,
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    failure_kind = %reason.kind,
                    stage = %reason.stage,
                    detail = %reason.detail,
                );
                Disposition::Retained
            }
        };

        tracing::info!(
            component = "queue_consumer",
            event = "message_settled",
            queue = %self.settings.queue,
            message_id = %message.message_id,
            target_key = result.target_key().unwrap_or_default(),
            disposition = ?disposition,
            duration_ms = started_at.elapsed().as_millis() as u64,
        );

        MessageReport {
            message_id: message.message_id.clone(),
            outcome: MessageOutcome::Completed { result },
            disposition,
        }
    }

    fn delete(&self, message: &QueueMessage, deadline: &Deadline) -> Disposition {
        let Some(timeout) = deadline.call_timeout() else {
            tracing::error!(
                component = "queue_consumer",
                event = "delete_skipped",
                message_id = %message.message_id,
                detail = "invocation deadline is imminent",
            );
            return Disposition::DeleteFailed;
        };

        match self.queue.delete_message(&message.receipt_handle, timeout) {
            Ok(()) => Disposition::Deleted,
            Err(error) => {
                tracing::error!(
                    component = "queue_consumer",
                    event = "delete_failed",
                    message_id = %message.message_id,
                    error = %error,
                );
                Disposition::DeleteFailed
            }
        }
    }

    fn emit_terminal_failure(&self, message: &QueueMessage, result: &ProcessingResult, deadline: &Deadline) {
        let Some(failure) = result.failure() else {
            return;
        };
        let record = TerminalFailureRecord {
            message_id: message.message_id.clone(),
            queue: self.settings.queue,
            failure_kind: failure.kind,
            stage: failure.stage,
            detail: failure.detail.clone(),
            receive_count: message.receive_count,
            payload_sha256: payload_fingerprint(&message.body),
            event_time: chrono::Utc::now().to_rfc3339(),
        };

        tracing::error!(
            component = "queue_consumer",
            event = "terminal_failure",
            message_id = %record.message_id,
            queue = %record.queue,
            failure_kind = %record.failure_kind,
            stage = %record.stage,
            detail = %record.detail,
            receive_count = record.receive_count,
            payload_sha256 = %record.payload_sha256,
        );

        let Some(prefix) = self.settings.failure_record_prefix.as_deref() else {
            return;
        };
        if let Err(error) = self.store_failure_record(prefix, &record, deadline) {
            tracing::error!(
                component = "queue_consumer",
                event = "failure_record_write_failed",
                message_id = %record.message_id,
                error = %error,
            );
        }
    }

    fn store_failure_record(
        &self,
        prefix: &str,
        record: &TerminalFailureRecord,
        deadline: &Deadline,
    ) -> Result<(), String> {
        let key = failure_record_object_key(prefix, record.queue, &record.message_id);
        let body = serde_json::to_vec(record)
            .map_err(|error| format!("failed to serialize failure record: {error}"))?;
        let timeout = deadline
            .call_timeout()
            .ok_or_else(|| "invocation deadline is imminent".to_string())?;
        self.store
            .put_object(
                &self.settings.failure_record_bucket,
                &key,
                &body,
                FAILURE_RECORD_CONTENT_TYPE,
                timeout,
            )
            .map_err(|error| format!("failed to write failure record {key}: {error}"))
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "worker panicked".to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::ImageFormat;

    use super::*;
    use crate::adapters::object_store::{ObjectSummary, StoreError};
    use crate::test_helpers::{
        encode_fixture, generous_deadline, queue_message, InMemoryObjectStore, RecordingQueue,
    };

    fn consumer_settings(queue: QueueKind) -> ConsumerSettings {
        ConsumerSettings {
            queue,
            max_concurrency: 2,
            failure_record_bucket: "ops-bucket".to_string(),
            failure_record_prefix: Some("pipeline/failures".to_string()),
        }
    }

    fn consumer(
        store: InMemoryObjectStore,
        queue: RecordingQueue,
    ) -> QueueConsumer<InMemoryObjectStore, RecordingQueue> {
        QueueConsumer::new(
            store,
            queue,
            ProcessorSettings::default(),
            consumer_settings(QueueKind::Derivative),
        )
        .expect("consumer should build")
    }

    const VALID: &str =
        r#"{"bucket":"ul-bagit","key":"item1/page1.tif","spec":{"format":"jpeg","width":32}}"#;

    fn seeded_store() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        store.insert(
            "ul-bagit",
            "item1/page1.tif",
            encode_fixture(64, 48, ImageFormat::Tiff),
        );
        store
    }

    #[test]
    fn success_deletes_after_write() {
        let consumer = consumer(seeded_store(), RecordingQueue::new());

        let report = consumer.consume_batch(&[queue_message("m-1", VALID)], &generous_deadline());

        assert_eq!(report.count(Disposition::Deleted), 1);
        assert_eq!(consumer.queue().deleted_receipts(), vec!["receipt-m-1"]);
        assert!(consumer
            .store()
            .object("ul-bagit", "item1/page1_w32.jpeg")
            .is_some());
    }

    #[test]
    fn fatal_failure_writes_record_and_deletes() {
        let consumer = consumer(InMemoryObjectStore::new(), RecordingQueue::new());
        let mut message = queue_message("m-bad", "not json");
        message.receive_count = 3;

        let report = consumer.consume_batch(&[message], &generous_deadline());

        let entry = report.report_for("m-bad").expect("report entry");
        assert_eq!(entry.disposition, Disposition::Deleted);
        assert_eq!(
            entry.result().and_then(ProcessingResult::failure_kind),
            Some(FailureKind::BadPayload)
        );

        let body = consumer
            .store()
            .body(
                "ops-bucket",
                "pipeline/failures/dataset=terminal_failures/queue=derivative/message_id=m-bad/part-0.json",
            )
            .expect("failure record should be stored");
        let record: TerminalFailureRecord =
            serde_json::from_slice(&body).expect("record should be json");
        assert_eq!(record.failure_kind, FailureKind::BadPayload);
        assert_eq!(record.stage, Stage::Parsing);
        assert_eq!(record.receive_count, 3);
        assert_eq!(record.payload_sha256, payload_fingerprint("not json"));
    }

    #[test]
    fn retryable_failure_is_retained() {
        let store = seeded_store();
        store.fail_gets_for(
            "item1/page1.tif",
            StoreError::Unavailable("throttled".to_string()),
        );
        let consumer = consumer(store, RecordingQueue::new());

        let report = consumer.consume_batch(&[queue_message("m-1", VALID)], &generous_deadline());

        assert_eq!(report.retained_message_ids(), vec!["m-1"]);
        assert!(consumer.queue().deleted_receipts().is_empty());
    }

    #[test]
    fn delete_failure_is_reported() {
        let queue = RecordingQueue::new();
        queue.fail_delete_for("receipt-m-1");
        let consumer = consumer(seeded_store(), queue);

        let report = consumer.consume_batch(&[queue_message("m-1", VALID)], &generous_deadline());

        assert_eq!(report.count(Disposition::DeleteFailed), 1);
        assert!(report.retained_message_ids().is_empty());
    }

    #[test]
    fn poll_once_drains_up_to_max_messages() {
        let queue = RecordingQueue::with_messages(
            (0..5).map(|index| queue_message(&format!("m-{index}"), VALID)),
        );
        let consumer = consumer(seeded_store(), queue);

        let report = consumer
            .poll_once(3, Duration::ZERO, &generous_deadline())
            .expect("poll should succeed");

        assert_eq!(report.messages.len(), 3);
        assert_eq!(consumer.queue().pending_count(), 2);
        assert_eq!(report.count(Disposition::Deleted), 3);
    }

    struct PanickingStore;

    impl ObjectStore for PanickingStore {
        fn get_object(&self, _: &str, _: &str, _: Duration) -> Result<Vec<u8>, StoreError> {
            panic!("decoder blew up");
        }

        fn put_object(&self, _: &str, _: &str, _: &[u8], _: &str, _: Duration) -> Result<(), StoreError> {
            Ok(())
        }

        fn object_exists(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn list_objects(&self, _: &str, _: &str, _: Duration) -> Result<Vec<ObjectSummary>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn panic_leaves_message_for_redelivery() {
        let consumer = QueueConsumer::new(
            PanickingStore,
            RecordingQueue::new(),
            ProcessorSettings::default(),
            consumer_settings(QueueKind::Derivative),
        )
        .expect("consumer should build");

        let report = consumer.consume_batch(
            &[queue_message("m-1", VALID), queue_message("m-2", "[]")],
            &generous_deadline(),
        );

        let panicked = report.report_for("m-1").expect("m-1 report");
        assert_eq!(panicked.disposition, Disposition::Retained);
        assert!(matches!(
            &panicked.outcome,
            MessageOutcome::Panicked { detail } if detail == "decoder blew up"
        ));
        assert_eq!(
            report.report_for("m-2").map(|entry| entry.disposition),
            Some(Disposition::Deleted)
        );
        assert_eq!(consumer.queue().deleted_receipts(), vec!["receipt-m-2"]);
    }
}
