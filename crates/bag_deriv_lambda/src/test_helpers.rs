//! In-memory gateways and fixtures shared by unit and scenario tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::adapters::object_store::{ObjectStore, ObjectSummary, StoreError};
use crate::adapters::queue::{MessageQueue, QueueError, QueueMessage};
use crate::deadline::Deadline;

pub const FIXTURE_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Object store backed by a map, with injectable failures.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    get_failures: Mutex<HashMap<String, StoreError>>,
    put_failure: Mutex<Option<StoreError>>,
    reads: Mutex<Vec<String>>,
    writes: Mutex<Vec<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        lock(&self.objects).insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                content_type: FIXTURE_CONTENT_TYPE.to_string(),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.object(bucket, key).map(|object| object.body)
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(object_bucket, _)| object_bucket == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Keys fetched with `get_object`, in call order.
    pub fn read_keys(&self) -> Vec<String> {
        lock(&self.reads).clone()
    }

    /// Keys written with `put_object`, in call order.
    pub fn written_keys(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    pub fn fail_gets_for(&self, key: &str, error: StoreError) {
        lock(&self.get_failures).insert(key.to_string(), error);
    }

    pub fn fail_puts_with(&self, error: StoreError) {
        *lock(&self.put_failure) = Some(error);
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get_object(&self, bucket: &str, key: &str, _timeout: Duration) -> Result<Vec<u8>, StoreError> {
        if let Some(error) = lock(&self.get_failures).get(key) {
            return Err(error.clone());
        }
        lock(&self.reads).push(key.to_string());
        self.body(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
        _timeout: Duration,
    ) -> Result<(), StoreError> {
        if let Some(error) = lock(&self.put_failure).as_ref() {
            return Err(error.clone());
        }
        lock(&self.objects).insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        lock(&self.writes).push(key.to_string());
        Ok(())
    }

    fn object_exists(&self, bucket: &str, key: &str, _timeout: Duration) -> Result<bool, StoreError> {
        Ok(self.object(bucket, key).is_some())
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        _timeout: Duration,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        Ok(lock(&self.objects)
            .iter()
            .filter(|((object_bucket, key), _)| object_bucket == bucket && key.starts_with(prefix))
            .map(|((_, key), object)| ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
            })
            .collect())
    }
}

/// Queue that hands out queued messages and records deletions.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    deleted: Mutex<Vec<String>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: impl IntoIterator<Item = QueueMessage>) -> Self {
        let queue = Self::new();
        lock(&queue.pending).extend(messages);
        queue
    }

    pub fn push(&self, message: QueueMessage) {
        lock(&self.pending).push_back(message);
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Receipt handles deleted so far, in call order.
    pub fn deleted_receipts(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    pub fn fail_delete_for(&self, receipt_handle: &str) {
        lock(&self.failing_deletes).insert(receipt_handle.to_string());
    }
}

impl MessageQueue for RecordingQueue {
    fn receive_messages(&self, max_messages: u32, _wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let mut pending = lock(&self.pending);
        let take = pending.len().min(max_messages as usize);
        Ok(pending.drain(..take).collect())
    }

    fn delete_message(&self, receipt_handle: &str, _timeout: Duration) -> Result<(), QueueError> {
        if lock(&self.failing_deletes).contains(receipt_handle) {
            return Err(QueueError::Unavailable(format!(
                "delete rejected for {receipt_handle}"
            )));
        }
        lock(&self.deleted).push(receipt_handle.to_string());
        Ok(())
    }
}

/// First-delivery message whose receipt handle is `receipt-{message_id}`.
pub fn queue_message(message_id: &str, body: &str) -> QueueMessage {
    QueueMessage {
        message_id: message_id.to_string(),
        receipt_handle: format!("receipt-{message_id}"),
        body: body.to_string(),
        receive_count: 1,
    }
}

/// RGB gradient encoded in `format`.
pub fn encode_fixture(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("fixture image should encode");
    bytes
}

pub fn generous_deadline() -> Deadline {
    Deadline::after(
        Duration::from_secs(60),
        Duration::from_secs(2),
        Duration::from_secs(10),
    )
}

pub fn expired_deadline() -> Deadline {
    Deadline::after(Duration::ZERO, Duration::from_secs(2), Duration::from_secs(10))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
