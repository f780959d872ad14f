use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },
    #[error("access to s3://{bucket}/{key} was denied")]
    AccessDenied { bucket: String, key: String },
    #[error("object store call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// Blocking object store gateway. Every call is bounded by the given timeout.
pub trait ObjectStore {
    fn get_object(&self, bucket: &str, key: &str, timeout: Duration) -> Result<Vec<u8>, StoreError>;

    /// Whole-object put; readers never observe a partial body.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
        timeout: Duration,
    ) -> Result<(), StoreError>;

    fn object_exists(&self, bucket: &str, key: &str, timeout: Duration) -> Result<bool, StoreError>;

    /// All objects under `prefix`, in key order.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Vec<ObjectSummary>, StoreError>;
}
