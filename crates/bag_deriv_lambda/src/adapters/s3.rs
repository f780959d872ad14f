use std::future::Future;
use std::time::Duration;

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use tokio::runtime::Handle;

use crate::adapters::object_store::{ObjectStore, ObjectSummary, StoreError};

/// S3-backed store. Calls are driven on `runtime` from blocking worker threads.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    runtime: Handle,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, runtime: Handle) -> Self {
        Self { client, runtime }
    }

    fn block_on<T>(
        &self,
        timeout: Duration,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        self.runtime.block_on(async move {
            tokio::time::timeout(timeout, call)
                .await
                .unwrap_or_else(|_| Err(StoreError::Timeout(timeout)))
        })
    }
}

impl ObjectStore for S3ObjectStore {
    fn get_object(&self, bucket: &str, key: &str, timeout: Duration) -> Result<Vec<u8>, StoreError> {
        let request = self.client.get_object().bucket(bucket).key(key);
        self.block_on(timeout, async move {
            let output = request
                .send()
                .await
                .map_err(|error| store_error(error, bucket, key))?;
            let body = output.body.collect().await.map_err(|error| {
                StoreError::Unavailable(format!("failed to read s3://{bucket}/{key}: {error}"))
            })?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body.to_vec()));
        self.block_on(timeout, async move {
            request
                .send()
                .await
                .map(|_| ())
                .map_err(|error| store_error(error, bucket, key))
        })
    }

    fn object_exists(&self, bucket: &str, key: &str, timeout: Duration) -> Result<bool, StoreError> {
        let request = self.client.head_object().bucket(bucket).key(key);
        self.block_on(timeout, async move {
            match request.send().await {
                Ok(_) => Ok(true),
                Err(error) => match store_error(error, bucket, key) {
                    StoreError::NotFound { .. } => Ok(false),
                    other => Err(other),
                },
            }
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        let client = self.client.clone();
        self.block_on(timeout, async move {
            let mut summaries = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let output = client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation_token.take())
                    .send()
                    .await
                    .map_err(|error| store_error(error, bucket, prefix))?;

                summaries.extend(output.contents().iter().filter_map(|object| {
                    Some(ObjectSummary {
                        key: object.key()?.to_string(),
                        size: u64::try_from(object.size().unwrap_or(0)).unwrap_or(0),
                    })
                }));

                match output.next_continuation_token() {
                    Some(token) if output.is_truncated().unwrap_or(false) => {
                        continuation_token = Some(token.to_string());
                    }
                    _ => break,
                }
            }
            summaries.sort_by(|left, right| left.key.cmp(&right.key));
            Ok(summaries)
        })
    }
}

fn store_error<E>(error: SdkError<E, HttpResponse>, bucket: &str, key: &str) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = error.raw_response().map(|response| response.status().as_u16());
    match (status, error.code()) {
        (Some(404), _) | (_, Some("NoSuchKey" | "NotFound" | "NoSuchBucket")) => StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        (Some(403), _) | (_, Some("AccessDenied")) => StoreError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => StoreError::Unavailable(DisplayErrorContext(&error).to_string()),
    }
}
