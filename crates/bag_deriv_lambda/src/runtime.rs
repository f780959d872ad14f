//! Process entry points: AWS wiring for the Lambda functions and the
//! long-running poll worker.

use std::sync::Arc;
use std::time::Duration;

use bag_deriv_core::contract::QueueKind;
use lambda_runtime::{service_fn, Error};
use tokio::runtime::Handle;

use crate::adapters::s3::S3ObjectStore;
use crate::adapters::sqs::SqsQueue;
use crate::config::WorkerConfig;
use crate::handlers::consumer::{BatchReport, ConsumerError, QueueConsumer};
use crate::handlers::sqs_event::handle_sqs_event;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

type AwsConsumer = QueueConsumer<S3ObjectStore, SqsQueue>;

async fn aws_consumer(config: &WorkerConfig, queue: QueueKind) -> Result<AwsConsumer, Error> {
    let queue_url = config.queue_url(queue)?.to_string();
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let runtime = Handle::current();

    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config), runtime.clone());
    let sqs = SqsQueue::new(
        aws_sdk_sqs::Client::new(&aws_config),
        queue_url,
        runtime,
        config.store_call_timeout(),
    );

    let consumer = QueueConsumer::new(
        store,
        sqs,
        config.processor_settings(),
        config.consumer_settings(queue),
    )?;
    tracing::info!(
        component = "runtime",
        event = "consumer_ready",
        queue = %queue,
        function = queue.function_name(),
        queue_url = consumer.queue().queue_url(),
        bucket = %config.bucket,
        max_concurrency = config.max_concurrency,
    );
    Ok(consumer)
}

/// Serves SQS batches for one queue until the Lambda runtime shuts down.
pub async fn run_lambda(queue: QueueKind) -> Result<(), Error> {
    let config = WorkerConfig::from_env()?;
    let consumer = Arc::new(aws_consumer(&config, queue).await?);
    let policy = config.deadline_policy();

    lambda_runtime::run(service_fn(move |event| {
        let consumer = Arc::clone(&consumer);
        async move { handle_sqs_event(consumer, policy, event).await }
    }))
    .await
}

/// Long-polls the configured queue until Ctrl-C. The batch in flight when the
/// signal arrives is finished before returning.
pub async fn run_worker() -> Result<(), Error> {
    let config = WorkerConfig::from_env()?;
    let queue = config.queue_kind;
    let consumer = Arc::new(aws_consumer(&config, queue).await?);
    let policy = config.deadline_policy();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let batch_consumer = Arc::clone(&consumer);
        let max_messages = config.poll_max_messages;
        let wait = config.poll_wait();
        let budget = config.poll_batch_deadline();
        let mut batch = tokio::task::spawn_blocking(move || {
            let deadline = policy.deadline_after(budget);
            batch_consumer.poll_once(max_messages, wait, &deadline)
        });

        tokio::select! {
            joined = &mut batch => {
                let polled = joined.map_err(|error| Error::from(format!("poll worker did not complete: {error}")))?;
                if !log_poll(queue, polled) {
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
            _ = &mut shutdown => {
                tracing::info!(
                    component = "runtime",
                    event = "shutdown_requested",
                    queue = %queue,
                    "finishing in-flight batch"
                );
                let polled = batch
                    .await
                    .map_err(|error| Error::from(format!("poll worker did not complete: {error}")))?;
                log_poll(queue, polled);
                break;
            }
        }
    }

    tracing::info!(component = "runtime", event = "worker_stopped", queue = %queue);
    Ok(())
}

fn log_poll(queue: QueueKind, polled: Result<BatchReport, ConsumerError>) -> bool {
    match polled {
        Ok(report) => {
            tracing::debug!(
                component = "runtime",
                event = "poll_completed",
                queue = %queue,
                messages = report.messages.len(),
            );
            true
        }
        Err(error) => {
            tracing::warn!(
                component = "runtime",
                event = "poll_failed",
                queue = %queue,
                error = %error,
            );
            false
        }
    }
}
