use std::time::{Duration, Instant};

use bag_deriv_core::contract::{
    parse_work_item, PageSet, PayloadDefaults, PdfItem, QueueKind, RenditionItem, WorkItem,
};
use bag_deriv_core::outcome::{Failure, FailureKind, ProcessingResult, Stage};
use bag_deriv_core::pdf_assembly::{
    assemble, exceeds_memory_budget, ordered_pages, AssembleSettings, PageSource, PdfSpec,
};
use bag_deriv_core::rendition::{render, RenderSettings};
use bag_deriv_core::storage_keys::is_bag_page_image;

use crate::adapters::object_store::{ObjectStore, StoreError};
use crate::deadline::Deadline;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub payload_defaults: PayloadDefaults,
    pub render: RenderSettings,
    pub assemble: AssembleSettings,
    /// Treat an existing target object as already processed.
    pub skip_existing: bool,
    pub memory_limit_bytes: u64,
    pub memory_buffer_ratio: f64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        crate::config::WorkerConfig::default().processor_settings()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Written {
    Stored,
    AlreadyPresent,
}

/// Runs one message through parse, fetch, transform and write. Never panics
/// on bad input; every failure is classified into the returned result.
pub fn process_message(
    queue: QueueKind,
    body: &str,
    settings: &ProcessorSettings,
    deadline: &Deadline,
    store: &impl ObjectStore,
) -> ProcessingResult {
    let started_at = Instant::now();

    let item = match parse_work_item(queue, body, &settings.payload_defaults) {
        Ok(item) => item,
        Err(error) => {
            return ProcessingResult::failed(FailureKind::BadPayload, Stage::Parsing, error.to_string())
        }
    };

    let outcome = match &item {
        WorkItem::Rendition(rendition) => process_rendition(rendition, settings, deadline, store),
        WorkItem::Pdf(pdf) => process_pdf(pdf, settings, deadline, store),
    };

    match outcome {
        Ok(written) => {
            tracing::info!(
                component = "work_item_processor",
                event = match written {
                    Written::Stored => "derivative_written",
                    Written::AlreadyPresent => "derivative_already_present",
                },
                queue = %queue,
                bucket = item.target_bucket(),
                target_key = item.target_key(),
                duration_ms = started_at.elapsed().as_millis() as u64,
            );
            ProcessingResult::success(item.target_key())
        }
        Err(failure) => ProcessingResult::failed(failure.kind, failure.stage, failure.detail),
    }
}

fn process_rendition(
    item: &RenditionItem,
    settings: &ProcessorSettings,
    deadline: &Deadline,
    store: &impl ObjectStore,
) -> Result<Written, Failure> {
    if target_exists(store, &item.source_bucket, &item.target_key, settings, deadline)? {
        return Ok(Written::AlreadyPresent);
    }

    let timeout = call_budget(deadline, Stage::Fetching)?;
    let source = store
        .get_object(&item.source_bucket, &item.source_key, timeout)
        .map_err(|error| fetch_failure(error, deadline))?;

    call_budget(deadline, Stage::Transforming)?;
    let rendition = render(&source, &item.spec, &settings.render).map_err(|error| Failure {
        kind: error.failure_kind(),
        stage: Stage::Transforming,
        detail: format!("{}: {error}", item.source_key),
    })?;
    tracing::debug!(
        component = "work_item_processor",
        event = "rendition_ready",
        source_key = %item.source_key,
        width = rendition.width,
        height = rendition.height,
        size = rendition.bytes.len(),
    );

    let timeout = call_budget(deadline, Stage::Writing)?;
    store
        .put_object(
            &item.source_bucket,
            &item.target_key,
            &rendition.bytes,
            rendition.format.content_type(),
            timeout,
        )
        .map_err(|error| write_failure(error, deadline))?;

    Ok(Written::Stored)
}

fn process_pdf(
    item: &PdfItem,
    settings: &ProcessorSettings,
    deadline: &Deadline,
    store: &impl ObjectStore,
) -> Result<Written, Failure> {
    // An explicit page set is validated before the target is looked up, so an
    // invalid message fails even when the output already exists.
    let explicit = match &item.pages {
        PageSet::Keys(keys) => Some(select_pages(keys, &item.spec, Stage::Parsing)?),
        PageSet::BagListing { .. } => None,
    };

    if target_exists(store, &item.bucket, &item.target_key, settings, deadline)? {
        return Ok(Written::AlreadyPresent);
    }

    let keys = match (explicit, &item.pages) {
        (Some(keys), _) => keys,
        (None, PageSet::BagListing { prefix }) => {
            let listed = list_bag_pages(item, prefix, settings, deadline, store)?;
            select_pages(&listed, &item.spec, Stage::Fetching)?
        }
        (None, PageSet::Keys(keys)) => select_pages(keys, &item.spec, Stage::Parsing)?,
    };
    let pages = fetch_pages(&item.bucket, keys, settings, deadline, store)?;

    // Pages are already fetched in their final order.
    let spec = PdfSpec {
        page_order: None,
        metadata: item.spec.metadata.clone(),
    };
    call_budget(deadline, Stage::Transforming)?;
    let pdf = assemble(&pages, &spec, &settings.assemble).map_err(|error| Failure {
        kind: error.failure_kind(),
        stage: Stage::Transforming,
        detail: error.to_string(),
    })?;
    tracing::debug!(
        component = "work_item_processor",
        event = "pdf_ready",
        page_count = pdf.page_count,
        size = pdf.bytes.len(),
    );

    let timeout = call_budget(deadline, Stage::Writing)?;
    store
        .put_object(&item.bucket, &item.target_key, &pdf.bytes, PDF_CONTENT_TYPE, timeout)
        .map_err(|error| write_failure(error, deadline))?;

    Ok(Written::Stored)
}

/// Keys selected by `page_order`, in document order.
fn select_pages(keys: &[String], spec: &PdfSpec, stage: Stage) -> Result<Vec<String>, Failure> {
    ordered_pages(keys, spec.page_order.as_deref())
        .map(|selected| selected.into_iter().cloned().collect())
        .map_err(|error| failure(error.failure_kind(), stage, error.to_string()))
}

fn fetch_pages(
    bucket: &str,
    keys: Vec<String>,
    settings: &ProcessorSettings,
    deadline: &Deadline,
    store: &impl ObjectStore,
) -> Result<Vec<PageSource>, Failure> {
    let mut pages = Vec::with_capacity(keys.len());
    let mut total_bytes = 0u64;
    for key in keys {
        let timeout = call_budget(deadline, Stage::Fetching)?;
        let bytes = match store.get_object(bucket, &key, timeout) {
            Ok(bytes) => bytes,
            Err(error @ StoreError::NotFound { .. }) => {
                return Err(failure(
                    FailureKind::UnprocessableInput,
                    Stage::Fetching,
                    format!("missing page: {error}"),
                ))
            }
            Err(error) => return Err(fetch_failure(error, deadline)),
        };

        total_bytes += bytes.len() as u64;
        check_memory_budget(total_bytes, settings)?;
        pages.push(PageSource { key, bytes });
    }
    Ok(pages)
}

fn list_bag_pages(
    item: &PdfItem,
    prefix: &str,
    settings: &ProcessorSettings,
    deadline: &Deadline,
    store: &impl ObjectStore,
) -> Result<Vec<String>, Failure> {
    let timeout = call_budget(deadline, Stage::Fetching)?;
    let mut listed: Vec<_> = store
        .list_objects(&item.bucket, prefix, timeout)
        .map_err(|error| fetch_failure(error, deadline))?
        .into_iter()
        .filter(|object| is_bag_page_image(&object.key))
        .collect();
    listed.sort_by(|left, right| left.key.cmp(&right.key));

    if listed.is_empty() {
        return Err(failure(
            FailureKind::UnprocessableInput,
            Stage::Fetching,
            format!("no page images under s3://{}/{prefix}", item.bucket),
        ));
    }

    // Reject oversized bags before downloading anything.
    check_memory_budget(listed.iter().map(|object| object.size).sum(), settings)?;
    Ok(listed.into_iter().map(|object| object.key).collect())
}

fn target_exists(
    store: &impl ObjectStore,
    bucket: &str,
    key: &str,
    settings: &ProcessorSettings,
    deadline: &Deadline,
) -> Result<bool, Failure> {
    if !settings.skip_existing {
        return Ok(false);
    }

    let timeout = call_budget(deadline, Stage::Fetching)?;
    match store.object_exists(bucket, key, timeout) {
        Ok(exists) => Ok(exists),
        // S3 answers 403 for a missing key when listing is not granted.
        Err(StoreError::AccessDenied { .. }) => Ok(false),
        Err(error) => Err(fetch_failure(error, deadline)),
    }
}

fn check_memory_budget(total_bytes: u64, settings: &ProcessorSettings) -> Result<(), Failure> {
    if exceeds_memory_budget(
        total_bytes,
        settings.memory_limit_bytes,
        settings.memory_buffer_ratio,
    ) {
        return Err(failure(
            FailureKind::ResourceExhausted,
            Stage::Fetching,
            format!(
                "page set of {total_bytes} bytes exceeds the {} byte memory limit with a {} buffer",
                settings.memory_limit_bytes, settings.memory_buffer_ratio
            ),
        ));
    }
    Ok(())
}

fn call_budget(deadline: &Deadline, stage: Stage) -> Result<Duration, Failure> {
    deadline.call_timeout().ok_or_else(|| {
        failure(
            FailureKind::DeadlineExceeded,
            stage,
            format!(
                "invocation deadline is imminent ({}ms left)",
                deadline.remaining().as_millis()
            ),
        )
    })
}

fn fetch_failure(error: StoreError, deadline: &Deadline) -> Failure {
    let kind = match &error {
        StoreError::NotFound { .. } | StoreError::AccessDenied { .. } => FailureKind::SourceMissing,
        StoreError::Timeout(_) if deadline.is_imminent() => FailureKind::DeadlineExceeded,
        StoreError::Timeout(_) | StoreError::Unavailable(_) => FailureKind::StoreUnavailable,
    };
    failure(kind, Stage::Fetching, error.to_string())
}

fn write_failure(error: StoreError, deadline: &Deadline) -> Failure {
    let kind = match &error {
        StoreError::Timeout(_) if deadline.is_imminent() => FailureKind::DeadlineExceeded,
        _ => FailureKind::StoreUnavailable,
    };
    failure(kind, Stage::Writing, error.to_string())
}

fn failure(kind: FailureKind, stage: Stage, detail: impl Into<String>) -> Failure {
    Failure {
        kind,
        stage,
        detail: detail.into(),
    }
}
