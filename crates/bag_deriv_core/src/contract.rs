use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::pdf_assembly::{PdfMetadata, PdfSpec};
use crate::rendition::{ImageSpec, OutputFormat};
use crate::storage_keys::{
    bag_derivative_prefix, bag_pdf_object_key, bag_source_object_key, derivative_object_key,
    legacy_derivative_object_key,
};

pub const DEFAULT_BUCKET: &str = "tdp-bagit";
pub const DEFAULT_SCALE: f64 = 0.4;

/// Which queue a message arrived on. Each queue has its own payload schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Derivative,
    Pdf,
}

impl QueueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Derivative => "derivative",
            Self::Pdf => "pdf",
        }
    }

    pub fn function_name(self) -> &'static str {
        match self {
            Self::Derivative => "deriv_generator",
            Self::Pdf => "pdf_generator",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values a payload may omit, taken from the worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadDefaults {
    pub bucket: String,
    pub default_scale: f64,
}

impl Default for PayloadDefaults {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            default_scale: DEFAULT_SCALE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload does not match the {queue} schema: {reason}")]
    Schema { queue: QueueKind, reason: String },
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Derivative queue message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DerivativeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    pub key: String,
    pub spec: ImageSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
}

/// Bag-relative scale as sent by the bag resize route: a number or a numeric
/// string. The original text is kept because it names the derivative folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScaleValue {
    Number(f64),
    Text(String),
}

impl ScaleValue {
    fn resolve(&self) -> Result<(f64, String), PayloadError> {
        match self {
            Self::Number(value) => Ok((*value, value.to_string())),
            Self::Text(text) => {
                let trimmed = text.trim();
                trimmed
                    .parse::<f64>()
                    .map(|value| (value, trimmed.to_string()))
                    .map_err(|_| PayloadError::Invalid(format!("scale '{text}' is not a number")))
            }
        }
    }
}

/// Legacy derivative message: `[bag, scale, image]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyDerivativeRequest(pub String, pub ScaleValue, pub String);

/// PDF queue message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PdfRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    pub pages: Vec<String>,
    pub output_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_order: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

/// Legacy PDF message naming a whole bag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LegacyPdfRequest {
    pub bag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenditionItem {
    pub source_bucket: String,
    pub source_key: String,
    pub target_key: String,
    pub spec: ImageSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSet {
    /// Explicit page keys, in message order.
    Keys(Vec<String>),
    /// Every bag image under a prefix, in key order.
    BagListing { prefix: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfItem {
    pub bucket: String,
    pub pages: PageSet,
    pub target_key: String,
    pub spec: PdfSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Rendition(RenditionItem),
    Pdf(PdfItem),
}

impl WorkItem {
    pub fn target_bucket(&self) -> &str {
        match self {
            Self::Rendition(item) => &item.source_bucket,
            Self::Pdf(item) => &item.bucket,
        }
    }

    pub fn target_key(&self) -> &str {
        match self {
            Self::Rendition(item) => &item.target_key,
            Self::Pdf(item) => &item.target_key,
        }
    }
}

/// Strictly validates a queue body into a work item. Anything short of a
/// complete, well-formed request is rejected; nothing is partially parsed.
pub fn parse_work_item(
    queue: QueueKind,
    body: &str,
    defaults: &PayloadDefaults,
) -> Result<WorkItem, PayloadError> {
    let value: Value =
        serde_json::from_str(body).map_err(|error| PayloadError::Json(error.to_string()))?;

    match queue {
        QueueKind::Derivative => parse_derivative(value, defaults).map(WorkItem::Rendition),
        QueueKind::Pdf => parse_pdf(value, defaults).map(WorkItem::Pdf),
    }
}

fn parse_derivative(value: Value, defaults: &PayloadDefaults) -> Result<RenditionItem, PayloadError> {
    match value {
        Value::Array(_) => {
            let legacy: LegacyDerivativeRequest = from_schema(QueueKind::Derivative, value)?;
            legacy_rendition(legacy, defaults)
        }
        Value::Object(_) => {
            let request: DerivativeRequest = from_schema(QueueKind::Derivative, value)?;
            rendition(request, defaults)
        }
        _ => Err(PayloadError::Schema {
            queue: QueueKind::Derivative,
            reason: "expected a JSON object or a [bag, scale, image] array".to_string(),
        }),
    }
}

fn rendition(request: DerivativeRequest, defaults: &PayloadDefaults) -> Result<RenditionItem, PayloadError> {
    let source_bucket = resolve_bucket(request.bucket, defaults)?;
    let source_key = non_empty("key", request.key)?;

    if request.spec.scale.is_some() && (request.spec.width.is_some() || request.spec.height.is_some()) {
        return Err(PayloadError::Invalid(
            "spec.scale cannot be combined with spec.width or spec.height".to_string(),
        ));
    }

    let target_key = match request.target_key {
        Some(key) => non_empty("target_key", key)?,
        None => derivative_object_key(&source_key, &request.spec),
    };
    if target_key == source_key {
        return Err(PayloadError::Invalid(
            "target key must differ from the source key".to_string(),
        ));
    }

    Ok(RenditionItem {
        source_bucket,
        source_key,
        target_key,
        spec: request.spec,
    })
}

fn legacy_rendition(
    request: LegacyDerivativeRequest,
    defaults: &PayloadDefaults,
) -> Result<RenditionItem, PayloadError> {
    let LegacyDerivativeRequest(bag, scale, image) = request;
    let bag = bag_name(bag)?;
    let image = non_empty("image", image)?;
    let (scale, scale_label) = scale.resolve()?;

    Ok(RenditionItem {
        source_bucket: defaults.bucket.clone(),
        source_key: bag_source_object_key(&bag, &image),
        target_key: legacy_derivative_object_key(&bag, &scale_label, &image),
        spec: ImageSpec::new(OutputFormat::Jpeg).with_scale(scale),
    })
}

fn parse_pdf(value: Value, defaults: &PayloadDefaults) -> Result<PdfItem, PayloadError> {
    let Some(object) = value.as_object() else {
        return Err(PayloadError::Schema {
            queue: QueueKind::Pdf,
            reason: "expected a JSON object".to_string(),
        });
    };

    if object.contains_key("bag") {
        let legacy: LegacyPdfRequest = from_schema(QueueKind::Pdf, value)?;
        let bag = bag_name(legacy.bag)?;
        let scale_label = defaults.default_scale.to_string();
        return Ok(PdfItem {
            bucket: defaults.bucket.clone(),
            pages: PageSet::BagListing {
                prefix: bag_derivative_prefix(&bag, &scale_label),
            },
            target_key: bag_pdf_object_key(&bag),
            spec: PdfSpec {
                page_order: None,
                metadata: PdfMetadata {
                    title: legacy.title,
                    author: legacy.author,
                    subject: legacy.subject,
                    keywords: legacy.keywords,
                },
            },
        });
    }

    let request: PdfRequest = from_schema(QueueKind::Pdf, value)?;
    let bucket = resolve_bucket(request.bucket, defaults)?;
    let target_key = non_empty("output_key", request.output_key)?;
    let pages = request
        .pages
        .into_iter()
        .map(|page| non_empty("pages[]", page))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PdfItem {
        bucket,
        pages: PageSet::Keys(pages),
        target_key,
        spec: PdfSpec {
            page_order: request.page_order,
            metadata: PdfMetadata {
                title: request.title,
                author: request.author,
                subject: request.subject,
                keywords: request.keywords,
            },
        },
    })
}

fn from_schema<T: serde::de::DeserializeOwned>(queue: QueueKind, value: Value) -> Result<T, PayloadError> {
    serde_json::from_value(value).map_err(|error| PayloadError::Schema {
        queue,
        reason: error.to_string(),
    })
}

fn resolve_bucket(bucket: Option<String>, defaults: &PayloadDefaults) -> Result<String, PayloadError> {
    match bucket {
        Some(bucket) => non_empty("bucket", bucket),
        None => Ok(defaults.bucket.clone()),
    }
}

fn non_empty(field: &str, value: String) -> Result<String, PayloadError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PayloadError::Invalid(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn bag_name(bag: String) -> Result<String, PayloadError> {
    let bag = non_empty("bag", bag)?;
    if bag.contains('/') {
        return Err(PayloadError::Invalid(format!(
            "bag '{bag}' must not contain '/'"
        )));
    }
    Ok(bag)
}

/// Stable identifier for a payload, used to correlate failure records.
pub fn payload_fingerprint(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}
