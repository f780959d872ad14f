//! Worker configuration, read once from `BAG_DERIV_*` environment variables.

use std::time::Duration;

use bag_deriv_core::contract::{PayloadDefaults, QueueKind, DEFAULT_BUCKET, DEFAULT_SCALE};
use bag_deriv_core::pdf_assembly::{AssembleSettings, DEFAULT_PAGE_QUALITY};
use bag_deriv_core::rendition::{RenderSettings, DEFAULT_JPEG_QUALITY};
use serde::Deserialize;
use thiserror::Error;

use crate::deadline::DeadlinePolicy;
use crate::handlers::consumer::ConsumerSettings;
use crate::handlers::work_item::ProcessorSettings;

pub const ENV_PREFIX: &str = "BAG_DERIV_";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read {ENV_PREFIX}* environment: {0}")]
    Env(String),
    #[error("invalid {ENV_PREFIX}{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("no queue url configured for the {0} queue")]
    MissingQueueUrl(QueueKind),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub deriv_queue_url: Option<String>,
    #[serde(default)]
    pub pdf_queue_url: Option<String>,
    #[serde(default = "default_scale")]
    pub default_scale: f64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_pdf_page_quality")]
    pub pdf_page_quality: u8,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_store_call_timeout_ms")]
    pub store_call_timeout_ms: u64,
    #[serde(default = "default_deadline_safety_margin_ms")]
    pub deadline_safety_margin_ms: u64,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,
    #[serde(default = "default_memory_buffer_ratio")]
    pub memory_buffer_ratio: f64,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    #[serde(default)]
    pub failure_record_prefix: Option<String>,
    #[serde(default = "default_queue_kind")]
    pub queue_kind: QueueKind,
    #[serde(default = "default_poll_max_messages")]
    pub poll_max_messages: u32,
    #[serde(default = "default_poll_wait_seconds")]
    pub poll_wait_seconds: u64,
    #[serde(default = "default_poll_batch_deadline_ms")]
    pub poll_batch_deadline_ms: u64,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_scale() -> f64 {
    DEFAULT_SCALE
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_pdf_page_quality() -> u8 {
    DEFAULT_PAGE_QUALITY
}

fn default_max_concurrency() -> usize {
    4
}

fn default_store_call_timeout_ms() -> u64 {
    10_000
}

fn default_deadline_safety_margin_ms() -> u64 {
    2_000
}

fn default_memory_limit_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_memory_buffer_ratio() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_queue_kind() -> QueueKind {
    QueueKind::Derivative
}

fn default_poll_max_messages() -> u32 {
    10
}

fn default_poll_wait_seconds() -> u64 {
    20
}

fn default_poll_batch_deadline_ms() -> u64 {
    300_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            deriv_queue_url: None,
            pdf_queue_url: None,
            default_scale: default_scale(),
            jpeg_quality: default_jpeg_quality(),
            pdf_page_quality: default_pdf_page_quality(),
            max_concurrency: default_max_concurrency(),
            store_call_timeout_ms: default_store_call_timeout_ms(),
            deadline_safety_margin_ms: default_deadline_safety_margin_ms(),
            memory_limit_bytes: default_memory_limit_bytes(),
            memory_buffer_ratio: default_memory_buffer_ratio(),
            skip_existing: default_true(),
            failure_record_prefix: None,
            queue_kind: default_queue_kind(),
            poll_max_messages: default_poll_max_messages(),
            poll_wait_seconds: default_poll_wait_seconds(),
            poll_batch_deadline_ms: default_poll_batch_deadline_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .map_err(|error| ConfigError::Env(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Self>(vars)
            .map_err(|error| ConfigError::Env(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(invalid("BUCKET", "must not be empty"));
        }
        if !(self.default_scale.is_finite() && self.default_scale > 0.0) {
            return Err(invalid("DEFAULT_SCALE", "must be a positive number"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(invalid("JPEG_QUALITY", "must be within 1..=100"));
        }
        if !(1..=100).contains(&self.pdf_page_quality) {
            return Err(invalid("PDF_PAGE_QUALITY", "must be within 1..=100"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("MAX_CONCURRENCY", "must be at least 1"));
        }
        if self.store_call_timeout_ms == 0 {
            return Err(invalid("STORE_CALL_TIMEOUT_MS", "must be positive"));
        }
        if self.deadline_safety_margin_ms == 0 {
            return Err(invalid("DEADLINE_SAFETY_MARGIN_MS", "must be positive"));
        }
        if self.memory_limit_bytes == 0 {
            return Err(invalid("MEMORY_LIMIT_BYTES", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.memory_buffer_ratio) {
            return Err(invalid("MEMORY_BUFFER_RATIO", "must be within [0, 1)"));
        }
        if !(1..=10).contains(&self.poll_max_messages) {
            return Err(invalid("POLL_MAX_MESSAGES", "must be within 1..=10"));
        }
        if self.poll_wait_seconds > 20 {
            return Err(invalid("POLL_WAIT_SECONDS", "must be at most 20"));
        }
        if self.poll_batch_deadline_ms <= self.deadline_safety_margin_ms {
            return Err(invalid(
                "POLL_BATCH_DEADLINE_MS",
                "must exceed the deadline safety margin",
            ));
        }
        if matches!(&self.failure_record_prefix, Some(prefix) if prefix.trim_matches('/').is_empty()) {
            return Err(invalid("FAILURE_RECORD_PREFIX", "must not be empty when set"));
        }
        Ok(())
    }

    pub fn queue_url(&self, queue: QueueKind) -> Result<&str, ConfigError> {
        let url = match queue {
            QueueKind::Derivative => self.deriv_queue_url.as_deref(),
            QueueKind::Pdf => self.pdf_queue_url.as_deref(),
        };
        url.filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingQueueUrl(queue))
    }

    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_millis(self.store_call_timeout_ms)
    }

    pub fn deadline_safety_margin(&self) -> Duration {
        Duration::from_millis(self.deadline_safety_margin_ms)
    }

    pub fn deadline_policy(&self) -> DeadlinePolicy {
        DeadlinePolicy {
            safety_margin: self.deadline_safety_margin(),
            store_call_timeout: self.store_call_timeout(),
        }
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_seconds)
    }

    pub fn poll_batch_deadline(&self) -> Duration {
        Duration::from_millis(self.poll_batch_deadline_ms)
    }

    /// Bytes a single item may hold in memory while decoding.
    pub fn decode_budget_bytes(&self) -> u64 {
        (self.memory_limit_bytes as f64 * (1.0 - self.memory_buffer_ratio)) as u64
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            payload_defaults: PayloadDefaults {
                bucket: self.bucket.clone(),
                default_scale: self.default_scale,
            },
            render: RenderSettings {
                default_jpeg_quality: self.jpeg_quality,
                max_alloc_bytes: Some(self.decode_budget_bytes()),
            },
            assemble: AssembleSettings {
                page_quality: self.pdf_page_quality,
                max_alloc_bytes: Some(self.decode_budget_bytes()),
            },
            skip_existing: self.skip_existing,
            memory_limit_bytes: self.memory_limit_bytes,
            memory_buffer_ratio: self.memory_buffer_ratio,
        }
    }

    pub fn consumer_settings(&self, queue: QueueKind) -> ConsumerSettings {
        ConsumerSettings {
            queue,
            max_concurrency: self.max_concurrency,
            failure_record_bucket: self.bucket.clone(),
            failure_record_prefix: self.failure_record_prefix.clone(),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| (format!("{ENV_PREFIX}{key}"), value.to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = WorkerConfig::from_vars(Vec::new()).expect("defaults should validate");
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.bucket, "tdp-bagit");
        assert_eq!(config.default_scale, 0.4);
        assert_eq!(config.memory_limit_bytes, 2_147_483_648);
        assert!(config.skip_existing);
        assert_eq!(config.queue_kind, QueueKind::Derivative);
    }

    #[test]
    fn reads_prefixed_variables() {
        let config = WorkerConfig::from_vars(vars(&[
            ("BUCKET", "ul-bagit"),
            ("PDF_QUEUE_URL", "https://sqs.example/pdf"),
            ("MAX_CONCURRENCY", "8"),
            ("SKIP_EXISTING", "false"),
            ("QUEUE_KIND", "pdf"),
            ("FAILURE_RECORD_PREFIX", "pipeline/failures"),
        ]))
        .expect("config should parse");

        assert_eq!(config.bucket, "ul-bagit");
        assert_eq!(config.max_concurrency, 8);
        assert!(!config.skip_existing);
        assert_eq!(config.queue_kind, QueueKind::Pdf);
        assert_eq!(
            config.queue_url(QueueKind::Pdf).expect("pdf queue url"),
            "https://sqs.example/pdf"
        );
        assert_eq!(
            config.queue_url(QueueKind::Derivative),
            Err(ConfigError::MissingQueueUrl(QueueKind::Derivative))
        );
        assert_eq!(
            config.failure_record_prefix.as_deref(),
            Some("pipeline/failures")
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        for (key, value) in [
            ("JPEG_QUALITY", "0"),
            ("MAX_CONCURRENCY", "0"),
            ("MEMORY_BUFFER_RATIO", "1.0"),
            ("DEFAULT_SCALE", "-0.4"),
            ("POLL_MAX_MESSAGES", "11"),
            ("DEADLINE_SAFETY_MARGIN_MS", "0"),
        ] {
            let error = WorkerConfig::from_vars(vars(&[(key, value)]))
                .expect_err("invalid value should be rejected");
            assert!(
                matches!(error, ConfigError::Invalid { .. }),
                "{key}={value} gave {error:?}"
            );
        }
    }

    #[test]
    fn rejects_unparseable_values() {
        let error = WorkerConfig::from_vars(vars(&[("MAX_CONCURRENCY", "many")]))
            .expect_err("non numeric concurrency should fail");
        assert!(matches!(error, ConfigError::Env(_)));
    }

    #[test]
    fn processor_settings_carry_decode_budget() {
        let config = WorkerConfig {
            memory_limit_bytes: 1024,
            memory_buffer_ratio: 0.25,
            ..WorkerConfig::default()
        };
        let settings = config.processor_settings();
        assert_eq!(settings.render.max_alloc_bytes, Some(768));
        assert_eq!(settings.assemble.max_alloc_bytes, Some(768));
        assert_eq!(settings.assemble.page_quality, 90);
        assert_eq!(settings.render.default_jpeg_quality, 75);
    }
}
