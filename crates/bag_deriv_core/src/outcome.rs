use serde::{Deserialize, Serialize};

/// Why a work item did not produce its derivative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BadPayload,
    SourceMissing,
    UnprocessableInput,
    StoreUnavailable,
    ResourceExhausted,
    DeadlineExceeded,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadPayload => "bad_payload",
            Self::SourceMissing => "source_missing",
            Self::UnprocessableInput => "unprocessable_input",
            Self::StoreUnavailable => "store_unavailable",
            Self::ResourceExhausted => "resource_exhausted",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    /// Retryable kinds leave the message on the queue for redelivery; the
    /// rest describe input that will never succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable | Self::ResourceExhausted | Self::DeadlineExceeded
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing states of one message. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Parsing,
    Fetching,
    Transforming,
    Writing,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Parsing => "parsing",
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Writing => "writing",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub stage: Stage,
    pub detail: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} during {}: {}", self.kind, self.stage, self.detail)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingResult {
    Success { target_key: String },
    RetryableFailure { reason: Failure },
    FatalFailure { reason: Failure },
}

impl ProcessingResult {
    pub fn success(target_key: impl Into<String>) -> Self {
        Self::Success {
            target_key: target_key.into(),
        }
    }

    /// Builds the failed outcome, picking the variant from the kind so that
    /// classification lives in exactly one place.
    pub fn failed(kind: FailureKind, stage: Stage, detail: impl Into<String>) -> Self {
        let reason = Failure {
            kind,
            stage,
            detail: detail.into(),
        };
        if kind.is_retryable() {
            Self::RetryableFailure { reason }
        } else {
            Self::FatalFailure { reason }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalFailure { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableFailure { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success { .. } => None,
            Self::RetryableFailure { reason } | Self::FatalFailure { reason } => Some(reason),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|failure| failure.kind)
    }

    pub fn target_key(&self) -> Option<&str> {
        match self {
            Self::Success { target_key } => Some(target_key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_are_not_retried() {
        for kind in [
            FailureKind::BadPayload,
            FailureKind::SourceMissing,
            FailureKind::UnprocessableInput,
        ] {
            assert!(ProcessingResult::failed(kind, Stage::Parsing, "x").is_fatal());
        }
    }

    #[test]
    fn transient_kinds_are_retried() {
        for kind in [
            FailureKind::StoreUnavailable,
            FailureKind::ResourceExhausted,
            FailureKind::DeadlineExceeded,
        ] {
            assert!(ProcessingResult::failed(kind, Stage::Writing, "x").is_retryable());
        }
    }

    #[test]
    fn stages_are_ordered_along_the_pipeline() {
        assert!(Stage::Received < Stage::Parsing);
        assert!(Stage::Parsing < Stage::Fetching);
        assert!(Stage::Fetching < Stage::Transforming);
        assert!(Stage::Transforming < Stage::Writing);
        assert!(Stage::Writing < Stage::Done);
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let value = serde_json::to_value(ProcessingResult::failed(
            FailureKind::SourceMissing,
            Stage::Fetching,
            "no such key",
        ))
        .expect("result should serialize");

        assert_eq!(value["status"], "fatal_failure");
        assert_eq!(value["reason"]["kind"], "source_missing");
        assert_eq!(value["reason"]["stage"], "fetching");
    }
}
