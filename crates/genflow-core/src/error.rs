//! Error taxonomy for flow execution.
//!
//! `FlowError` is what every executor, fan-out and composite operation
//! returns. Each layer wraps the original error with its own context (flow
//! name, fan-out index, sub-task name) instead of flattening it to a message,
//! so [`FlowError::kind`] always reports where the failure really came from
//! and [`FlowError::envelope`] can render it for callers.
//!
//! When the `axum` feature is enabled, `FlowError` also implements
//! `IntoResponse` so HTTP adapters can return it directly.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::BackendError;
use crate::schema::ValidationError;

/// The caller-visible failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "InputValidationError")]
    InputValidation,
    #[serde(rename = "BackendInvocationError")]
    BackendInvocation,
    #[serde(rename = "EmptyResultError")]
    EmptyResult,
    #[serde(rename = "OutputShapeError")]
    OutputShape,
    #[serde(rename = "AggregateError")]
    Aggregate,
    #[serde(rename = "CompositeError")]
    Composite,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputValidation => "InputValidationError",
            ErrorKind::BackendInvocation => "BackendInvocationError",
            ErrorKind::EmptyResult => "EmptyResultError",
            ErrorKind::OutputShape => "OutputShapeError",
            ErrorKind::Aggregate => "AggregateError",
            ErrorKind::Composite => "CompositeError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    #[error("invalid input for '{flow}': {source}")]
    InputValidation {
        flow: String,
        #[source]
        source: ValidationError,
    },

    #[error("backend call for '{flow}' failed: {source}")]
    BackendInvocation {
        flow: String,
        #[source]
        source: BackendError,
    },

    #[error("backend returned no usable result for '{flow}'")]
    EmptyResult { flow: String },

    #[error("output of '{flow}' does not match its declared shape: {source}")]
    OutputShape {
        flow: String,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Composite(#[from] CompositeError),
}

/// One failed member of a fan-out.
#[derive(Debug, Clone)]
pub struct MemberFailure {
    pub index: usize,
    pub error: FlowError,
}

/// A fan-out where at least one member failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "fan-out of '{flow}' failed: {} of {required} invocation(s) failed{}",
    .failures.len(),
    describe_failures(.failures)
)]
pub struct AggregateError {
    pub flow: String,
    /// Number of results the job had to produce
    pub required: usize,
    /// Failed members, ordered by index
    pub failures: Vec<MemberFailure>,
    /// Members aborted before finishing (fail-fast policy only)
    pub cancelled: Vec<usize>,
}

fn describe_failures(failures: &[MemberFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("; [{}] {}", f.index, f.error))
        .collect()
}

impl AggregateError {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

/// A required sub-task of a composite operation failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("sub-task '{task}' of '{operation}' failed: {source}")]
pub struct CompositeError {
    pub operation: String,
    pub task: String,
    #[source]
    pub source: Box<FlowError>,
}

/// Caller-facing failure envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::InputValidation { .. } => ErrorKind::InputValidation,
            FlowError::BackendInvocation { .. } => ErrorKind::BackendInvocation,
            FlowError::EmptyResult { .. } => ErrorKind::EmptyResult,
            FlowError::OutputShape { .. } => ErrorKind::OutputShape,
            FlowError::Aggregate(_) => ErrorKind::Aggregate,
            FlowError::Composite(_) => ErrorKind::Composite,
        }
    }

    /// Input-validation error with a single violation.
    pub fn invalid_input(flow: &str, path: &str, reason: impl Into<String>) -> Self {
        FlowError::InputValidation {
            flow: flow.to_string(),
            source: ValidationError::single(path, reason),
        }
    }

    /// Whether a caller-level retry could help.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::BackendInvocation { .. } | FlowError::EmptyResult { .. } => true,
            FlowError::Aggregate(agg) => agg.failures.iter().all(|f| f.error.is_retryable()),
            _ => false,
        }
    }

    /// Innermost error, following composite wrappers.
    pub fn root_cause(&self) -> &FlowError {
        match self {
            FlowError::Composite(c) => c.source.root_cause(),
            other => other,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            FlowError::InputValidation { source, .. } | FlowError::OutputShape { source, .. } => {
                Some(json!({ "violations": source.violations }))
            }
            FlowError::BackendInvocation { source, .. } => Some(json!({
                "reason": backend_reason(source)
            })),
            FlowError::EmptyResult { .. } => None,
            FlowError::Aggregate(agg) => Some(json!({
                "required": agg.required,
                "failedIndices": agg.failed_indices(),
                "failures": agg
                    .failures
                    .iter()
                    .map(|f| json!({
                        "index": f.index,
                        "kind": f.error.kind(),
                        "message": f.error.to_string(),
                    }))
                    .collect::<Vec<_>>(),
                "cancelledIndices": agg.cancelled,
            })),
            FlowError::Composite(c) => Some(json!({
                "task": c.task,
                "cause": c.source.envelope(),
            })),
        };

        ErrorEnvelope {
            kind: self.kind(),
            message: self.to_string(),
            details,
        }
    }

    /// Transport status an HTTP adapter should use.
    pub fn http_status(&self) -> u16 {
        match self {
            FlowError::InputValidation { .. } => 400,
            FlowError::BackendInvocation { source, .. } => match source {
                BackendError::Quota(_) => 429,
                BackendError::Timeout(_) => 504,
                _ => 502,
            },
            FlowError::EmptyResult { .. } | FlowError::OutputShape { .. } => 502,
            FlowError::Aggregate(_) => 502,
            FlowError::Composite(c) => c.source.http_status(),
        }
    }
}

fn backend_reason(error: &BackendError) -> &'static str {
    match error {
        BackendError::Timeout(_) => "timeout",
        BackendError::Transport(_) => "transport",
        BackendError::Quota(_) => "quota",
        BackendError::Upstream { .. } => "upstream",
        BackendError::Malformed(_) => "malformed",
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for FlowError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self.envelope())).into_response()
    }
}
