//! Typed error kinds for the tool-dispatch boundary.
//!
//! Internal code keeps using `anyhow::Result` (store calls, HTTP calls,
//! file I/O) the way the rest of this crate always has. `PipelineError`
//! exists only at the edge, where a tool handler needs to turn "what
//! went wrong" into a response shape: report-and-stop vs. already
//! retried vs. degraded-but-succeeded.

use thiserror::Error;

/// One of the six error kinds a tool invocation can surface.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input failed a shape, range, or safety check. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Required configuration or feature flag missing for the requested tool.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network blip, rate limit, or transient store error. Retried internally
    /// by C4/C6/C7 before this variant is ever constructed; only surfaces
    /// after those retries are exhausted.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// Upstream 4xx that will not recover on retry (bad credentials, missing
    /// executable, unsupported input).
    #[error("permanent external error: {0}")]
    PermanentExternal(String),

    /// Some items in a batch failed; reported via aggregate counters, never
    /// fails the enclosing request on its own.
    #[error("partial batch failure: {successful}/{attempted} succeeded")]
    PartialBatchFailure { successful: usize, attempted: usize },

    /// The response would exceed the caller's token budget. In practice this
    /// variant is never constructed — the size manager (C12) truncates
    /// instead of raising — but it is named here to keep §7's error kinds
    /// complete at the type level.
    #[error("size error: {0}")]
    Size(String),
}

impl PipelineError {
    /// Machine-readable error code used in the JSON envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation_error",
            PipelineError::Configuration(_) => "configuration_error",
            PipelineError::TransientExternal(_) => "transient_external_error",
            PipelineError::PermanentExternal(_) => "permanent_external_error",
            PipelineError::PartialBatchFailure { .. } => "partial_batch_failure",
            PipelineError::Size(_) => "size_error",
        }
    }
}
