//! Error types for request/reply calls.

use crate::token::CorrelationToken;
use probe_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while issuing calls or running a probe
#[derive(Debug, Error)]
pub enum RpcError {
    /// Declare, publish or consume failed. Always fatal to the run.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The matched reply body is not a valid status record
    #[error("Malformed reply payload: {source}")]
    MalformedPayload { source: serde_json::Error },

    /// No matching reply arrived before the deadline
    #[error("No reply for request {token} within {waited:?}")]
    Timeout {
        token: CorrelationToken,
        waited: Duration,
    },

    /// The token generator produced a token already waiting for a reply
    #[error("Correlation token {token} is already in flight")]
    DuplicateToken { token: CorrelationToken },

    #[error("Invalid run configuration: {message}")]
    Configuration { message: String },

    #[error("Call worker failed: {message}")]
    WorkerFailed { message: String },
}

impl RpcError {
    /// Check if the error affects only the call that raised it
    ///
    /// Call-scoped failures may be skipped when the run continues on error;
    /// everything else aborts the run.
    pub fn is_call_scoped(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
