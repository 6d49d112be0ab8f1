//! Error types for chat-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for chat-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// How the fallback orchestrator treats a failed candidate attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Specific to the attempted candidate; move on to the next one.
    Retryable,
    /// Stop immediately, regardless of remaining candidates.
    Fatal,
}

/// Main error type for chat-relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Upstream credential not configured: {0}")]
    AuthConfig(String),

    #[error("Model '{model}' unavailable upstream ({status}): {detail}")]
    UpstreamModelUnavailable {
        model: String,
        status: u16,
        detail: String,
    },

    #[error("Upstream rejected credentials for model '{model}' ({status}): {detail}")]
    UpstreamAuth {
        model: String,
        status: u16,
        detail: String,
    },

    #[error("Upstream rejected request for model '{model}' ({status}): {detail}")]
    UpstreamMalformedRequest {
        model: String,
        status: u16,
        detail: String,
    },

    #[error("Upstream unavailable for model '{model}' ({status}): {detail}")]
    UpstreamUnavailable {
        model: String,
        /// HTTP status, or 0 when the request never reached the upstream.
        status: u16,
        detail: String,
        /// Whether the active policy lets the orchestrator fall back past this failure.
        retryable: bool,
    },

    #[error("Upstream responded {status} for model '{model}': {detail}")]
    UpstreamRejected {
        model: String,
        status: u16,
        detail: String,
    },

    #[error("All {attempted} candidate models failed; last error: {last}")]
    UpstreamAllCandidatesFailed { attempted: usize, last: String },

    #[error("Upstream returned no reply text")]
    UpstreamEmptyReply,

    #[error("Malformed stream record: {0}")]
    StreamParse(String),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Upstream body read failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a candidate failure for the fallback orchestrator.
    ///
    /// Only missing-model and transient upstream conditions are retryable.
    /// Everything else, including local configuration errors, ends the
    /// fallback sequence on the spot.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::UpstreamModelUnavailable { .. } => FailureClass::Retryable,
            Error::UpstreamUnavailable { retryable, .. } if *retryable => FailureClass::Retryable,
            _ => FailureClass::Fatal,
        }
    }

    /// Upstream HTTP status carried by this error, if any.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Error::UpstreamModelUnavailable { status, .. }
            | Error::UpstreamAuth { status, .. }
            | Error::UpstreamMalformedRequest { status, .. }
            | Error::UpstreamUnavailable { status, .. }
            | Error::UpstreamRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// HTTP status surfaced to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Config(_) | Error::AuthConfig(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::UpstreamModelUnavailable { .. }
            | Error::UpstreamAuth { .. }
            | Error::UpstreamMalformedRequest { .. }
            | Error::UpstreamUnavailable { .. }
            | Error::UpstreamRejected { .. }
            | Error::UpstreamAllCandidatesFailed { .. }
            | Error::UpstreamEmptyReply
            | Error::StreamParse(_)
            | Error::Http(_) => StatusCode::BAD_GATEWAY,
            // Nobody is left to read this one.
            Error::ClientDisconnected => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });

        (status, axum::Json(body)).into_response()
    }
}
