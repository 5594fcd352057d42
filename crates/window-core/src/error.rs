use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cursor::CursorAnchor,
    types::{FetchDirection, FetchStatus},
};

/// Broad error category used for user-facing handling and retry hints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or unsupported request.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the API.
    RateLimited,
    /// Bug or invariant break inside a collaborator.
    Internal,
}

/// Stable failure payload reported by the history and send collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ApiError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ApiError {
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build an error from an HTTP status returned by the REST API.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(classify_http_status(status), "http_error", message)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Network | ErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        408 | 429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}

/// Failures local to one window operation. None of them is fatal to the
/// session and none of them mutates already-loaded messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// History request failed; the direction becomes retryable.
    #[error("{direction:?} fetch failed: {source}")]
    FetchFailed {
        direction: FetchDirection,
        source: ApiError,
    },
    /// Send failed; the optimistic entry is retained for resend.
    #[error("send '{client_txn_id}' failed: {source}")]
    SendFailed {
        client_txn_id: String,
        source: ApiError,
    },
    /// A response resolved after its session was replaced.
    #[error("stale response from epoch {issued_epoch} (current epoch {current_epoch})")]
    StaleResponse {
        issued_epoch: u64,
        current_epoch: u64,
    },
    /// The fetch-around anchor row is missing from the response.
    #[error("anchor {anchor:?} not present in response")]
    AnchorNotFound { anchor: CursorAnchor },
    /// Fetch state was driven through an illegal transition.
    #[error("cannot move {direction:?} fetch from {from:?} to {to:?}")]
    InvalidTransition {
        direction: FetchDirection,
        from: FetchStatus,
        to: FetchStatus,
    },
}

impl WindowError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            WindowError::FetchFailed { .. } => "fetch_failed",
            WindowError::SendFailed { .. } => "send_failed",
            WindowError::StaleResponse { .. } => "stale_response",
            WindowError::AnchorNotFound { .. } => "anchor_not_found",
            WindowError::InvalidTransition { .. } => "invalid_fetch_transition",
        }
    }
}
