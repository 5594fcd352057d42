use crate::{
    error::{ApiError, ErrorCategory, WindowError},
    types::{Message, MessageId, SendAck, SessionUpdate},
};

/// Send result before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Send succeeded and produced the server message.
    Success { message: Message },
    /// Send failed with collaborator error details.
    Failure { error: ApiError },
}

impl From<Result<Message, ApiError>> for SendOutcome {
    fn from(result: Result<Message, ApiError>) -> Self {
        match result {
            Ok(message) => SendOutcome::Success { message },
            Err(error) => SendOutcome::Failure { error },
        }
    }
}

/// Convert a send outcome to a stable `SessionUpdate::SendAck`.
pub fn normalize_send_outcome(
    client_txn_id: impl Into<String>,
    local_id: MessageId,
    outcome: &SendOutcome,
) -> SessionUpdate {
    let client_txn_id = client_txn_id.into();
    match outcome {
        SendOutcome::Success { message } => SessionUpdate::SendAck(SendAck {
            client_txn_id,
            local_id,
            message_id: Some(message.id),
            error_code: None,
        }),
        SendOutcome::Failure { error } => SessionUpdate::SendAck(SendAck {
            client_txn_id,
            local_id,
            message_id: None,
            error_code: Some(error.code.clone()),
        }),
    }
}

/// Convert a failed fetch into a `SessionUpdate::FetchFailed`.
pub fn normalize_fetch_failure(error: WindowError) -> Option<SessionUpdate> {
    match error {
        WindowError::FetchFailed { direction, source } => Some(SessionUpdate::FetchFailed {
            direction,
            error: source,
        }),
        _ => None,
    }
}

/// Convert a bare send failure message to a network-classified error.
pub fn classify_send_error_message(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCategory::Network, "send_failed", message.into())
}
