use reqwest::StatusCode;
use thiserror::Error;

/// Why a send did not produce a complete reply.
///
/// Only `Api` and `Network` are shown to the user. `Validation` and
/// `Busy` are silent refusals and `Cancelled` is only logged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SendError {
    #[error("input is empty")]
    Validation,
    #[error("a message is already being sent")]
    Busy,
    #[error("chat request failed with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("send was cancelled")]
    Cancelled,
}

impl SendError {
    pub fn api(status: StatusCode) -> Self {
        SendError::Api {
            status: status.as_u16(),
            message: api_error_message(status),
        }
    }

    pub fn network(err: impl std::fmt::Display) -> Self {
        SendError::Network(err.to_string())
    }

    /// The string to put on the error surface, if this error is user
    /// visible at all.
    pub fn user_message(&self) -> Option<String> {
        match self {
            SendError::Api { message, .. } => Some(message.clone()),
            SendError::Network(_) => Some(
                "Could not reach the chat service. Check your connection and try again."
                    .to_string(),
            ),
            SendError::Validation | SendError::Busy | SendError::Cancelled => None,
        }
    }

    /// Category reported to the error log endpoint.
    pub fn error_type(&self) -> &'static str {
        match self {
            SendError::Validation => "validation_error",
            SendError::Busy => "busy",
            SendError::Api { .. } => "api_error",
            SendError::Network(_) => "network_error",
            SendError::Cancelled => "cancelled",
        }
    }

    /// Status code reported to the error log endpoint. Transport
    /// failures report zero.
    pub fn status_code(&self) -> u16 {
        match self {
            SendError::Api { status, .. } => *status,
            _ => 0,
        }
    }
}

fn api_error_message(status: StatusCode) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown status");
    match status.as_u16() {
        400 => format!("The chat service rejected the request ({})", reason),
        401 | 403 => format!("Not authorized to use the chat service ({})", reason),
        404 => "The chat endpoint was not found on the server".to_string(),
        408 | 504 => "The chat service timed out. Please try again.".to_string(),
        429 => "Too many requests. Wait a moment and try again.".to_string(),
        500..=599 => format!("The chat service is unavailable ({})", reason),
        _ => reason.to_string(),
    }
}
