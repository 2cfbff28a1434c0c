//! Shared error types and server error-body parsing.

use serde::Deserialize;
use thiserror::Error;

/// Error envelope returned by the backend for failed `/api/*` calls.
///
/// The backend is not consistent about which field carries the human-readable
/// text, so both are optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Attempt to parse an error body into a user-facing message.
/// Prefers `detail`, falls back to `message`, then to a bare JSON/text string.
pub fn server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(trimmed) {
        for candidate in [parsed.detail, parsed.message].into_iter().flatten() {
            if !candidate.trim().is_empty() {
                return Some(candidate);
            }
        }
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// HTTP status code, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures below the HTTP layer (no response received).
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout)
    }

    /// The server-provided message carried in an error body, if any.
    pub fn server_message(&self) -> Option<String> {
        match self {
            ApiError::Http { body, .. } => server_message(body),
            _ => None,
        }
    }
}

/// Error produced when a server payload cannot be turned into a typed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected a JSON object for {0}")]
    NotAnObject(&'static str),
    #[error("missing field `{field}` in {record}")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },
}
