use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the REST services on failed calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Used instead of `error` by the messaging and conference services.
    #[serde(default, rename = "Message", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            message: None,
        }
    }
}

/// A non-success HTTP status together with the best available reason.
#[derive(Debug, Clone, Error)]
#[error("({status}): {reason}")]
pub struct ServiceFailure {
    pub status: u16,
    pub reason: String,
}

impl ServiceFailure {
    /// Prefers the body's `error` field, then its `Message` field, over the
    /// status reason phrase.
    pub fn new(status: u16, body: Option<&serde_json::Value>, reason_phrase: &str) -> Self {
        let reason = body
            .and_then(|value| serde_json::from_value::<ServiceErrorBody>(value.clone()).ok())
            .and_then(|body| body.error.or(body.message))
            .unwrap_or_else(|| reason_phrase.to_string());
        Self { status, reason }
    }
}
