//! Error types for the response engine.

use concierge_core::error::ConciergeError;

/// Errors from the response engine.
///
/// Only the input-validation variants ever leave [`crate::AnswerEngine::answer`];
/// the rest are recovered inside the engine and surface as flags on the
/// response.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("question cannot be empty")]
    EmptyQuestion,
    #[error("question exceeds maximum length of {0} characters")]
    QuestionTooLong(usize),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("knowledge store error: {0}")]
    Store(String),
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
    #[error("provider {provider} timed out after {timeout_ms} ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },
    #[error("provider {0} is not configured")]
    NotConfigured(String),
    #[error("provider {0} returned a malformed response")]
    MalformedResponse(String),
    #[error("audit sink error: {0}")]
    Audit(String),
}

impl ChatError {
    /// Shorthand for a provider failure.
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        ChatError::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

impl From<ConciergeError> for ChatError {
    fn from(err: ConciergeError) -> Self {
        ChatError::Store(err.to_string())
    }
}
