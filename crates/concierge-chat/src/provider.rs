//! AI provider abstraction.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ChatError;

/// A text-generation backend.
///
/// Implementations need not bound their own latency; the orchestrator wraps
/// every call in a timeout.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable provider name, e.g. `"gemini"`.
    fn name(&self) -> &str;

    /// Model identifier used for generation.
    fn model(&self) -> &str;

    /// Whether credentials are present. Unconfigured providers are skipped
    /// without a network call.
    fn is_configured(&self) -> bool;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, ChatError>;

    /// Lightweight liveness check.
    async fn probe(&self) -> Result<(), ChatError>;
}

/// Parsed result of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Success { text: String, provider: String },
    Failure { reason: String },
}

impl GenerationOutcome {
    /// Classify a raw provider result. Blank output counts as a failure.
    pub fn from_result(provider: &str, result: Result<String, ChatError>) -> Self {
        match result {
            Ok(text) if !text.trim().is_empty() => GenerationOutcome::Success {
                text: text.trim().to_string(),
                provider: provider.to_string(),
            },
            Ok(_) => GenerationOutcome::Failure {
                reason: ChatError::MalformedResponse(provider.to_string()).to_string(),
            },
            Err(e) => GenerationOutcome::Failure {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Success { .. })
    }
}
