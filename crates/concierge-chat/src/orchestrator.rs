//! Provider selection and fallback for answer generation.
//!
//! Each turn walks `TryPrimary -> TryFallback -> Exhausted`. A provider that
//! is unconfigured, errors, times out or returns blank text moves the turn to
//! the next state. Exhaustion yields the fixed fallback message and never an
//! error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use concierge_core::HistoryEntry;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::prompt::{PromptBuilder, ResponseFormat};
use crate::provider::{AiProvider, GenerationOutcome};
use crate::search::HybridSearchResult;

/// Stage of the provider fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAttempt {
    TryPrimary,
    TryFallback,
    Exhausted,
}

impl ProviderAttempt {
    fn next(self) -> Self {
        match self {
            ProviderAttempt::TryPrimary => ProviderAttempt::TryFallback,
            ProviderAttempt::TryFallback | ProviderAttempt::Exhausted => ProviderAttempt::Exhausted,
        }
    }
}

/// One provider tried during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub stage: ProviderAttempt,
    /// False when the provider was skipped for missing credentials.
    pub called: bool,
    pub succeeded: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Result of one orchestrated generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorOutcome {
    pub text: String,
    /// Provider that produced `text`, `None` for the fallback message.
    pub provider: Option<String>,
    pub success: bool,
    /// Last failure seen, kept for logging.
    pub error: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

/// Drives the primary/fallback chain over two providers.
pub struct AiOrchestrator {
    first: Arc<dyn AiProvider>,
    second: Arc<dyn AiProvider>,
    request_timeout: Duration,
    fallback_message: String,
    prompts: PromptBuilder,
}

impl AiOrchestrator {
    pub fn new(
        first: Arc<dyn AiProvider>,
        second: Arc<dyn AiProvider>,
        request_timeout: Duration,
        fallback_message: impl Into<String>,
        prompts: PromptBuilder,
    ) -> Self {
        Self {
            first,
            second,
            request_timeout,
            fallback_message: fallback_message.into(),
            prompts,
        }
    }

    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Providers in attempt order for the given primary.
    ///
    /// `primary` names the provider chosen by the caller's handshake. An
    /// unknown or absent name keeps the configured order.
    fn ordered(&self, primary: Option<&str>) -> [&Arc<dyn AiProvider>; 2] {
        match primary {
            Some(name) if name == self.second.name() && name != self.first.name() => {
                [&self.second, &self.first]
            }
            _ => [&self.first, &self.second],
        }
    }

    /// Generate an answer, falling back across providers.
    pub async fn generate(
        &self,
        primary: Option<&str>,
        question: &str,
        context: &HybridSearchResult,
        history: &[HistoryEntry],
        format: ResponseFormat,
    ) -> OrchestratorOutcome {
        let prompt = self.prompts.build(question, context, history, format);
        let order = self.ordered(primary);

        let mut attempts = Vec::with_capacity(2);
        let mut last_error: Option<String> = None;
        let mut state = ProviderAttempt::TryPrimary;

        loop {
            let provider = match state {
                ProviderAttempt::TryPrimary => order[0],
                ProviderAttempt::TryFallback => order[1],
                ProviderAttempt::Exhausted => break,
            };
            let name = provider.name().to_string();

            if !provider.is_configured() {
                debug!(provider = %name, stage = ?state, "Skipping unconfigured provider");
                let reason = ChatError::NotConfigured(name.clone()).to_string();
                attempts.push(AttemptRecord {
                    provider: name,
                    stage: state,
                    called: false,
                    succeeded: false,
                    error: Some(reason.clone()),
                    elapsed_ms: 0,
                });
                last_error = Some(reason);
                state = state.next();
                continue;
            }

            let started = Instant::now();
            let result = self.call(&**provider, &prompt).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match GenerationOutcome::from_result(&name, result) {
                GenerationOutcome::Success { text, provider } => {
                    info!(provider = %provider, stage = ?state, elapsed_ms, "Answer generated");
                    attempts.push(AttemptRecord {
                        provider: provider.clone(),
                        stage: state,
                        called: true,
                        succeeded: true,
                        error: None,
                        elapsed_ms,
                    });
                    return OrchestratorOutcome {
                        text,
                        provider: Some(provider),
                        success: true,
                        error: last_error,
                        attempts,
                    };
                }
                GenerationOutcome::Failure { reason } => {
                    warn!(provider = %name, stage = ?state, error = %reason, "Provider attempt failed");
                    attempts.push(AttemptRecord {
                        provider: name,
                        stage: state,
                        called: true,
                        succeeded: false,
                        error: Some(reason.clone()),
                        elapsed_ms,
                    });
                    last_error = Some(reason);
                }
            }
            state = state.next();
        }

        warn!(
            attempts = attempts.len(),
            error = last_error.as_deref().unwrap_or("none"),
            "All providers exhausted; using fallback message"
        );
        OrchestratorOutcome {
            text: self.fallback_message.clone(),
            provider: None,
            success: false,
            error: last_error,
            attempts,
        }
    }

    async fn call(&self, provider: &dyn AiProvider, prompt: &str) -> Result<String, ChatError> {
        match tokio::time::timeout(self.request_timeout, provider.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::ProviderTimeout {
                provider: provider.name().to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
