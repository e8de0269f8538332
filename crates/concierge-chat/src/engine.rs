//! Answer engine: the entry point the route layer calls.
//!
//! Owns the knowledge mirror, session store, health cache and orchestrator
//! for one process. Everything below `answer` recovers its own failures; only
//! question validation errors reach the caller.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use concierge_core::{duration_from_secs, AuditEntry, ChatRole, Clock, ConciergeConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::error::ChatError;
use crate::health::{HealthReport, ProviderHealthCache};
use crate::knowledge::{KnowledgeMirror, KnowledgeSource, KnowledgeStatus};
use crate::orchestrator::{AiOrchestrator, OrchestratorOutcome};
use crate::prompt::{assess_response, PromptBuilder, ResponseFormat, ResponseQuality};
use crate::provider::AiProvider;
use crate::search::{HybridSearchResult, RelevanceSearchEngine};
use crate::session::{CleanupHandle, ConversationSessionStore, SessionStats};

/// Upper bound for one audit write before it is abandoned.
const AUDIT_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// One question from the route layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub format: Option<ResponseFormat>,
    /// Provider chosen by the caller's capability handshake.
    #[serde(default)]
    pub primary: Option<String>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_primary(mut self, provider: impl Into<String>) -> Self {
        self.primary = Some(provider.into());
        self
    }
}

/// Where the answer's grounding came from, as written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLabel {
    /// Generated with a FAQ match in context.
    Faq,
    /// Generated with articles but no FAQ match.
    Articles,
    /// Generated without any knowledge context.
    Ai,
    /// No provider succeeded.
    Fallback,
}

impl SourceLabel {
    fn classify(context: &HybridSearchResult, outcome: &OrchestratorOutcome) -> Self {
        if !outcome.success {
            SourceLabel::Fallback
        } else if context.faq.is_some() {
            SourceLabel::Faq
        } else if !context.articles.is_empty() {
            SourceLabel::Articles
        } else {
            SourceLabel::Ai
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLabel::Faq => "faq",
            SourceLabel::Articles => "articles",
            SourceLabel::Ai => "ai",
            SourceLabel::Fallback => "fallback",
        }
    }
}

/// What the route layer gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResponse {
    pub response_text: String,
    pub provider: Option<String>,
    pub session_id: String,
    pub used_faq_match: bool,
    /// Number of articles placed in the prompt.
    pub used_articles: usize,
    /// False when the fixed fallback message was returned.
    pub success: bool,
    pub quality: ResponseQuality,
    pub source_label: SourceLabel,
}

/// Diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub knowledge: KnowledgeStatus,
    pub sessions: SessionStats,
    /// Last health report, if still within its TTL.
    pub health: Option<HealthReport>,
}

/// Hybrid retrieval-and-fallback answer engine.
pub struct AnswerEngine {
    knowledge: KnowledgeMirror,
    search: RelevanceSearchEngine,
    orchestrator: AiOrchestrator,
    health: ProviderHealthCache,
    sessions: Arc<ConversationSessionStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    max_question_length: usize,
    default_format: ResponseFormat,
    cleanup_interval: StdDuration,
}

impl AnswerEngine {
    pub fn new(
        config: &ConciergeConfig,
        source: Arc<dyn KnowledgeSource>,
        primary: Arc<dyn AiProvider>,
        secondary: Arc<dyn AiProvider>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let knowledge = KnowledgeMirror::new(
            source,
            duration_from_secs(config.knowledge.faq_ttl_secs),
            duration_from_secs(config.knowledge.article_ttl_secs),
            Arc::clone(&clock),
        );
        let orchestrator = AiOrchestrator::new(
            Arc::clone(&primary),
            Arc::clone(&secondary),
            StdDuration::from_secs(config.providers.request_timeout_secs),
            config.general.fallback_message.clone(),
            PromptBuilder::new(config.session.history_turns),
        );
        let health = ProviderHealthCache::new(
            primary,
            secondary,
            duration_from_secs(config.providers.health_ttl_secs),
            StdDuration::from_secs(config.providers.probe_timeout_secs),
            Arc::clone(&clock),
        );
        let sessions = Arc::new(ConversationSessionStore::from_config(
            &config.session,
            Arc::clone(&clock),
        ));
        let default_format =
            ResponseFormat::from_name(&config.chat.default_format).unwrap_or_else(|| {
                warn!(
                    format = %config.chat.default_format,
                    "Unknown default response format; using chat"
                );
                ResponseFormat::Chat
            });

        Self {
            knowledge,
            search: RelevanceSearchEngine::from_config(&config.search),
            orchestrator,
            health,
            sessions,
            audit,
            clock,
            max_question_length: config.chat.max_question_length,
            default_format,
            cleanup_interval: StdDuration::from_secs(config.session.cleanup_interval_secs),
        }
    }

    pub fn sessions(&self) -> &Arc<ConversationSessionStore> {
        &self.sessions
    }

    pub fn knowledge(&self) -> &KnowledgeMirror {
        &self.knowledge
    }

    /// Start the periodic expired-session sweep.
    pub fn start_session_cleanup(&self) -> CleanupHandle {
        self.sessions.spawn_cleanup(self.cleanup_interval)
    }

    /// Answer one question.
    ///
    /// Fails only for an empty or over-long question. Provider outages come
    /// back as `success: false` with the fallback text.
    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResponse, ChatError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }
        if question.chars().count() > self.max_question_length {
            return Err(ChatError::QuestionTooLong(self.max_question_length));
        }
        let format = request.format.unwrap_or(self.default_format);

        let session = self
            .sessions
            .get_or_create_session(&request.user_id, request.session_id.as_deref());
        let history = self.sessions.get_session_history(&session.id);

        let (faqs, articles) = tokio::join!(self.knowledge.faqs(), self.knowledge.articles());
        let context = self.search.hybrid_search(question, &faqs, &articles);
        debug!(
            session_id = %session.id,
            faqs = faqs.len(),
            articles = articles.len(),
            has_results = context.has_results,
            "Context assembled"
        );

        let outcome = self
            .orchestrator
            .generate(
                request.primary.as_deref(),
                question,
                &context,
                &history,
                format,
            )
            .await;

        let quality = assess_response(&outcome.text);
        if outcome.success && quality.low_quality {
            warn!(
                provider = outcome.provider.as_deref().unwrap_or("none"),
                too_short_generic = quality.too_short_generic,
                too_long = quality.too_long,
                "Low quality response"
            );
        }
        let source_label = SourceLabel::classify(&context, &outcome);

        self.record_turn(&session.id, question, &context, &outcome, source_label);
        self.emit_audit(&request.user_id, question, source_label);

        info!(
            session_id = %session.id,
            source = source_label.as_str(),
            provider = outcome.provider.as_deref().unwrap_or("none"),
            success = outcome.success,
            "Question answered"
        );

        Ok(AnswerResponse {
            response_text: outcome.text,
            provider: outcome.provider,
            session_id: session.id,
            used_faq_match: context.faq.is_some(),
            used_articles: context.articles.len(),
            success: outcome.success,
            quality,
            source_label,
        })
    }

    fn record_turn(
        &self,
        session_id: &str,
        question: &str,
        context: &HybridSearchResult,
        outcome: &OrchestratorOutcome,
        source_label: SourceLabel,
    ) {
        let metadata = json!({
            "provider": outcome.provider,
            "success": outcome.success,
            "source": source_label.as_str(),
            "faq_id": context.faq.as_ref().map(|f| f.record.id.clone()),
            "article_ids": context.articles.iter().map(|a| a.record.id.clone()).collect::<Vec<_>>(),
        });

        let stored = self
            .sessions
            .add_message(session_id, ChatRole::User, question, None)
            .and_then(|_| {
                self.sessions.add_message(
                    session_id,
                    ChatRole::Assistant,
                    outcome.text.clone(),
                    Some(metadata),
                )
            });
        if let Err(e) = stored {
            warn!(session_id, error = %e, "Failed to record conversation turn");
        }
    }

    /// Hand the entry to the sink on a detached task; the answer never waits on it.
    fn emit_audit(&self, user_id: &str, question: &str, source_label: SourceLabel) {
        let entry = AuditEntry {
            timestamp: self.clock.now(),
            user_id: user_id.to_string(),
            question: question.to_string(),
            source_label: source_label.as_str().to_string(),
        };
        let sink = Arc::clone(&self.audit);
        tokio::spawn(async move {
            let result = match tokio::time::timeout(AUDIT_TIMEOUT, sink.record(entry)).await {
                Ok(result) => result,
                Err(_) => Err(ChatError::Audit(format!(
                    "sink did not finish within {} ms",
                    AUDIT_TIMEOUT.as_millis()
                ))),
            };
            if let Err(e) = result {
                warn!(error = %e, "Audit sink rejected entry");
            }
        });
    }

    /// Probe providers, or return the cached report within its TTL.
    pub async fn check_health(&self) -> HealthReport {
        self.health.test_connection().await
    }

    /// Drop the knowledge mirror and cached provider health.
    pub fn invalidate(&self) {
        self.knowledge.invalidate();
        self.health.invalidate();
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            knowledge: self.knowledge.status(),
            sessions: self.sessions.stats(),
            health: self.health.cached(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{NoopAuditSink, RecordingAuditSink};
    use crate::knowledge::MemoryKnowledgeSource;
    use async_trait::async_trait;
    use concierge_core::{KnowledgeRecord, ManualClock, RelevanceResult};

    struct EchoProvider;

    #[async_trait]
    impl AiProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ChatError> {
            Ok("O PIX é liberado em até 24 horas úteis.".to_string())
        }

        async fn probe(&self) -> Result<(), ChatError> {
            Ok(())
        }
    }

    fn engine_with(config: ConciergeConfig, audit: Arc<dyn AuditSink>) -> AnswerEngine {
        let source = Arc::new(MemoryKnowledgeSource::new(
            vec![KnowledgeRecord::faq(
                "f1",
                "prazo PIX liberação",
                "O PIX é liberado em até 24 horas úteis.",
            )],
            vec![],
        ));
        AnswerEngine::new(
            &config,
            source,
            Arc::new(EchoProvider),
            Arc::new(EchoProvider),
            audit,
            Arc::new(ManualClock::starting_now()),
        )
    }

    fn engine() -> AnswerEngine {
        engine_with(ConciergeConfig::default(), Arc::new(NoopAuditSink))
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let err = engine()
            .answer(AnswerRequest::new("   ", "ana"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyQuestion));
    }

    #[tokio::test]
    async fn test_long_question_rejected() {
        let mut config = ConciergeConfig::default();
        config.chat.max_question_length = 10;
        let engine = engine_with(config, Arc::new(NoopAuditSink));

        let err = engine
            .answer(AnswerRequest::new("a".repeat(11), "ana"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::QuestionTooLong(10)));
        assert!(engine
            .answer(AnswerRequest::new("a".repeat(10), "ana"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_answer_with_faq_match() {
        let audit = Arc::new(RecordingAuditSink::new());
        let engine = engine_with(ConciergeConfig::default(), audit.clone());

        let response = engine
            .answer(AnswerRequest::new("qual o prazo para liberação do PIX?", "ana"))
            .await
            .unwrap();
        assert!(response.success);
        assert!(response.used_faq_match);
        assert_eq!(response.source_label, SourceLabel::Faq);
        assert_eq!(response.provider.as_deref(), Some("echo"));

        let entries = tokio::time::timeout(StdDuration::from_secs(1), audit.wait_for(1))
            .await
            .expect("audit entry should be written");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_label, "faq");
        assert_eq!(entries[0].user_id, "ana");
    }

    #[tokio::test]
    async fn test_turn_is_recorded_in_session() {
        let engine = engine();
        let response = engine
            .answer(AnswerRequest::new("prazo do pix", "ana"))
            .await
            .unwrap();

        let session = engine.sessions().get_session(&response.session_id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, ChatRole::User);
        assert_eq!(session.messages[0].content, "prazo do pix");
        assert_eq!(session.messages[1].role, ChatRole::Assistant);
        let meta = session.messages[1].metadata.as_ref().unwrap();
        assert_eq!(meta["provider"], "echo");
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let engine = engine();
        let first = engine
            .answer(AnswerRequest::new("prazo do pix", "ana"))
            .await
            .unwrap();
        let second = engine
            .answer(AnswerRequest::new("e no sábado?", "ana").with_session(&first.session_id))
            .await
            .unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(engine.status().sessions.total_messages, 4);
    }

    #[test]
    fn test_source_label_classification() {
        let faq = RelevanceResult::new(KnowledgeRecord::faq("f", "t", "b"), 0.9);
        let article = RelevanceResult::new(KnowledgeRecord::article("a", "t", "b"), 0.5);
        let ok = OrchestratorOutcome {
            text: "x".to_string(),
            provider: Some("echo".to_string()),
            success: true,
            error: None,
            attempts: vec![],
        };
        let failed = OrchestratorOutcome {
            success: false,
            provider: None,
            ..ok.clone()
        };
        let with_faq = HybridSearchResult {
            faq: Some(faq),
            articles: vec![article.clone()],
            has_results: true,
        };
        let with_articles = HybridSearchResult {
            faq: None,
            articles: vec![article],
            has_results: true,
        };
        let empty = HybridSearchResult {
            faq: None,
            articles: vec![],
            has_results: false,
        };

        assert_eq!(SourceLabel::classify(&with_faq, &ok), SourceLabel::Faq);
        assert_eq!(SourceLabel::classify(&with_articles, &ok), SourceLabel::Articles);
        assert_eq!(SourceLabel::classify(&empty, &ok), SourceLabel::Ai);
        assert_eq!(SourceLabel::classify(&with_faq, &failed), SourceLabel::Fallback);
    }

    #[test]
    fn test_answer_request_deserializes_format() {
        let request: AnswerRequest = serde_json::from_str(
            r#"{"question":"oi","user_id":"ana","format":"channel","primary":"openai"}"#,
        )
        .unwrap();
        assert_eq!(request.format, Some(ResponseFormat::Channel));
        assert_eq!(request.primary.as_deref(), Some("openai"));
        assert!(request.session_id.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_knowledge_after_answer() {
        let engine = engine();
        assert!(engine.status().health.is_none());
        engine
            .answer(AnswerRequest::new("prazo do pix", "ana"))
            .await
            .unwrap();
        let status = engine.status();
        assert!(status.knowledge.faqs.has_data);
        assert_eq!(status.knowledge.faqs.item_count, 1);
        // Empty article collection is never cached.
        assert!(!status.knowledge.articles.has_data);

        engine.check_health().await;
        assert!(engine.status().health.is_some());
        engine.invalidate();
        assert!(engine.status().health.is_none());
        assert!(!engine.status().knowledge.faqs.has_data);
    }
}
