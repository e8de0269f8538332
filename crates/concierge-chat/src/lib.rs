//! Hybrid retrieval-and-fallback response engine.
//!
//! Scores questions against a mirrored FAQ/article knowledge base, asks an AI
//! provider (falling back to a second one) to compose the answer, and keeps a
//! short per-session conversation memory.

pub mod audit;
pub mod cache;
pub mod engine;
pub mod error;
pub mod health;
pub mod http_provider;
pub mod knowledge;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod search;
pub mod session;

pub use audit::{AuditSink, NoopAuditSink, RecordingAuditSink, TracingAuditSink};
pub use cache::{CacheEntry, CacheStatus, TtlCache};
pub use engine::{AnswerEngine, AnswerRequest, AnswerResponse, EngineStatus, SourceLabel};
pub use error::ChatError;
pub use health::{HealthReport, ProviderHealthCache};
pub use http_provider::OpenAiCompatibleProvider;
pub use knowledge::{
    JsonFileKnowledgeSource, KnowledgeMirror, KnowledgeSource, KnowledgeStatus,
    MemoryKnowledgeSource,
};
pub use orchestrator::{AiOrchestrator, AttemptRecord, OrchestratorOutcome, ProviderAttempt};
pub use prompt::{assess_response, PromptBuilder, ResponseFormat, ResponseQuality};
pub use provider::{AiProvider, GenerationOutcome};
pub use search::{HybridSearchResult, RelevanceSearchEngine};
pub use session::{CleanupHandle, ConversationSessionStore, SessionStats};
