use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// =============================================================================
// Knowledge base
// =============================================================================

/// Which backing-store collection a record was mirrored from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    Faq,
    Article,
}

/// A curated FAQ entry or knowledge-base article.
///
/// Read-only from the engine's perspective: records are mirrored wholesale
/// from the backing store and never mutated in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: KnowledgeKind,
    /// Topic of an FAQ entry or title of an article.
    #[serde(alias = "topic")]
    pub title: String,
    /// Answer text (FAQ) or article content.
    #[serde(default, alias = "context", alias = "content")]
    pub body: String,
    /// Keywords curated by editors. Accepts either a list or a single
    /// comma-separated string.
    #[serde(default, deserialize_with = "keywords_from_list_or_string")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_kind() -> KnowledgeKind {
    KnowledgeKind::Faq
}

impl KnowledgeRecord {
    pub fn faq(id: impl Into<String>, topic: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: KnowledgeKind::Faq,
            title: topic.into(),
            body: answer.into(),
            keywords: Vec::new(),
            category: None,
        }
    }

    pub fn article(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: KnowledgeKind::Article,
            title: title.into(),
            body: content.into(),
            keywords: Vec::new(),
            category: None,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Keywords joined the way editors store them in the backing store.
    pub fn keyword_text(&self) -> String {
        self.keywords.join(", ")
    }

    /// All searchable fields concatenated: title, body and keywords.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.title.as_str(), self.body.as_str()];
        parts.extend(self.keywords.iter().map(String::as_str));
        parts.join(" ")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeywordField {
    List(Vec<String>),
    Joined(String),
}

fn keywords_from_list_or_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let field: Option<KeywordField> = Option::deserialize(deserializer)?;
    Ok(match field {
        None => Vec::new(),
        Some(KeywordField::List(list)) => list,
        Some(KeywordField::Joined(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect(),
    })
}

/// A knowledge record paired with its relevance to a question.
///
/// Invariant: `score` lies in `[0.0, 1.0]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelevanceResult {
    pub record: KnowledgeRecord,
    pub score: f64,
}

impl RelevanceResult {
    pub fn new(record: KnowledgeRecord, score: f64) -> Self {
        Self {
            record,
            score: score.clamp(0.0, 1.0),
        }
    }
}

// =============================================================================
// Conversation sessions
// =============================================================================

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message stored in a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Internal bookkeeping (provider used, matched FAQ, ...). Never sent to
    /// a provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Role/content pair handed to prompt construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: String,
}

/// A short-lived conversation with a capped message history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Opaque session token.
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Chronological; never longer than the store's message cap.
    pub messages: Vec<SessionMessage>,
}

// =============================================================================
// Providers
// =============================================================================

/// Position of a provider in the fallback chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    Primary,
    Fallback,
}

/// Result of the most recent live probe against one provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthRecord {
    pub provider: String,
    pub model: String,
    pub available: bool,
    pub role: ProviderRole,
    pub last_probed: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Audit
// =============================================================================

/// One row for the external audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub question: String,
    pub source_label: String,
}
