use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConciergeError, Result};

/// Upper bound for every TTL, timeout and interval setting (ten years).
pub const MAX_DURATION_SECS: u64 = 315_360_000;

/// Top-level configuration for the Concierge assistant.
///
/// Loaded from `~/.concierge/config.toml` by default. Each section maps to one
/// component of the response engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConciergeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl ConciergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConciergeConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the engine misbehave silently.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("knowledge.faq_ttl_secs", self.knowledge.faq_ttl_secs),
            ("knowledge.article_ttl_secs", self.knowledge.article_ttl_secs),
            ("providers.health_ttl_secs", self.providers.health_ttl_secs),
            ("providers.request_timeout_secs", self.providers.request_timeout_secs),
            ("providers.probe_timeout_secs", self.providers.probe_timeout_secs),
            ("session.timeout_secs", self.session.timeout_secs),
            ("session.cleanup_interval_secs", self.session.cleanup_interval_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConciergeError::Validation(format!("{} must be positive", name)));
            }
            if value > MAX_DURATION_SECS {
                return Err(ConciergeError::Validation(format!(
                    "{} must be at most {} seconds, got {}",
                    name, MAX_DURATION_SECS, value
                )));
            }
        }

        if self.session.max_messages == 0 {
            return Err(ConciergeError::Validation(
                "session.max_messages must be positive".to_string(),
            ));
        }
        if self.chat.max_question_length == 0 {
            return Err(ConciergeError::Validation(
                "chat.max_question_length must be positive".to_string(),
            ));
        }

        let unit = [
            ("search.faq_threshold", self.search.faq_threshold),
            ("search.article_threshold", self.search.article_threshold),
            ("search.keyword_boost", self.search.keyword_boost),
            ("search.max_keyword_boost", self.search.max_keyword_boost),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConciergeError::Validation(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Reply used when every provider failed.
    pub fallback_message: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            fallback_message: "Desculpe, não consegui processar sua pergunta agora. \
                               Tente novamente em instantes ou fale com o time de suporte."
                .to_string(),
        }
    }
}

/// Knowledge-base mirror configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Seconds a mirrored FAQ collection stays valid.
    pub faq_ttl_secs: u64,
    /// Seconds a mirrored article collection stays valid.
    pub article_ttl_secs: u64,
    /// JSON document with `faqs` and `articles` arrays, read on cache miss.
    pub source_path: Option<String>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            faq_ttl_secs: 600,
            article_ttl_secs: 600,
            source_path: None,
        }
    }
}

/// Relevance scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// A FAQ match must score strictly above this.
    pub faq_threshold: f64,
    /// An article must score strictly above this.
    pub article_threshold: f64,
    /// Maximum number of articles returned.
    pub max_articles: usize,
    /// Boost added per question token found in a record's keywords.
    pub keyword_boost: f64,
    /// Ceiling on the total keyword boost.
    pub max_keyword_boost: f64,
    /// Tokens shorter than this are ignored.
    pub min_token_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            faq_threshold: 0.3,
            article_threshold: 0.2,
            max_articles: 5,
            keyword_boost: 0.1,
            max_keyword_boost: 0.3,
            min_token_len: 3,
        }
    }
}

/// AI provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Seconds a health probe result stays valid.
    pub health_ttl_secs: u64,
    /// Upper bound on a single generation call.
    pub request_timeout_secs: u64,
    /// Upper bound on a single health probe.
    pub probe_timeout_secs: u64,
    pub primary: ProviderSettings,
    pub secondary: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            health_ttl_secs: 300,
            request_timeout_secs: 30,
            probe_timeout_secs: 10,
            primary: ProviderSettings {
                name: "gemini".to_string(),
                model: "gemini-2.0-flash".to_string(),
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                api_key_env: "GEMINI_API_KEY".to_string(),
                ..ProviderSettings::default()
            },
            secondary: ProviderSettings::default(),
        }
    }
}

/// Connection settings for one OpenAI-compatible provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub model: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 500,
            temperature: 0.3,
        }
    }
}

/// Conversation session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of inactivity after which a session expires.
    pub timeout_secs: u64,
    /// Messages kept per session; older ones are dropped first.
    pub max_messages: usize,
    /// Seconds between background sweeps of expired sessions.
    pub cleanup_interval_secs: u64,
    /// Question/answer turns included in the prompt.
    pub history_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            max_messages: 10,
            cleanup_interval_secs: 600,
            history_turns: 3,
        }
    }
}

/// Question handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum question length in characters.
    pub max_question_length: usize,
    /// Output format when the caller does not request one.
    pub default_format: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_question_length: 2000,
            default_format: "chat".to_string(),
        }
    }
}
