//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint exposing `POST {base_url}/chat/completions`
//! with bearer authentication (OpenAI, Groq, Gemini's OpenAI bridge, Ollama).

use std::time::Duration;

use async_trait::async_trait;
use concierge_core::config::ProviderSettings;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::provider::AiProvider;

/// Characters of an error body kept in the provider error.
const MAX_ERROR_DETAIL: usize = 200;
const PING_MAX_TOKENS: u32 = 16;

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions provider speaking the OpenAI wire format.
pub struct OpenAiCompatibleProvider {
    client: Client,
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("configured", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiCompatibleProvider {
    /// Build from settings, reading the key from `settings.api_key_env`.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(
                provider = %settings.name,
                env = %settings.api_key_env,
                "No API key found; provider will be skipped"
            );
        }
        Self::new(settings, api_key)
    }

    pub fn new(settings: &ProviderSettings, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            name: settings.name.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// POST one chat completion and decode the body. Non-2xx statuses and
    /// undecodable bodies are errors; empty choices are not.
    async fn send(&self, prompt: &str, max_tokens: u32) -> Result<CompletionResponse, ChatError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ChatError::NotConfigured(self.name.clone()))?;

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::provider(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(MAX_ERROR_DETAIL).collect();
            return Err(ChatError::provider(
                &self.name,
                format!("API error {}: {}", status.as_u16(), detail),
            ));
        }

        response
            .json()
            .await
            .map_err(|_| ChatError::MalformedResponse(self.name.clone()))
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        let parsed = self.send(prompt, self.max_tokens).await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChatError::MalformedResponse(self.name.clone()))?;

        debug!(provider = %self.name, chars = text.len(), "Completion received");
        Ok(text)
    }

    /// Any 2xx with a decodable body counts as reachable; a tiny token
    /// budget may legitimately produce no content.
    async fn probe(&self) -> Result<(), ChatError> {
        self.send("ping", PING_MAX_TOKENS).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> ProviderSettings {
        ProviderSettings {
            base_url: "http://localhost:9/v1/".to_string(),
            ..ProviderSettings::default()
        }
    }

    #[test]
    fn test_new_trims_base_url() {
        let provider = OpenAiCompatibleProvider::new(&settings(), Some("k".to_string()));
        assert_eq!(
            provider.endpoint("chat/completions"),
            "http://localhost:9/v1/chat/completions"
        );
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o-mini");
        assert!(provider.is_configured());
    }

    #[test]
    fn test_from_settings_without_key_is_unconfigured() {
        let settings = ProviderSettings {
            api_key_env: "CONCIERGE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..settings()
        };
        let provider = OpenAiCompatibleProvider::from_settings(&settings);
        assert!(!provider.is_configured());
    }

    #[test]
    fn test_debug_hides_key() {
        let provider = OpenAiCompatibleProvider::new(&settings(), Some("secret".to_string()));
        let dbg = format!("{:?}", provider);
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("configured: true"));
    }

    #[tokio::test]
    async fn test_generate_without_key_is_not_configured() {
        let provider = OpenAiCompatibleProvider::new(&settings(), None);
        let err = provider.generate("oi").await.unwrap_err();
        assert!(matches!(err, ChatError::NotConfigured(_)));
    }

    #[test]
    fn test_completion_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Olá"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Olá"));

        let parsed: CompletionResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.choices.is_empty());
    }

    // =========================================================================
    // HTTP round trips
    // =========================================================================

    fn provider_for(server: &MockServer) -> OpenAiCompatibleProvider {
        let settings = ProviderSettings {
            base_url: format!("{}/v1", server.uri()),
            ..ProviderSettings::default()
        };
        OpenAiCompatibleProvider::new(&settings, Some("test-key".to_string()))
    }

    async fn respond_with(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_generate_returns_first_choice() {
        let server = respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Em até 24 horas." } }]
        })))
        .await;
        let provider = provider_for(&server);

        assert_eq!(provider.generate("prazo do pix?").await.unwrap(), "Em até 24 horas.");
        assert!(provider.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed_but_reachable() {
        let server = respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] }))).await;
        let provider = provider_for(&server);

        let err = provider.generate("oi").await.unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(ref name) if name == "openai"));
        assert!(provider.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_blank_content_is_malformed() {
        let server = respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "   " } }]
        })))
        .await;
        let provider = provider_for(&server);

        assert!(matches!(
            provider.generate("oi").await.unwrap_err(),
            ChatError::MalformedResponse(_)
        ));
        assert!(provider.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let server = respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>")).await;
        let provider = provider_for(&server);

        assert!(matches!(
            provider.generate("oi").await.unwrap_err(),
            ChatError::MalformedResponse(_)
        ));
        assert!(matches!(
            provider.probe().await.unwrap_err(),
            ChatError::MalformedResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_error_status_truncates_detail() {
        let server = respond_with(ResponseTemplate::new(503).set_body_string("x".repeat(500))).await;
        let provider = provider_for(&server);

        match provider.generate("oi").await.unwrap_err() {
            ChatError::Provider { provider, message } => {
                assert_eq!(provider, "openai");
                assert!(message.starts_with("API error 503: "));
                assert_eq!(message.matches('x').count(), MAX_ERROR_DETAIL);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(
            provider.probe().await.unwrap_err(),
            ChatError::Provider { .. }
        ));
    }
}
