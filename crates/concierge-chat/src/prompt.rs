//! Prompt composition and response quality heuristics.
//!
//! A prompt is assembled in a fixed order: persona block, retrieved context,
//! recent conversation, the question, and closing instructions that pin the
//! model to the supplied context.

use std::fmt::Write as _;

use concierge_core::{ChatRole, HistoryEntry, RelevanceResult};
use serde::{Deserialize, Serialize};

use crate::search::HybridSearchResult;

/// Maximum characters of an article body quoted into the prompt.
const ARTICLE_EXCERPT_CHARS: usize = 600;

/// Responses shorter than this are checked for generic "don't know" phrasing.
const SHORT_RESPONSE_CHARS: usize = 50;

/// Responses longer than this are flagged as too long.
const LONG_RESPONSE_CHARS: usize = 500;

const GENERIC_PHRASES: &[&str] = &[
    "não sei",
    "nao sei",
    "não tenho informaç",
    "nao tenho informac",
    "não encontrei",
    "nao encontrei",
    "não possuo",
    "i don't know",
    "i do not know",
];

// =============================================================================
// ResponseFormat
// =============================================================================

/// Output profile requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Conversational answer for the portal chat widget.
    #[default]
    Chat,
    /// Short, informal reply for a messaging channel.
    Channel,
    /// Longer, formal write-up.
    Formal,
}

impl ResponseFormat {
    /// Parse a format name, accepting a few common aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "chat" | "conversational" | "web" => Some(ResponseFormat::Chat),
            "channel" | "short" | "informal" | "whatsapp" => Some(ResponseFormat::Channel),
            "formal" | "long" | "email" => Some(ResponseFormat::Formal),
            _ => None,
        }
    }

    pub fn word_limit(&self) -> usize {
        match self {
            ResponseFormat::Chat => 120,
            ResponseFormat::Channel => 60,
            ResponseFormat::Formal => 250,
        }
    }

    fn persona(&self) -> String {
        let (role, tone) = match self {
            ResponseFormat::Chat => (
                "Você é o assistente virtual do portal interno de conhecimento.",
                "Seja cordial e direto, em tom de conversa. Use parágrafos curtos.",
            ),
            ResponseFormat::Channel => (
                "Você responde dúvidas de colegas em um canal de mensagens.",
                "Seja breve e informal. Sem títulos, sem listas longas, no máximo um emoji.",
            ),
            ResponseFormat::Formal => (
                "Você redige respostas oficiais do time de suporte interno.",
                "Use linguagem formal e estruturada, com introdução, orientações e conclusão.",
            ),
        };
        format!(
            "{}\n{}\nLimite a resposta a {} palavras.",
            role,
            tone,
            self.word_limit()
        )
    }
}

// =============================================================================
// PromptBuilder
// =============================================================================

/// Builds the outbound prompt for a provider.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    /// Question/answer turns of history to include.
    history_turns: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(3)
    }
}

impl PromptBuilder {
    pub fn new(history_turns: usize) -> Self {
        Self { history_turns }
    }

    pub fn build(
        &self,
        question: &str,
        context: &HybridSearchResult,
        history: &[HistoryEntry],
        format: ResponseFormat,
    ) -> String {
        let mut prompt = format.persona();
        prompt.push_str("\n\n");
        prompt.push_str(&self.context_block(context, history));
        let _ = write!(prompt, "\n\nPERGUNTA ATUAL:\n{}\n\n", question.trim());
        prompt.push_str(&Self::instructions(context.has_results));
        prompt
    }

    /// The trailing `history_turns` turns, oldest first.
    pub fn history_tail<'a>(&self, history: &'a [HistoryEntry]) -> &'a [HistoryEntry] {
        let keep = self.history_turns * 2;
        &history[history.len().saturating_sub(keep)..]
    }

    fn context_block(&self, context: &HybridSearchResult, history: &[HistoryEntry]) -> String {
        let mut block = String::from("CONTEXTO DISPONÍVEL:\n");

        match &context.faq {
            Some(faq) => {
                let _ = writeln!(block, "{}", format_faq(faq));
            }
            None => block.push_str("[FAQ] Nenhuma pergunta frequente correspondente.\n"),
        }

        if context.articles.is_empty() {
            block.push_str("[ARTIGOS] Nenhum artigo relacionado.\n");
        } else {
            for (i, article) in context.articles.iter().enumerate() {
                let _ = writeln!(block, "{}", format_article(i + 1, article));
            }
        }

        let tail = self.history_tail(history);
        if !tail.is_empty() {
            block.push_str("\nCONVERSA RECENTE:\n");
            for entry in tail {
                let speaker = match entry.role {
                    ChatRole::User => "Usuário",
                    ChatRole::Assistant => "Assistente",
                };
                let _ = writeln!(block, "{}: {}", speaker, entry.content);
            }
        }

        block
    }

    fn instructions(has_results: bool) -> String {
        let mut text = String::from(
            "INSTRUÇÕES:\n\
             - Responda usando apenas o contexto disponível acima.\n\
             - Não invente prazos, valores, nomes ou procedimentos.\n\
             - Se a conversa recente ajudar a entender a pergunta, considere-a.\n",
        );
        if has_results {
            text.push_str("- Priorize a FAQ quando ela existir; use os artigos como complemento.\n");
        } else {
            text.push_str(
                "- Não há contexto relevante: diga que não encontrou a informação \
                 e sugira procurar o time de suporte.\n",
            );
        }
        text
    }
}

fn format_faq(faq: &RelevanceResult) -> String {
    format!(
        "[FAQ | relevância {:.2}] {}\nResposta: {}",
        faq.score, faq.record.title, faq.record.body
    )
}

fn format_article(position: usize, article: &RelevanceResult) -> String {
    let excerpt: String = article.record.body.chars().take(ARTICLE_EXCERPT_CHARS).collect();
    let category = article
        .record
        .category
        .as_deref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default();
    format!(
        "[ARTIGO {} | relevância {:.2}] {}{}\n{}",
        position, article.score, article.record.title, category, excerpt
    )
}

// =============================================================================
// Quality heuristics
// =============================================================================

/// Advisory quality signals for a generated response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseQuality {
    /// Short and built around a generic "don't know" phrase.
    pub too_short_generic: bool,
    /// Longer than the response ceiling.
    pub too_long: bool,
    pub low_quality: bool,
}

/// Flag responses worth a second look in the logs. Never rejects.
pub fn assess_response(text: &str) -> ResponseQuality {
    let chars = text.chars().count();
    let lower = text.to_lowercase();
    let too_short_generic =
        chars < SHORT_RESPONSE_CHARS && GENERIC_PHRASES.iter().any(|p| lower.contains(p));
    let too_long = chars > LONG_RESPONSE_CHARS;
    ResponseQuality {
        too_short_generic,
        too_long,
        low_quality: too_short_generic || too_long,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::KnowledgeRecord;

    fn history(n: usize) -> Vec<HistoryEntry> {
        (0..n)
            .map(|i| HistoryEntry {
                role: if i % 2 == 0 {
                    ChatRole::User
                } else {
                    ChatRole::Assistant
                },
                content: format!("mensagem {}", i),
            })
            .collect()
    }

    fn context_with_faq() -> HybridSearchResult {
        let faq = RelevanceResult::new(
            KnowledgeRecord::faq("f1", "prazo PIX", "Até 24 horas úteis."),
            0.82,
        );
        let article = RelevanceResult::new(
            KnowledgeRecord::article("a1", "Guia PIX", "Passo a passo completo").with_category("Financeiro"),
            0.41,
        );
        HybridSearchResult {
            faq: Some(faq),
            articles: vec![article],
            has_results: true,
        }
    }

    fn empty_context() -> HybridSearchResult {
        HybridSearchResult {
            faq: None,
            articles: vec![],
            has_results: false,
        }
    }

    // ---- ResponseFormat ----

    #[test]
    fn test_format_from_name_aliases() {
        assert_eq!(ResponseFormat::from_name("chat"), Some(ResponseFormat::Chat));
        assert_eq!(ResponseFormat::from_name(" WhatsApp "), Some(ResponseFormat::Channel));
        assert_eq!(ResponseFormat::from_name("email"), Some(ResponseFormat::Formal));
        assert_eq!(ResponseFormat::from_name("telegraph"), None);
    }

    #[test]
    fn test_format_word_limits_are_ordered() {
        assert!(ResponseFormat::Channel.word_limit() < ResponseFormat::Chat.word_limit());
        assert!(ResponseFormat::Chat.word_limit() < ResponseFormat::Formal.word_limit());
        assert_eq!(ResponseFormat::default(), ResponseFormat::Chat);
    }

    // ---- PromptBuilder ----

    #[test]
    fn test_prompt_section_order() {
        let prompt = PromptBuilder::default().build(
            "qual o prazo do pix?",
            &context_with_faq(),
            &history(2),
            ResponseFormat::Chat,
        );
        let persona = prompt.find("assistente virtual").unwrap();
        let context = prompt.find("CONTEXTO DISPONÍVEL").unwrap();
        let recent = prompt.find("CONVERSA RECENTE").unwrap();
        let question = prompt.find("PERGUNTA ATUAL").unwrap();
        let instructions = prompt.find("INSTRUÇÕES").unwrap();
        assert!(persona < context);
        assert!(context < recent);
        assert!(recent < question);
        assert!(question < instructions);
    }

    #[test]
    fn test_prompt_includes_scores_and_category() {
        let prompt = PromptBuilder::default().build(
            "prazo pix",
            &context_with_faq(),
            &[],
            ResponseFormat::Formal,
        );
        assert!(prompt.contains("relevância 0.82"));
        assert!(prompt.contains("relevância 0.41"));
        assert!(prompt.contains("Até 24 horas úteis."));
        assert!(prompt.contains("Guia PIX (Financeiro)"));
        assert!(prompt.contains("250 palavras"));
        assert!(!prompt.contains("CONVERSA RECENTE"));
    }

    #[test]
    fn test_prompt_without_context_tells_model_to_admit_it() {
        let prompt =
            PromptBuilder::default().build("impressora", &empty_context(), &[], ResponseFormat::Channel);
        assert!(prompt.contains("Nenhuma pergunta frequente"));
        assert!(prompt.contains("Nenhum artigo relacionado"));
        assert!(prompt.contains("não encontrou a informação"));
        assert!(prompt.contains("60 palavras"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let builder = PromptBuilder::default();
        let a = builder.build("x", &context_with_faq(), &history(4), ResponseFormat::Chat);
        let b = builder.build("x", &context_with_faq(), &history(4), ResponseFormat::Chat);
        assert_eq!(a, b);
    }

    #[test]
    fn test_history_tail_keeps_last_three_turns() {
        let builder = PromptBuilder::default();
        let all = history(10);
        let tail = builder.history_tail(&all);
        assert_eq!(tail.len(), 6);
        assert_eq!(tail[0].content, "mensagem 4");
        assert_eq!(tail[5].content, "mensagem 9");

        let short = history(3);
        assert_eq!(builder.history_tail(&short).len(), 3);
        assert!(PromptBuilder::new(0).history_tail(&all).is_empty());
    }

    #[test]
    fn test_prompt_only_includes_history_tail() {
        let prompt = PromptBuilder::default().build(
            "x",
            &empty_context(),
            &history(10),
            ResponseFormat::Chat,
        );
        assert!(!prompt.contains("mensagem 3\n"));
        assert!(prompt.contains("Usuário: mensagem 4"));
        assert!(prompt.contains("Assistente: mensagem 9"));
    }

    #[test]
    fn test_article_excerpt_is_truncated() {
        let long_body = "x".repeat(ARTICLE_EXCERPT_CHARS * 2);
        let context = HybridSearchResult {
            faq: None,
            articles: vec![RelevanceResult::new(
                KnowledgeRecord::article("a", "Longo", long_body),
                0.5,
            )],
            has_results: true,
        };
        let prompt = PromptBuilder::default().build("x", &context, &[], ResponseFormat::Chat);
        assert!(!prompt.contains(&"x".repeat(ARTICLE_EXCERPT_CHARS + 1)));
        assert!(prompt.contains(&"x".repeat(ARTICLE_EXCERPT_CHARS)));
    }

    // ---- Quality ----

    #[test]
    fn test_assess_short_generic() {
        let q = assess_response("Desculpe, não sei responder.");
        assert!(q.too_short_generic);
        assert!(q.low_quality);
        assert!(!q.too_long);
    }

    #[test]
    fn test_assess_short_but_specific_is_fine() {
        let q = assess_response("O PIX é liberado em até 24h.");
        assert_eq!(q, ResponseQuality::default());
    }

    #[test]
    fn test_assess_long_generic_is_not_short_generic() {
        let text = format!("Não sei exatamente, mas {}", "veja o guia. ".repeat(5));
        let q = assess_response(&text);
        assert!(!q.too_short_generic);
    }

    #[test]
    fn test_assess_too_long() {
        let q = assess_response(&"a".repeat(501));
        assert!(q.too_long);
        assert!(q.low_quality);
        assert!(!assess_response(&"a".repeat(500)).too_long);
    }
}
