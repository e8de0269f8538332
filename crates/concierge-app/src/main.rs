//! Concierge binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Build the knowledge source (JSON export or empty)
//! 3. Build both AI providers from config and environment keys
//! 4. Assemble the answer engine and start the session sweep
//! 5. Run the requested subcommand

mod cli;

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use concierge_chat::{
    AnswerEngine, AnswerRequest, ChatError, JsonFileKnowledgeSource, KnowledgeSource,
    MemoryKnowledgeSource, OpenAiCompatibleProvider, ResponseFormat, TracingAuditSink,
};
use concierge_core::logging::init_tracing;
use concierge_core::{ConciergeConfig, SystemClock};

use cli::{CliArgs, Command};

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_format(name: Option<&str>) -> Result<Option<ResponseFormat>, Box<dyn std::error::Error>> {
    match name {
        None => Ok(None),
        Some(n) => ResponseFormat::from_name(n)
            .map(Some)
            .ok_or_else(|| format!("unknown format '{}': use chat, channel or formal", n).into()),
    }
}

/// Answer stdin lines until EOF, keeping one session for the whole run.
async fn chat_loop(
    engine: &AnswerEngine,
    user: String,
    format: Option<ResponseFormat>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session_id: Option<String> = None;

    while let Some(line) = lines.next_line().await? {
        let request = AnswerRequest {
            question: line,
            user_id: user.clone(),
            session_id: session_id.clone(),
            format,
            primary: None,
        };
        match engine.answer(request).await {
            Ok(response) => {
                session_id = Some(response.session_id.clone());
                println!("{}", serde_json::to_string(&response)?);
            }
            Err(ChatError::EmptyQuestion) => continue,
            Err(e) => tracing::warn!(error = %e, "Question rejected"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = ConciergeConfig::load_or_default(&config_file);

    // Tracing.
    init_tracing(&args.resolve_log_level(&config.general.log_level));
    tracing::info!(path = %config_file.display(), "Starting Concierge v{}", env!("CARGO_PKG_VERSION"));

    // Knowledge source.
    let source: Arc<dyn KnowledgeSource> =
        match args.resolve_knowledge_path(config.knowledge.source_path.as_deref()) {
            Some(path) => {
                tracing::info!(path = %path.display(), "Using JSON knowledge export");
                Arc::new(JsonFileKnowledgeSource::new(path))
            }
            None => {
                tracing::warn!("No knowledge source configured; answers will have no context");
                Arc::new(MemoryKnowledgeSource::default())
            }
        };

    // Providers.
    let primary = Arc::new(OpenAiCompatibleProvider::from_settings(
        &config.providers.primary,
    ));
    let secondary = Arc::new(OpenAiCompatibleProvider::from_settings(
        &config.providers.secondary,
    ));

    let engine = AnswerEngine::new(
        &config,
        source,
        primary,
        secondary,
        Arc::new(TracingAuditSink),
        Arc::new(SystemClock),
    );
    let cleanup = engine.start_session_cleanup();

    match args.command {
        Command::Ask {
            question,
            user,
            session,
            format,
            primary,
        } => {
            let request = AnswerRequest {
                question,
                user_id: user,
                session_id: session,
                format: parse_format(format.as_deref())?,
                primary,
            };
            let response = engine.answer(request).await?;
            print_json(&response)?;
        }
        Command::Chat { user, format } => {
            let format = parse_format(format.as_deref())?;
            chat_loop(&engine, user, format).await?;
        }
        Command::Health => {
            let report = engine.check_health().await;
            print_json(&report)?;
        }
        Command::Status => {
            // Warm the mirror so the snapshot reflects the source.
            let _ = tokio::join!(engine.knowledge().faqs(), engine.knowledge().articles());
            print_json(&engine.status())?;
        }
    }

    cleanup.shutdown().await;
    Ok(())
}
