//! CLI argument definitions for the Concierge binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Concierge: answers internal questions from a FAQ/article knowledge base.
#[derive(Parser, Debug)]
#[command(name = "concierge", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// JSON knowledge export, overriding `knowledge.source_path`.
    #[arg(short = 'k', long = "knowledge", global = true)]
    pub knowledge: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Answer one question and print the response as JSON.
    Ask {
        #[arg(short = 'q', long)]
        question: String,
        #[arg(short = 'u', long, default_value = "cli")]
        user: String,
        /// Resume an existing session.
        #[arg(short = 's', long)]
        session: Option<String>,
        /// chat, channel or formal.
        #[arg(short = 'f', long)]
        format: Option<String>,
        /// Provider to try first.
        #[arg(short = 'p', long)]
        primary: Option<String>,
    },
    /// Read questions from stdin, one per line, in a single session.
    Chat {
        #[arg(short = 'u', long, default_value = "cli")]
        user: String,
        #[arg(short = 'f', long)]
        format: Option<String>,
    },
    /// Probe both providers and print the health report.
    Health,
    /// Print knowledge cache and session diagnostics.
    Status,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CONCIERGE_CONFIG env var > ~/.concierge/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CONCIERGE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Priority: --knowledge flag > config file value.
    pub fn resolve_knowledge_path(&self, config_path: Option<&str>) -> Option<PathBuf> {
        self.knowledge
            .clone()
            .or_else(|| config_path.map(PathBuf::from))
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    PathBuf::from("config.toml")
}
