//! Audit sinks for answered questions.

use std::sync::Mutex;

use async_trait::async_trait;
use concierge_core::AuditEntry;
use tokio::sync::Notify;
use tracing::info;

use crate::error::ChatError;

/// Destination for `{timestamp, user_id, question, source_label}` rows.
///
/// The engine calls `record` on a detached task bounded by a timeout and only
/// logs its error; a failing or stalled sink never affects the answer.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), ChatError>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _entry: AuditEntry) -> Result<(), ChatError> {
        Ok(())
    }
}

/// Emits each entry as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), ChatError> {
        info!(
            target: "concierge::audit",
            timestamp = %entry.timestamp.to_rfc3339(),
            user_id = %entry.user_id,
            source = %entry.source_label,
            question = %entry.question,
            "Question answered"
        );
        Ok(())
    }
}

/// Keeps entries in memory for later inspection.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    recorded: Notify,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait until at least `count` entries have been recorded.
    pub async fn wait_for(&self, count: usize) -> Vec<AuditEntry> {
        loop {
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            // Register before checking so a record in between is not missed.
            notified.as_mut().enable();
            let entries = self.entries();
            if entries.len() >= count {
                return entries;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), ChatError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        self.recorded.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(label: &str) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            user_id: "ana".to_string(),
            question: "prazo do pix?".to_string(),
            source_label: label.to_string(),
        }
    }

    #[tokio::test]
    async fn test_recording_sink_keeps_order() {
        let sink = RecordingAuditSink::new();
        sink.record(entry("faq")).await.unwrap();
        sink.record(entry("ai")).await.unwrap();
        let labels: Vec<String> = sink.entries().into_iter().map(|e| e.source_label).collect();
        assert_eq!(labels, vec!["faq", "ai"]);
    }

    #[tokio::test]
    async fn test_wait_for_returns_once_count_reached() {
        let sink = std::sync::Arc::new(RecordingAuditSink::new());
        let writer = sink.clone();
        tokio::spawn(async move {
            writer.record(entry("faq")).await.unwrap();
            writer.record(entry("ai")).await.unwrap();
        });
        let entries = tokio::time::timeout(std::time::Duration::from_secs(1), sink.wait_for(2))
            .await
            .expect("entries should arrive");
        assert_eq!(entries.len(), 2);
        assert_eq!(sink.wait_for(1).await.len(), 2);
    }

    #[tokio::test]
    async fn test_noop_and_tracing_sinks_accept() {
        assert!(NoopAuditSink.record(entry("faq")).await.is_ok());
        assert!(TracingAuditSink.record(entry("fallback")).await.is_ok());
    }
}
