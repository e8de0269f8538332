//! Knowledge-base mirror.
//!
//! The durable store is only read when the corresponding [`TtlCache`] misses;
//! between refills every question is served from process memory.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use concierge_core::{Clock, KnowledgeKind, KnowledgeRecord};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheStatus, TtlCache};
use crate::error::ChatError;

/// Read side of the backing document store.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn list_faq_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError>;
    async fn list_article_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError>;
}

// =============================================================================
// Sources
// =============================================================================

/// Fixed in-memory collections, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryKnowledgeSource {
    faqs: Vec<KnowledgeRecord>,
    articles: Vec<KnowledgeRecord>,
}

impl MemoryKnowledgeSource {
    pub fn new(faqs: Vec<KnowledgeRecord>, articles: Vec<KnowledgeRecord>) -> Self {
        Self { faqs, articles }
    }
}

#[async_trait]
impl KnowledgeSource for MemoryKnowledgeSource {
    async fn list_faq_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError> {
        Ok(self.faqs.clone())
    }

    async fn list_article_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError> {
        Ok(self.articles.clone())
    }
}

/// Reads a JSON export of the knowledge base:
///
/// ```json
/// { "faqs": [{ "id": "1", "topic": "...", "context": "...", "keywords": "a, b" }],
///   "articles": [{ "id": "9", "title": "...", "content": "..." }] }
/// ```
///
/// The file is re-read on every call; a record that fails to deserialize is
/// skipped without affecting the others.
#[derive(Debug, Clone)]
pub struct JsonFileKnowledgeSource {
    path: PathBuf,
}

impl JsonFileKnowledgeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_collection(
        &self,
        field: &str,
        kind: KnowledgeKind,
    ) -> Result<Vec<KnowledgeRecord>, ChatError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ChatError::Store(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let document: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            ChatError::Store(format!("invalid JSON in {}: {}", self.path.display(), e))
        })?;

        let Some(items) = document.get(field).and_then(|v| v.as_array()) else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match serde_json::from_value::<KnowledgeRecord>(item.clone()) {
                Ok(mut record) => {
                    record.kind = kind;
                    records.push(record);
                }
                Err(e) => {
                    warn!(collection = field, index, error = %e, "Skipping malformed knowledge record");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl KnowledgeSource for JsonFileKnowledgeSource {
    async fn list_faq_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError> {
        self.read_collection("faqs", KnowledgeKind::Faq).await
    }

    async fn list_article_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError> {
        self.read_collection("articles", KnowledgeKind::Article).await
    }
}

// =============================================================================
// KnowledgeMirror
// =============================================================================

/// Diagnostic view of both knowledge caches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeStatus {
    pub faqs: CacheStatus,
    pub articles: CacheStatus,
}

/// Process-local mirror of the FAQ and article collections.
pub struct KnowledgeMirror {
    source: Arc<dyn KnowledgeSource>,
    faqs: TtlCache<KnowledgeRecord>,
    articles: TtlCache<KnowledgeRecord>,
}

impl KnowledgeMirror {
    pub fn new(
        source: Arc<dyn KnowledgeSource>,
        faq_ttl: Duration,
        article_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            faqs: TtlCache::new("faqs", faq_ttl, Arc::clone(&clock)),
            articles: TtlCache::new("articles", article_ttl, clock),
        }
    }

    /// FAQ records, refilled from the source on cache miss.
    ///
    /// A source failure is logged and yields an empty collection for this
    /// call only.
    pub async fn faqs(&self) -> Arc<Vec<KnowledgeRecord>> {
        if let Some(records) = self.faqs.get() {
            return records;
        }
        let fetched = self.source.list_faq_records().await;
        Self::refill(&self.faqs, fetched)
    }

    /// Article records, refilled from the source on cache miss.
    pub async fn articles(&self) -> Arc<Vec<KnowledgeRecord>> {
        if let Some(records) = self.articles.get() {
            return records;
        }
        let fetched = self.source.list_article_records().await;
        Self::refill(&self.articles, fetched)
    }

    /// Drop both mirrors so the next question re-reads the store.
    pub fn invalidate(&self) {
        self.faqs.clear();
        self.articles.clear();
        info!("Knowledge mirror invalidated");
    }

    pub fn status(&self) -> KnowledgeStatus {
        KnowledgeStatus {
            faqs: self.faqs.status(),
            articles: self.articles.status(),
        }
    }

    fn refill(
        cache: &TtlCache<KnowledgeRecord>,
        fetched: Result<Vec<KnowledgeRecord>, ChatError>,
    ) -> Arc<Vec<KnowledgeRecord>> {
        match fetched {
            Ok(records) => {
                let count = records.len();
                if cache.update(records) {
                    info!(cache = cache.name(), count, "Knowledge mirror refreshed");
                }
                cache.get().unwrap_or_default()
            }
            Err(e) => {
                warn!(cache = cache.name(), error = %e, "Knowledge store read failed");
                Arc::default()
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::ManualClock;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts reads and can be switched into a failing mode.
    struct CountingSource {
        inner: MemoryKnowledgeSource,
        faq_reads: AtomicUsize,
        article_reads: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Self {
            Self {
                inner: MemoryKnowledgeSource::new(
                    vec![KnowledgeRecord::faq("f1", "prazo PIX", "Até 24h")],
                    vec![KnowledgeRecord::article("a1", "Guia PIX", "Como usar")],
                ),
                faq_reads: AtomicUsize::new(0),
                article_reads: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl KnowledgeSource for CountingSource {
        async fn list_faq_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError> {
            self.faq_reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChatError::Store("offline".to_string()));
            }
            self.inner.list_faq_records().await
        }

        async fn list_article_records(&self) -> Result<Vec<KnowledgeRecord>, ChatError> {
            self.article_reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChatError::Store("offline".to_string()));
            }
            self.inner.list_article_records().await
        }
    }

    fn make_mirror(source: Arc<CountingSource>) -> (KnowledgeMirror, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let mirror = KnowledgeMirror::new(
            source,
            Duration::seconds(600),
            Duration::seconds(600),
            clock.clone(),
        );
        (mirror, clock)
    }

    #[tokio::test]
    async fn test_first_access_reads_source() {
        let source = Arc::new(CountingSource::new(false));
        let (mirror, _) = make_mirror(source.clone());
        assert_eq!(mirror.faqs().await.len(), 1);
        assert_eq!(mirror.articles().await.len(), 1);
        assert_eq!(source.faq_reads.load(Ordering::SeqCst), 1);
        assert_eq!(source.article_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hits_within_ttl_do_not_reread() {
        let source = Arc::new(CountingSource::new(false));
        let (mirror, clock) = make_mirror(source.clone());
        let first = mirror.faqs().await;
        clock.advance_secs(300);
        let second = mirror.faqs().await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.faq_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiry_triggers_reread() {
        let source = Arc::new(CountingSource::new(false));
        let (mirror, clock) = make_mirror(source.clone());
        mirror.faqs().await;
        clock.advance_secs(600);
        mirror.faqs().await;
        assert_eq!(source.faq_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_triggers_reread() {
        let source = Arc::new(CountingSource::new(false));
        let (mirror, _) = make_mirror(source.clone());
        mirror.articles().await;
        mirror.invalidate();
        assert!(!mirror.status().articles.has_data);
        mirror.articles().await;
        assert_eq!(source.article_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_source_failure_yields_empty() {
        let source = Arc::new(CountingSource::new(true));
        let (mirror, _) = make_mirror(source.clone());
        assert!(mirror.faqs().await.is_empty());
        assert!(mirror.articles().await.is_empty());
        assert!(!mirror.status().faqs.has_data);
    }

    #[tokio::test]
    async fn test_status_reflects_population() {
        let source = Arc::new(CountingSource::new(false));
        let (mirror, _) = make_mirror(source);
        mirror.faqs().await;
        let status = mirror.status();
        assert!(status.faqs.is_valid);
        assert_eq!(status.faqs.item_count, 1);
        assert!(!status.articles.has_data);
    }

    #[tokio::test]
    async fn test_json_source_reads_both_collections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "faqs": [
                    {{"id": "1", "topic": "prazo PIX liberação", "context": "Até 24h úteis", "keywords": "pix, prazo"}},
                    {{"id": 2, "topic": "id is not a string"}},
                    {{"id": "3", "topic": "Férias", "context": "30 dias"}}
                ],
                "articles": [
                    {{"id": "a1", "title": "Guia de VPN", "content": "Instale o cliente", "category": "TI"}}
                ]
            }}"#
        )
        .unwrap();

        let source = JsonFileKnowledgeSource::new(file.path());
        let faqs = source.list_faq_records().await.unwrap();
        assert_eq!(faqs.len(), 2);
        assert_eq!(faqs[0].keywords, vec!["pix", "prazo"]);
        assert!(faqs.iter().all(|r| r.kind == KnowledgeKind::Faq));

        let articles = source.list_article_records().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].kind, KnowledgeKind::Article);
        assert_eq!(articles[0].category.as_deref(), Some("TI"));
    }

    #[tokio::test]
    async fn test_json_source_missing_collection_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"faqs": []}}"#).unwrap();
        let source = JsonFileKnowledgeSource::new(file.path());
        assert!(source.list_article_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_source_missing_file_is_store_error() {
        let source = JsonFileKnowledgeSource::new("/nonexistent/kb.json");
        let err = source.list_faq_records().await.unwrap_err();
        assert!(matches!(err, ChatError::Store(_)));
    }
}
