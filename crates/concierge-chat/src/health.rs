//! Cached provider health probes.
//!
//! Probing is cheap but not free, so results are kept for a fixed window
//! (5 minutes by default) and only re-probed once that window lapses.

use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use concierge_core::{Clock, ProviderHealthRecord, ProviderRole};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::CacheEntry;
use crate::error::ChatError;
use crate::provider::AiProvider;

/// Availability of both providers at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub providers: Vec<ProviderHealthRecord>,
    /// First available provider in configured order.
    pub primary: Option<String>,
    /// The other available provider, if any.
    pub fallback: Option<String>,
}

impl HealthReport {
    pub fn any_available(&self) -> bool {
        self.primary.is_some()
    }

    pub fn is_available(&self, provider: &str) -> bool {
        self.providers
            .iter()
            .any(|p| p.provider == provider && p.available)
    }
}

/// TTL cache in front of live provider probes.
pub struct ProviderHealthCache {
    primary: Arc<dyn AiProvider>,
    secondary: Arc<dyn AiProvider>,
    entry: Mutex<CacheEntry<HealthReport>>,
    /// Held while probing so concurrent misses share one round of probes.
    refresh: tokio::sync::Mutex<()>,
    probe_timeout: StdDuration,
    clock: Arc<dyn Clock>,
}

impl ProviderHealthCache {
    pub fn new(
        primary: Arc<dyn AiProvider>,
        secondary: Arc<dyn AiProvider>,
        ttl: Duration,
        probe_timeout: StdDuration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            primary,
            secondary,
            entry: Mutex::new(CacheEntry::empty(ttl)),
            refresh: tokio::sync::Mutex::new(()),
            probe_timeout,
            clock,
        }
    }

    /// The cached report if still within its TTL.
    pub fn cached(&self) -> Option<HealthReport> {
        let now = self.clock.now();
        self.entry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(now)
            .map(|report| (*report).clone())
    }

    /// Return the cached report, or probe both providers in parallel and
    /// cache the result. Callers arriving during a refresh wait for it.
    pub async fn test_connection(&self) -> HealthReport {
        if let Some(report) = self.cached() {
            debug!("Using cached provider health");
            return report;
        }

        let _refresh = self.refresh.lock().await;
        if let Some(report) = self.cached() {
            debug!("Provider health refreshed by a concurrent caller");
            return report;
        }

        let (first, second) = tokio::join!(
            self.probe_one(&self.primary, ProviderRole::Primary),
            self.probe_one(&self.secondary, ProviderRole::Fallback),
        );

        let providers = vec![first, second];
        let mut available = providers.iter().filter(|p| p.available);
        let primary = available.next().map(|p| p.provider.clone());
        let fallback = available.next().map(|p| p.provider.clone());

        let report = HealthReport {
            checked_at: self.clock.now(),
            providers,
            primary,
            fallback,
        };
        log_summary(&report);

        let now = self.clock.now();
        self.entry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .populate(report.clone(), now);
        report
    }

    /// Forget the cached report so the next call re-probes.
    pub fn invalidate(&self) {
        self.entry.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    async fn probe_one(
        &self,
        provider: &Arc<dyn AiProvider>,
        role: ProviderRole,
    ) -> ProviderHealthRecord {
        let name = provider.name().to_string();
        let result = if !provider.is_configured() {
            Err(ChatError::NotConfigured(name.clone()))
        } else {
            let started = Instant::now();
            match tokio::time::timeout(self.probe_timeout, provider.probe()).await {
                Ok(result) => {
                    debug!(
                        provider = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ok = result.is_ok(),
                        "Provider probed"
                    );
                    result
                }
                Err(_) => Err(ChatError::ProviderTimeout {
                    provider: name.clone(),
                    timeout_ms: self.probe_timeout.as_millis() as u64,
                }),
            }
        };

        if let Err(ref e) = result {
            warn!(provider = %name, error = %e, "Provider probe failed");
        }

        ProviderHealthRecord {
            provider: name,
            model: provider.model().to_string(),
            available: result.is_ok(),
            role,
            last_probed: self.clock.now(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

fn log_summary(report: &HealthReport) {
    match (&report.primary, &report.fallback) {
        (Some(primary), Some(fallback)) => {
            info!(primary = %primary, fallback = %fallback, "AI providers ready");
        }
        (Some(primary), None) => {
            info!(primary = %primary, "AI provider ready with no fallback");
        }
        _ => error!("No AI provider available; answers will use the fallback message"),
    }
}

// =============================================================================
// Tests
// =============================================================================
