//! Shared application state.
//!
//! [`AppState`] is the single handle the routes see. Every read and write of
//! the [`Engine`] goes through one `tokio::sync::Mutex`; views are copied out
//! under the lock and built after it is released, and persistence writes
//! happen only once the lock has been dropped. Writes are ordered by the
//! engine generation they were copied at, so an older copy never replaces a
//! newer one on disk.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::history::{Clock, HistoryLimits, SystemClock};
use crate::ingest::{Engine, IngestAck, IngestError};
use crate::models::{Event, EventCategory, Severity};
use crate::persistence::{PersistError, PersistJob, PersistenceGateway};
use crate::view::{build_view, ViewPayload};

/// Compact history numbers for the health operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub day_key: String,
    pub day_count: usize,
    pub counts: BTreeMap<&'static str, usize>,
}

/// Liveness details reported by the health operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub has_data: bool,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_payload_bytes: Option<usize>,
    pub persist_failures: u64,
    pub history: HistorySummary,
}

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Mutex<Engine>>,
    clock: Arc<dyn Clock>,
    gateway: PersistenceGateway,
    config: Arc<Config>,
    persist_failures: Arc<AtomicU64>,
    /// Generation of the last copy written to disk.
    persisted: Arc<Mutex<u64>>,
}

impl AppState {
    /// Fresh state with nothing loaded from disk.
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        // ---
        let engine = Engine::new(&config, clock.now());
        let gateway = PersistenceGateway::new(config.storage_dir.clone());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            clock,
            gateway,
            config: Arc::new(config),
            persist_failures: Arc::new(AtomicU64::new(0)),
            persisted: Arc::new(Mutex::new(0)),
        }
    }

    /// State primed from whatever the storage directory holds.
    pub async fn boot(config: Config, clock: Arc<dyn Clock>) -> Self {
        // ---
        let state = Self::new(config, clock);
        let limits = HistoryLimits {
            max_samples: state.config.series_max_samples,
            max_days: state.config.history_max_days,
        };
        let history = if state.config.persist_history {
            state.gateway.load_history(limits).await
        } else {
            None
        };
        let latest = state.gateway.load_latest().await;

        let now = state.clock.now();
        let mut engine = state.engine.lock().await;
        if let Some(history) = history {
            tracing::info!(
                today = %history.today.key,
                days = history.days.len(),
                "restored history"
            );
            engine.restore_history(history);
        }
        if let Some(latest) = &latest {
            tracing::info!(received_at = %latest.received_at, bytes = latest.bytes, "restored latest payload");
            engine.prime(latest);
        }
        engine.record_event(Event::new(
            now,
            EventCategory::System,
            Severity::Info,
            if latest.is_some() {
                "service started from persisted state"
            } else {
                "service started cold"
            },
        ));
        drop(engine);
        state
    }

    /// Convenience constructor using the system clock.
    pub async fn boot_with_system_clock(config: Config) -> Self {
        Self::boot(config, Arc::new(SystemClock)).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse, ingest, then persist outside the lock.
    ///
    /// Persistence failures are logged and audited but never change the
    /// result returned to the caller.
    pub async fn ingest(&self, body: &[u8]) -> Result<IngestAck, IngestError> {
        // ---
        let bytes = body.len();

        let job = {
            let mut engine = self.engine.lock().await;
            let now = self.clock.now();
            let payload: Value = match serde_json::from_slice(body) {
                Ok(payload) => payload,
                Err(err) => {
                    let err = IngestError::InvalidJson(err.to_string());
                    engine.reject(&err, bytes, now);
                    return Err(err);
                }
            };
            let ack = engine.ingest(&payload, bytes, now)?;
            (ack, engine.persist_job())
        };

        let (ack, job) = job;
        self.persist(&job).await;
        Ok(ack)
    }

    /// The served view, or `None` before any telemetry arrived.
    pub async fn view(&self) -> Option<ViewPayload> {
        // ---
        let snapshot = {
            let engine = self.engine.lock().await;
            if !engine.snapshot().has_data() {
                return None;
            }
            engine.snapshot().clone()
        };
        Some(build_view(snapshot, self.clock.now()))
    }

    pub async fn summary(&self) -> StateSummary {
        // ---
        let engine = self.engine.lock().await;
        let snapshot = engine.snapshot();
        let history = &snapshot.history;
        StateSummary {
            has_data: snapshot.has_data(),
            last_ingest_at: snapshot.last_ingest_at,
            last_payload_bytes: snapshot.last_payload_bytes,
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            history: HistorySummary {
                day_key: history.today.key.clone(),
                day_count: history.days.len(),
                counts: history
                    .counts()
                    .into_iter()
                    .map(|(name, n)| (name.as_str(), n))
                    .collect(),
            },
        }
    }

    /// Write the current state, e.g. on shutdown.
    pub async fn flush(&self) {
        // ---
        let job = self.engine.lock().await.persist_job();
        if job.latest.is_none() && job.history.is_none() {
            return;
        }
        self.persist(&job).await;
    }

    async fn persist(&self, job: &PersistJob) {
        // ---
        let mut persisted = self.persisted.lock().await;
        if job.generation < *persisted {
            tracing::debug!(
                generation = job.generation,
                persisted = *persisted,
                "skipping stale persist job"
            );
            return;
        }
        match self.gateway.save(job).await {
            Ok(()) => *persisted = job.generation,
            Err(err) => {
                drop(persisted);
                self.record_persist_failure(&err).await;
            }
        }
    }

    async fn record_persist_failure(&self, err: &PersistError) {
        // ---
        let failures = self.persist_failures.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::error!(
            dir = %self.gateway.dir().display(),
            error = %err,
            failures,
            "failed to persist state"
        );
        let event = Event::new(
            self.clock.now(),
            EventCategory::Persistence,
            Severity::Warn,
            "failed to persist state",
        )
        .with_detail(json!({ "error": err.to_string(), "failures": failures }));
        self.engine.lock().await.record_event(event);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::history::ManualClock;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn create_test_config(dir: &std::path::Path) -> Config {
        Config {
            storage_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    fn create_test_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_view_is_none_until_first_ingest() {
        // ---
        let dir = tempdir().unwrap();
        let state = AppState::boot(create_test_config(dir.path()), create_test_clock()).await;
        assert!(state.view().await.is_none());

        state.ingest(br#"{"lux": 500}"#).await.unwrap();
        let view = state.view().await.expect("ready after ingest");
        assert_eq!(view.environment.lux, Some(500.0));
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected_and_audited() {
        // ---
        let dir = tempdir().unwrap();
        let state = AppState::boot(create_test_config(dir.path()), create_test_clock()).await;

        let err = state.ingest(b"{ nope").await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidJson(_)));
        assert!(!state.summary().await.has_data);

        let engine = state.engine.lock().await;
        let last = engine.snapshot().events.last().unwrap();
        assert_eq!(last.severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_ingest() {
        // ---
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let state = AppState::boot(create_test_config(&blocker.join("sub")), create_test_clock()).await;

        let ack = state.ingest(br#"{"temperature": 18}"#).await.unwrap();
        assert!(ack.ok);

        let summary = state.summary().await;
        assert_eq!(summary.persist_failures, 1);
        assert!(summary.has_data);

        let engine = state.engine.lock().await;
        let last = engine.snapshot().events.last().unwrap();
        assert_eq!(last.category, EventCategory::Persistence);
    }

    #[tokio::test]
    async fn test_restart_restores_equivalent_state() {
        // ---
        let dir = tempdir().unwrap();
        let clock = create_test_clock();
        let state = AppState::boot(create_test_config(dir.path()), clock.clone()).await;
        for i in 0..5 {
            clock.advance(Duration::seconds(30));
            let body = format!(r#"{{"temperature": {}, "humidity": 40, "lux": 20000, "duty": 90}}"#, 20 + i);
            state.ingest(body.as_bytes()).await.unwrap();
        }
        let before = state.view().await.unwrap();

        let restarted = AppState::boot(create_test_config(dir.path()), clock.clone()).await;
        let after = restarted.view().await.unwrap();

        assert_eq!(after.environment, before.environment);
        assert_eq!(after.device, before.device);
        assert_eq!(after.energy, before.energy);
        assert_eq!(after.history, before.history);
        assert_eq!(after.last_ingest_at, before.last_ingest_at);
        assert_eq!(after.last_payload_bytes, before.last_payload_bytes);
        assert_eq!(after.status, before.status);
    }

    #[tokio::test]
    async fn test_summary_reports_history_counts() {
        // ---
        let dir = tempdir().unwrap();
        let state = AppState::boot(create_test_config(dir.path()), create_test_clock()).await;
        state.ingest(br#"{"temperature": 18, "lux": 5}"#).await.unwrap();

        let summary = state.summary().await;
        assert_eq!(summary.history.day_key, "2025-06-01");
        assert_eq!(summary.history.day_count, 0);
        assert_eq!(summary.history.counts["temperature"], 1);
        assert_eq!(summary.history.counts["lux"], 1);
        assert_eq!(summary.history.counts["energy_out"], 1);
    }

    #[tokio::test]
    async fn test_stale_persist_job_never_overwrites_newer() {
        // ---
        let dir = tempdir().unwrap();
        let clock = create_test_clock();
        let state = AppState::boot(create_test_config(dir.path()), clock.clone()).await;

        state.ingest(br#"{"temperature": 10}"#).await.unwrap();
        let stale = state.engine.lock().await.persist_job();
        clock.advance(Duration::seconds(30));
        state.ingest(br#"{"temperature": 11}"#).await.unwrap();

        // The older copy finishing last must leave the newer one on disk
        state.persist(&stale).await;

        let latest = state.gateway.load_latest().await.expect("latest on disk");
        assert_eq!(latest.payload, json!({ "temperature": 11 }));
        let history = state.gateway.load_history(HistoryLimits::default()).await.unwrap();
        assert_eq!(history.today.series.temperature.len(), 2);
        assert_eq!(state.summary().await.persist_failures, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingests_are_serialized() {
        // ---
        let dir = tempdir().unwrap();
        let state = AppState::boot(create_test_config(dir.path()), create_test_clock()).await;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                tokio::spawn(async move {
                    let body = format!(r#"{{"temperature": {i}}}"#);
                    state.ingest(body.as_bytes()).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let engine = state.engine.lock().await;
        let snapshot = engine.snapshot();
        let mut seen: Vec<f64> = snapshot.history.today.series.temperature.iter().map(|s| s.v).collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, (0..8).map(f64::from).collect::<Vec<_>>());
        assert_eq!(engine.persist_job().generation, 8);
        let in_memory = snapshot.last_payload.clone();
        drop(engine);

        let on_disk = state.gateway.load_latest().await.expect("latest on disk");
        assert_eq!(Some(on_disk.payload), in_memory);
    }
}
