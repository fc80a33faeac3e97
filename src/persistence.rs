//! Best-effort persistence of the latest payload and the history.
//!
//! Two independent JSON documents live in the storage directory:
//! - `latest.json`: the last accepted raw payload, used to prime state at boot
//! - `history.json`: today's record plus closed days
//!
//! Writes go to a temporary file that is renamed into place. A missing or
//! unreadable document at boot is a cold start, not an error.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::history::{History, HistoryLimits};

pub const LATEST_FILE: &str = "latest.json";
pub const HISTORY_FILE: &str = "history.json";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The `latest.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestSnapshot {
    pub received_at: DateTime<Utc>,
    pub bytes: usize,
    pub payload: Value,
}

/// Immutable copies taken under the state lock, written after it is released.
#[derive(Debug, Clone, Default)]
pub struct PersistJob {
    /// Engine generation the copies were taken at.
    pub generation: u64,
    pub latest: Option<LatestSnapshot>,
    pub history: Option<History>,
}

#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    dir: PathBuf,
}

impl PersistenceGateway {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every document present in `job`.
    pub async fn save(&self, job: &PersistJob) -> Result<(), PersistError> {
        // ---
        tokio::fs::create_dir_all(&self.dir).await?;

        if let Some(latest) = &job.latest {
            let bytes = serde_json::to_vec_pretty(latest)?;
            self.write_atomic(LATEST_FILE, &bytes).await?;
        }
        if let Some(history) = &job.history {
            let bytes = serde_json::to_vec(history)?;
            self.write_atomic(HISTORY_FILE, &bytes).await?;
        }
        Ok(())
    }

    pub async fn load_latest(&self) -> Option<LatestSnapshot> {
        self.load_json(LATEST_FILE).await
    }

    pub async fn load_history(&self, limits: HistoryLimits) -> Option<History> {
        self.load_json::<History>(HISTORY_FILE)
            .await
            .map(|history| history.with_limits(limits))
    }

    async fn load_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        // ---
        let path = self.dir.join(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no persisted document, cold start");
                return None;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read persisted document");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unparsable persisted document");
                None
            }
        }
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
        // ---
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.{}.tmp", Uuid::new_v4()));
        if let Err(err) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }
}
