//! Durable alert bookkeeping.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::AlertError;

/// Persisted alert state: one JSON document per deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    #[serde(default)]
    pub webhook_missing_streak: u32,
    /// Alert key to the unix time (ms) it was last delivered.
    #[serde(default)]
    pub last_alerts: BTreeMap<String, i64>,
}

/// Reads and writes `AlertState` at a fixed path.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// readers never see a torn document. Read-modify-write cycles are NOT
/// coordinated across processes: two instances updating at the same time can
/// lose one update (a skipped streak increment or a duplicate alert). Within
/// one process the notifier serialises access.
#[derive(Debug, Clone)]
pub struct AlertStateStore {
    path: PathBuf,
}

impl AlertStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state; a missing or unreadable file yields the default state.
    pub async fn load(&self) -> AlertState {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return AlertState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read alert state, starting fresh");
                return AlertState::default();
            }
        };

        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "corrupt alert state, starting fresh");
            AlertState::default()
        })
    }

    /// Persist `state`; failures are logged and swallowed.
    pub async fn save(&self, state: &AlertState) {
        if let Err(e) = self.try_save(state).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist alert state");
        }
    }

    pub async fn try_save(&self, state: &AlertState) -> Result<(), AlertError> {
        let io_err = |source| AlertError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "alert-state".to_string());
        let temp_path = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::now_v7()));

        let written = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_err(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlertStateStore::new(dir.path().join("alerts.json"));
        assert_eq!(store.load().await, AlertState::default());
    }

    #[tokio::test]
    async fn save_then_load_uses_camel_case_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alerts.json");
        let store = AlertStateStore::new(&path);

        let mut state = AlertState::default();
        state.webhook_missing_streak = 3;
        state.last_alerts.insert("sync-failed:full".into(), 1_700_000_000_000);
        store.try_save(&state).await.unwrap();

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["webhookMissingStreak"], 3);
        assert_eq!(json["lastAlerts"]["sync-failed:full"], 1_700_000_000_000i64);
        assert_eq!(store.load().await, state);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert_eq!(AlertStateStore::new(&path).load().await, AlertState::default());
    }

    #[tokio::test]
    async fn unwritable_location_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // Parent "directory" is a regular file, so every write fails.
        let store = AlertStateStore::new(blocker.join("alerts.json"));
        assert!(store.try_save(&AlertState::default()).await.is_err());
        store.save(&AlertState::default()).await;
    }
}
