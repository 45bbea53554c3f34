//! Build event journal
//!
//! Appends JSON lines to `~/.local/state/buildwright/events.log`: probe
//! results, selections, cache hits and misses, invocation outcomes and the
//! final outcome of each run.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Append-only JSON-lines journal
pub struct EventLog {
    enabled: bool,
    path: PathBuf,
    // Serialises appends from concurrent resolutions
    write: Mutex<()>,
}

impl EventLog {
    /// Journal at the default state path, enabled per config
    pub fn new(config: &Config) -> Self {
        Self::at(ConfigManager::event_log_path(), config.general.event_log)
    }

    pub fn at(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `event` for run `run_id`.
    ///
    /// Failures are logged and dropped; the journal never fails a build.
    pub async fn record(&self, run_id: Uuid, event: &str, data: serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "run_id": run_id,
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize build event: {}", e);
                return;
            }
        };
        line.push('\n');

        let _guard = self.write.lock().await;
        if let Err(e) = self.append(&line).await {
            warn!("Failed to write event journal {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_json_line() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::at(dir.path().join("events.log"), true);
        let run = Uuid::new_v4();

        log.record(run, "cache.hit", serde_json::json!({"dependency": "fmt@10.2.1"}))
            .await;

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["event"], "cache.hit");
        assert_eq!(parsed["run_id"], run.to_string());
        assert_eq!(parsed["data"]["dependency"], "fmt@10.2.1");
    }

    #[tokio::test]
    async fn skips_when_disabled() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::at(dir.path().join("events.log"), false);
        log.record(Uuid::new_v4(), "run.started", serde_json::json!({})).await;
        assert!(!log.path().exists());
    }

    #[tokio::test]
    async fn unwritable_path_only_warns() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        // Parent is a regular file, so the append fails
        let log = EventLog::at(blocker.join("events.log"), true);
        log.record(Uuid::new_v4(), "run.started", serde_json::json!({})).await;
        assert!(!blocker.join("events.log").exists());
    }
}
