//! Durable local action-result cache (§4.6, §6 `state/actions.db`).
//!
//! A plan redelivered after a crash or a lease takeover must never repeat a
//! side-effecting provider call. This is the idempotency guard: every
//! completed action's outcome is appended to a JSON-lines file before the
//! result is reported upstream, and looked up by operation id before the
//! executor dispatches to the provider at all.
//!
//! Structurally this mirrors a write-ahead append-only log the way the
//! reference codebase's file-backed audit sink does: open once, hold the
//! handle behind a mutex, `write_all` then `flush` per entry. The
//! difference is this store also keeps an in-memory index built by
//! replaying the file once at open time, since — unlike an audit sink —
//! every record here is read back before the next write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};

/// The recorded outcome of one executed action (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub operation_id: String,
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Durable `operation_id -> ActionResult` map backed by an append-only
/// JSON-lines file.
pub struct ActionStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, ActionResult>>,
    writer: Mutex<Option<tokio::fs::File>>,
}

impl ActionStore {
    /// Open (or create) the store at `path`, replaying any existing
    /// entries into the in-memory index.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut cache = HashMap::new();

        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ActionResult>(line) {
                    Ok(result) => {
                        cache.insert(result.operation_id.clone(), result);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping corrupt action-cache line");
                    }
                }
            }
        }

        Ok(Self {
            path,
            cache: Mutex::new(cache),
            writer: Mutex::new(None),
        })
    }

    /// Look up a previously recorded result for `operation_id`, the
    /// idempotency guard of §4.6 step 1.
    pub async fn get(&self, operation_id: &str) -> Option<ActionResult> {
        self.cache.lock().await.get(operation_id).cloned()
    }

    /// Durably record `result`, then update the in-memory index.
    pub async fn record(&self, result: ActionResult) -> Result<()> {
        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');

        {
            let mut guard = self.writer.lock().await;
            if guard.is_none() {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                *guard = Some(file);
            }
            let file = guard.as_mut().ok_or_else(|| {
                AgentError::Runtime("action store file handle unexpectedly absent".to_owned())
            })?;
            file.write_all(&line).await?;
            file.flush().await?;
        }

        self.cache
            .lock()
            .await
            .insert(result.operation_id.clone(), result);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_readable_after_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("actions.db");

        let store = ActionStore::open(&path).await.expect("open");
        let now = Utc::now();
        store
            .record(ActionResult {
                operation_id: "op-1".to_owned(),
                ok: true,
                error_code: None,
                message: None,
                started_at: now,
                finished_at: now,
            })
            .await
            .expect("record");

        let reopened = ActionStore::open(&path).await.expect("reopen");
        let cached = reopened.get("op-1").await.expect("cached result present");
        assert!(cached.ok);
        assert!(reopened.get("op-missing").await.is_none());
    }

    #[tokio::test]
    async fn distinct_operations_do_not_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("actions.db");
        let store = ActionStore::open(&path).await.expect("open");
        let now = Utc::now();

        for (id, ok) in [("op-a", true), ("op-b", false)] {
            store
                .record(ActionResult {
                    operation_id: id.to_owned(),
                    ok,
                    error_code: if ok { None } else { Some("ACTION_FAILED".to_owned()) },
                    message: None,
                    started_at: now,
                    finished_at: now,
                })
                .await
                .expect("record");
        }

        assert!(store.get("op-a").await.expect("present").ok);
        assert!(!store.get("op-b").await.expect("present").ok);
    }
}
