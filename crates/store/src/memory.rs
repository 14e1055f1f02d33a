//! In-memory [`SnapshotStore`] implementation.
//!
//! The bundled default for tests, the CLI, and single-process deployments.
//! Runs are keyed by `run_id`; each save replaces the previous snapshot so
//! the store always holds the latest barrier state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{RunRecord, SnapshotStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<Uuid, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs with at least one saved snapshot.
    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_run_snapshot(&self, record: RunRecord) -> Result<(), StoreError> {
        debug!(run_id = %record.run_id, status = %record.status, "saving run snapshot");
        self.runs.write().await.insert(record.run_id, record);
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<RunRecord, StoreError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>, StoreError> {
        let mut records: Vec<RunRecord> = self.runs.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(run_id: Uuid, status: &str) -> RunRecord {
        RunRecord::new(run_id, Uuid::new_v4(), status, &json!({"status": status}))
            .expect("serializable")
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();

        store.save_run_snapshot(record(run_id, "running")).await.unwrap();
        let loaded = store.load_run(run_id).await.unwrap();
        assert_eq!(loaded.status, "running");
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();

        store.save_run_snapshot(record(run_id, "running")).await.unwrap();
        store.save_run_snapshot(record(run_id, "success")).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.load_run(run_id).await.unwrap().status, "success");
    }

    #[tokio::test]
    async fn missing_run_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load_run(Uuid::new_v4()).await,
            Err(StoreError::NotFound)
        ));
    }
}
