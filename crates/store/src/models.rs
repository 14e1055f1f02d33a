//! Record structs persisted by a [`crate::SnapshotStore`].
//!
//! These are *persistence* models — they carry no domain behaviour. The
//! engine serializes its own run state into the `snapshot` column, exactly
//! one JSON document per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted run snapshot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    /// Overall run status at save time (`running`, `success`, `partial`,
    /// `failed`) — denormalized for listing without deserializing snapshots.
    pub status: String,
    /// Full JSON run state (step statuses, outputs, memory, trace, …).
    pub snapshot: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

impl RunRecord {
    /// Build a record from anything serializable as the snapshot document.
    pub fn new<T: Serialize>(
        run_id: Uuid,
        workflow_id: Uuid,
        status: impl Into<String>,
        snapshot: &T,
    ) -> Result<Self, crate::StoreError> {
        Ok(Self {
            run_id,
            workflow_id,
            status: status.into(),
            snapshot: serde_json::to_value(snapshot)?,
            saved_at: Utc::now(),
        })
    }
}
