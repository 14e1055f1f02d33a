//! `store` crate — pure persistence seam for run snapshots.
//!
//! Provides the [`SnapshotStore`] trait the engine offers snapshots to after
//! every layer barrier, typed record structs, and an in-memory reference
//! implementation. No business logic lives here; the storage technology
//! behind the trait is an external collaborator's concern.

pub mod error;
pub mod models;
pub mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use models::RunRecord;

use async_trait::async_trait;
use uuid::Uuid;

/// Durable store for run snapshots.
///
/// The engine calls `save_run_snapshot` after each layer barrier and once
/// more at terminal status, always with the full record — implementations
/// overwrite by `run_id`, they never merge.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist (or overwrite) the snapshot for a run.
    async fn save_run_snapshot(&self, record: RunRecord) -> Result<(), StoreError>;

    /// Fetch the latest snapshot for a run.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if no snapshot has been saved for `run_id`.
    async fn load_run(&self, run_id: Uuid) -> Result<RunRecord, StoreError>;

    /// All stored records, most recently saved first.
    async fn list_runs(&self) -> Result<Vec<RunRecord>, StoreError>;
}
