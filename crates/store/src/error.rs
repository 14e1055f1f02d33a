//! Typed error type for the store crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run snapshot not found")]
    NotFound,

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
