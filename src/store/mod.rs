mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    auth::Identity,
    error::RoomError,
    rooms::{RoomRecord, RoomSummary},
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("room content could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("stored room {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("room {0} is not stored")]
    Missing(Uuid),

    #[error("room {0} is already stored")]
    Exists(Uuid),
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        RoomError::Storage(err.to_string())
    }
}

/// Durable home of room records.
///
/// A record is always written whole, so a fold that reaches the store is
/// never half applied.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, record: &RoomRecord) -> StoreResult<()>;

    async fn load(&self, id: Uuid) -> StoreResult<Option<RoomRecord>>;

    async fn save(&self, record: &RoomRecord) -> StoreResult<()>;

    /// Summaries of the rooms `host` created, newest first.
    async fn list_by_host(&self, host: &Identity) -> StoreResult<Vec<RoomSummary>>;

    /// Ids of every room stored as active.
    async fn list_active(&self) -> StoreResult<Vec<Uuid>>;
}
