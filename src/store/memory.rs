use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    auth::Identity,
    rooms::{RoomRecord, RoomStatus, RoomSummary},
};

use super::{SessionStore, StoreError, StoreResult};

/// Keeps rooms in process memory. Used by tests and `DATABASE_URL=memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<Uuid, RoomRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, record: &RoomRecord) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&record.room.id) {
            return Err(StoreError::Exists(record.room.id));
        }
        rooms.insert(record.room.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<RoomRecord>> {
        Ok(self.rooms.read().await.get(&id).cloned())
    }

    async fn save(&self, record: &RoomRecord) -> StoreResult<()> {
        match self.rooms.write().await.get_mut(&record.room.id) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(record.room.id)),
        }
    }

    async fn list_by_host(&self, host: &Identity) -> StoreResult<Vec<RoomSummary>> {
        let rooms = self.rooms.read().await;
        let mut mine: Vec<RoomSummary> = rooms
            .values()
            .filter(|record| &record.room.host == host)
            .map(|record| RoomSummary::from(&record.room))
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(mine)
    }

    async fn list_active(&self) -> StoreResult<Vec<Uuid>> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .values()
            .filter(|record| record.room.status == RoomStatus::Active)
            .map(|record| record.room.id)
            .collect())
    }
}
