use std::{collections::HashMap, sync::Arc};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{ConnectionId, Identity},
    clock::RoomClock,
    error::{RoomError, RoomResult},
    store::SessionStore,
};

use super::{
    actor::{self, RoomHandle, RoomSettings},
    broadcast::Outbox,
    lifecycle::{Lifecycle, Transition},
    model::{RoomDraft, RoomKind, RoomRecord, RoomSummary, Snapshot},
    mutation::{Folded, Mutation},
};

/// How often a call is re-sent when it lands on a room task that was
/// stopping at the time.
const ATTEMPTS: usize = 3;

struct Inner {
    rooms: Mutex<HashMap<Uuid, RoomHandle>>,
    store: Arc<dyn SessionStore>,
    clock: RoomClock,
    settings: RoomSettings,
    retired: mpsc::UnboundedSender<Uuid>,
}

/// Finds or starts the task that owns a room.
///
/// The map lock is held for lookups and inserts only; all room work happens
/// inside the room's own task.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn SessionStore>, clock: RoomClock, settings: RoomSettings) -> Self {
        let (retired, mut retired_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            rooms: Mutex::new(HashMap::new()),
            store,
            clock,
            settings,
            retired,
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(id) = retired_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let mut rooms = inner.rooms.lock().await;
                if rooms.get(&id).is_some_and(RoomHandle::is_closed) {
                    rooms.remove(&id);
                    debug!(room = %id, "room retired");
                }
            }
        });

        Self { inner }
    }

    pub async fn live_rooms(&self) -> usize {
        self.inner.rooms.lock().await.len()
    }

    /// Validate and store a new room. Its task starts on first use.
    pub async fn create(&self, host: Identity, draft: RoomDraft) -> RoomResult<Uuid> {
        let record = draft.into_record(host, self.inner.clock.now())?;
        let id = record.room.id;
        self.inner.store.insert(&record).await?;
        info!(room = %id, kind = %record.room.kind, host = %record.room.host, "room created");
        Ok(id)
    }

    /// The handle of a running room, loading it from the store if needed.
    pub async fn room(&self, id: Uuid) -> RoomResult<RoomHandle> {
        if let Some(handle) = self.running(id).await {
            return Ok(handle);
        }

        let record = self
            .inner
            .store
            .load(id)
            .await?
            .ok_or_else(|| RoomError::NotFound(id.to_string()))?;

        let mut rooms = self.inner.rooms.lock().await;
        if let Some(handle) = rooms.get(&id).filter(|handle| !handle.is_closed()) {
            return Ok(handle.clone());
        }
        let handle = self.start(record);
        rooms.insert(id, handle.clone());
        Ok(handle)
    }

    async fn running(&self, id: Uuid) -> Option<RoomHandle> {
        self.inner
            .rooms
            .lock()
            .await
            .get(&id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    fn start(&self, record: RoomRecord) -> RoomHandle {
        actor::spawn(
            record,
            Arc::clone(&self.inner.store),
            self.inner.clock,
            self.inner.settings,
            self.inner.retired.clone(),
        )
    }

    /// Start a task for every stored active room so its timer runs again.
    /// Rooms whose end time passed while nothing was running complete now.
    pub async fn restore(&self) -> RoomResult<usize> {
        let ids = self.inner.store.list_active().await?;
        let mut restored = 0;
        for id in ids {
            match self.room(id).await {
                Ok(_) => restored += 1,
                Err(err) => warn!(room = %id, %err, "room not restored"),
            }
        }
        info!(restored, "active rooms restored");
        Ok(restored)
    }

    pub async fn list_by_host(&self, host: &Identity) -> RoomResult<Vec<RoomSummary>> {
        Ok(self.inner.store.list_by_host(host).await?)
    }

    pub async fn join(&self, id: Uuid, conn: ConnectionId, identity: &Identity, outbox: &Outbox) -> RoomResult<RoomKind> {
        for _ in 0..ATTEMPTS {
            match self.room(id).await?.join(conn, identity.clone(), outbox.clone()).await {
                Err(RoomError::Unavailable) => continue,
                other => return other,
            }
        }
        Err(RoomError::Unavailable)
    }

    /// Drop a binding. Rooms that are not running hold no bindings.
    pub async fn leave(&self, id: Uuid, conn: ConnectionId, identity: &Identity) {
        if let Some(handle) = self.running(id).await {
            handle.leave(conn, identity.clone()).await;
        }
    }

    pub async fn mutate(&self, id: Uuid, identity: &Identity, mutation: Mutation) -> RoomResult<Folded> {
        for _ in 0..ATTEMPTS {
            match self.room(id).await?.mutate(identity.clone(), mutation.clone()).await {
                Err(RoomError::Unavailable) => continue,
                other => return other,
            }
        }
        Err(RoomError::Unavailable)
    }

    pub async fn lifecycle(&self, id: Uuid, identity: &Identity, command: Lifecycle) -> RoomResult<Transition> {
        for _ in 0..ATTEMPTS {
            match self.room(id).await?.lifecycle(identity.clone(), command).await {
                Err(RoomError::Unavailable) => continue,
                other => return other,
            }
        }
        Err(RoomError::Unavailable)
    }

    pub async fn snapshot(&self, id: Uuid, viewer: Option<&Identity>) -> RoomResult<Snapshot> {
        for _ in 0..ATTEMPTS {
            match self.room(id).await?.snapshot(viewer.cloned()).await {
                Err(RoomError::Unavailable) => continue,
                other => return other,
            }
        }
        Err(RoomError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use time::OffsetDateTime;
    use tokio::sync::mpsc::Receiver;

    use crate::{
        rooms::{msg::ServerMessage, RoomStatus},
        store::{MemoryStore, StoreError, StoreResult},
    };

    use super::*;

    /// Memory store whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        rooms: MemoryStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn fail_writes(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn insert(&self, record: &RoomRecord) -> StoreResult<()> {
            self.rooms.insert(record).await
        }

        async fn load(&self, id: Uuid) -> StoreResult<Option<RoomRecord>> {
            self.rooms.load(id).await
        }

        async fn save(&self, record: &RoomRecord) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.rooms.save(record).await
        }

        async fn list_by_host(&self, host: &Identity) -> StoreResult<Vec<RoomSummary>> {
            self.rooms.list_by_host(host).await
        }

        async fn list_active(&self) -> StoreResult<Vec<Uuid>> {
            self.rooms.list_active().await
        }
    }

    fn registry(store: Arc<dyn SessionStore>) -> RoomRegistry {
        let clock = RoomClock::starting_at(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap());
        RoomRegistry::new(store, clock, RoomSettings::default())
    }

    fn host() -> Identity {
        Identity::User("host".into())
    }

    fn outbox() -> (Outbox, Receiver<Arc<ServerMessage>>) {
        mpsc::channel(32)
    }

    #[tokio::test]
    async fn unknown_rooms_are_not_found() {
        let registry = registry(Arc::new(MemoryStore::new()));
        assert!(matches!(registry.room(Uuid::now_v7()).await, Err(RoomError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_room_without_bindings_stops_and_respawns() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let id = registry
            .create(host(), RoomDraft::Qna { title: None, time_limit: None })
            .await
            .unwrap();
        registry.lifecycle(id, &host(), Lifecycle::Start).await.unwrap();
        registry.lifecycle(id, &host(), Lifecycle::End).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.live_rooms().await, 0);

        let snapshot = registry.snapshot(id, None).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn bound_rooms_stay_running_after_completion() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let id = registry
            .create(host(), RoomDraft::WordCloud { title: None, time_limit: Some(30) })
            .await
            .unwrap();
        let (tx, mut rx) = outbox();
        let conn = ConnectionId::new();
        registry.join(id, conn, &host(), &tx).await.unwrap();
        registry.lifecycle(id, &host(), Lifecycle::Start).await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(registry.live_rooms().await, 1);

        let mut kinds = Vec::new();
        while let Ok(message) = rx.try_recv() {
            kinds.push(serde_json::to_value(&*message).unwrap()["type"].clone());
        }
        assert_eq!(kinds, ["sessionState", "sessionStarted", "sessionEnded"]);

        registry.leave(id, conn, &host()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.live_rooms().await, 0);
    }

    fn kind_of(message: &ServerMessage) -> String {
        serde_json::to_value(message).unwrap()["type"].as_str().unwrap().to_owned()
    }

    #[tokio::test(start_paused = true)]
    async fn unbound_waiting_rooms_release_their_task() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let mut ids = Vec::new();
        for _ in 0..20 {
            let id = registry
                .create(host(), RoomDraft::Qna { title: None, time_limit: None })
                .await
                .unwrap();
            ids.push(id);
        }
        for id in &ids[..5] {
            registry.snapshot(*id, None).await.unwrap();
        }
        let (tx, _rx) = outbox();
        registry.join(ids[5], ConnectionId::new(), &host(), &tx).await.unwrap();
        registry.lifecycle(ids[6], &host(), Lifecycle::Start).await.unwrap();

        tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        assert_eq!(registry.live_rooms().await, 2);

        let snapshot = registry.snapshot(ids[0], None).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn failed_writes_leave_the_room_untouched() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry(store.clone());
        let id = registry
            .create(host(), RoomDraft::Qna { title: None, time_limit: Some(60) })
            .await
            .unwrap();
        let guest = Identity::Guest("g".into());
        let (tx, mut rx) = outbox();
        registry.join(id, ConnectionId::new(), &guest, &tx).await.unwrap();
        let before = registry.snapshot(id, None).await.unwrap();
        while rx.try_recv().is_ok() {}

        store.fail_writes(true);
        let asked = registry.mutate(id, &guest, Mutation::Ask { text: "Why?".into() }).await;
        assert!(matches!(asked, Err(RoomError::Storage(_))));
        let started = registry.lifecycle(id, &host(), Lifecycle::Start).await;
        assert!(matches!(started, Err(RoomError::Storage(_))));

        let after = registry.snapshot(id, None).await.unwrap();
        assert_eq!(after.status, RoomStatus::Waiting);
        assert_eq!(after.end_time, None);
        assert_eq!(after.content, before.content);
        assert!(rx.try_recv().is_err());
        let stored = store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.room.status, RoomStatus::Waiting);

        store.fail_writes(false);
        registry.mutate(id, &guest, Mutation::Ask { text: "Why?".into() }).await.unwrap();
        assert_eq!(kind_of(&rx.try_recv().unwrap()), "qnaUpdate");
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_connection_gets_a_snapshot_once_drained() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let id = registry
            .create(host(), RoomDraft::Qna { title: None, time_limit: None })
            .await
            .unwrap();
        let guest = Identity::Guest("g".into());
        let (tx, mut rx) = mpsc::channel(1);
        registry.join(id, ConnectionId::new(), &guest, &tx).await.unwrap();
        registry.mutate(id, &host(), Mutation::Ask { text: "First?".into() }).await.unwrap();

        assert_eq!(kind_of(&rx.try_recv().unwrap()), "qnaState");
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let resync = serde_json::to_value(&*rx.try_recv().unwrap()).unwrap();
        assert_eq!(resync["type"], "qnaState");
        assert_eq!(resync["questions"].as_array().unwrap().len(), 1);
    }
}
