use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    auth::{ConnectionId, Identity},
    clock::RoomClock,
    error::{RoomError, RoomResult},
    store::SessionStore,
};

use super::{
    broadcast::{Binding, Broadcaster, Outbox},
    lifecycle::{Lifecycle, Transition},
    model::{RoomKind, RoomRecord, RoomStatus, Snapshot},
    mutation::{self, Folded, Mutation},
};

/// How long a lagging binding waits before its snapshot is offered again.
const RESYNC_EVERY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    /// Distinct word count above which word clouds broadcast deltas.
    pub delta_threshold: usize,
    /// Queue depth of each room's command channel.
    pub command_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            delta_threshold: 200,
            command_capacity: 64,
        }
    }
}

#[derive(Debug)]
enum Command {
    Join {
        conn: ConnectionId,
        identity: Identity,
        outbox: Outbox,
        reply: oneshot::Sender<RoomKind>,
    },
    Leave {
        conn: ConnectionId,
        identity: Identity,
    },
    Mutate {
        identity: Identity,
        mutation: Mutation,
        reply: oneshot::Sender<RoomResult<Folded>>,
    },
    Lifecycle {
        identity: Identity,
        command: Lifecycle,
        reply: oneshot::Sender<RoomResult<Transition>>,
    },
    Snapshot {
        viewer: Option<Identity>,
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Cheap, cloneable address of a running room.
///
/// Every call is a message to the room's task; a handle whose task has
/// stopped answers `RoomError::Unavailable`.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<Command>,
}

impl RoomHandle {
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn ask<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> RoomResult<T> {
        self.tx.send(command).await.map_err(|_| RoomError::Unavailable)?;
        rx.await.map_err(|_| RoomError::Unavailable)
    }

    /// Bind `conn` under `identity`. The snapshot goes out through the outbox
    /// ahead of any update.
    pub async fn join(&self, conn: ConnectionId, identity: Identity, outbox: Outbox) -> RoomResult<RoomKind> {
        let (reply, rx) = oneshot::channel();
        self.ask(Command::Join { conn, identity, outbox, reply }, rx).await
    }

    pub async fn leave(&self, conn: ConnectionId, identity: Identity) {
        let _ = self.tx.send(Command::Leave { conn, identity }).await;
    }

    pub async fn mutate(&self, identity: Identity, mutation: Mutation) -> RoomResult<Folded> {
        let (reply, rx) = oneshot::channel();
        self.ask(Command::Mutate { identity, mutation, reply }, rx).await?
    }

    pub async fn lifecycle(&self, identity: Identity, command: Lifecycle) -> RoomResult<Transition> {
        let (reply, rx) = oneshot::channel();
        self.ask(Command::Lifecycle { identity, command, reply }, rx).await?
    }

    pub async fn snapshot(&self, viewer: Option<Identity>) -> RoomResult<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.ask(Command::Snapshot { viewer, reply }, rx).await
    }
}

struct RoomActor {
    record: RoomRecord,
    broadcaster: Broadcaster,
    store: Arc<dyn SessionStore>,
    clock: RoomClock,
}

/// Start the task that owns `record`. `retired` hears the room id once the
/// task has stopped taking commands.
pub(crate) fn spawn(
    record: RoomRecord,
    store: Arc<dyn SessionStore>,
    clock: RoomClock,
    settings: RoomSettings,
    retired: mpsc::UnboundedSender<Uuid>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(settings.command_capacity.max(1));
    let handle = RoomHandle { tx };
    let actor = RoomActor {
        record,
        broadcaster: Broadcaster::new(settings.delta_threshold),
        store,
        clock,
    };
    tokio::spawn(async move {
        let id = actor.record.room.id;
        actor.run(rx).await;
        let _ = retired.send(id);
    });
    handle
}

impl RoomActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let id = self.record.room.id;
        debug!(room = %id, status = %self.record.room.status, "room task started");
        // A room that completes while loading may stop straight away; one
        // spawned for a caller waits for that caller's command first.
        let mut may_stop = self.expire().await;
        let mut resync_at: Option<Instant> = None;

        loop {
            if may_stop && self.idle() && rx.is_empty() {
                break;
            }
            if !self.broadcaster.is_lagging() {
                resync_at = None;
            } else if resync_at.is_none() {
                resync_at = Some(Instant::now() + RESYNC_EVERY);
            }
            let timer = wake_at(self.deadline());
            let resync = wake_at(resync_at);

            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.expire().await;
                    self.handle(command).await;
                }
                _ = timer => {
                    self.expire().await;
                }
                _ = resync => {
                    resync_at = None;
                    let now = self.clock.now();
                    self.broadcaster.resync(&self.record, now);
                }
            }
            may_stop = true;
        }

        // Commands queued before the close get a definite answer; callers
        // retry against a fresh task.
        rx.close();
        while let Ok(command) = rx.try_recv() {
            if let Command::Snapshot { viewer, reply } = command {
                let now = self.clock.now();
                let _ = reply.send(self.record.snapshot(viewer.as_ref(), now));
            }
        }
        debug!(room = %id, "room task stopped");
    }

    /// Nobody is bound and no timer is due. Active rooms keep running so
    /// their expiry fires on time; the rest reload from the store on demand.
    fn idle(&self) -> bool {
        self.record.room.status != RoomStatus::Active && self.broadcaster.is_empty()
    }

    fn deadline(&self) -> Option<Instant> {
        match (self.record.room.status, self.record.room.end_time) {
            (RoomStatus::Active, Some(end)) => Some(self.clock.deadline(end)),
            _ => None,
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Join { conn, identity, outbox, reply } => {
                let now = self.clock.now();
                let binding = Binding { conn, outbox };
                let queued = self.broadcaster.on_join(&self.record, &identity, binding, now);
                debug!(room = %self.record.room.id, %conn, %identity, queued, bound = self.broadcaster.len(), "joined");
                let _ = reply.send(self.record.room.kind);
            }
            Command::Leave { conn, identity } => {
                if self.broadcaster.on_leave(&identity, conn) {
                    debug!(room = %self.record.room.id, %conn, %identity, "left");
                }
            }
            Command::Mutate { identity, mutation, reply } => {
                let _ = reply.send(self.mutate(&identity, mutation).await);
            }
            Command::Lifecycle { identity, command, reply } => {
                let _ = reply.send(self.transition(&identity, command).await);
            }
            Command::Snapshot { viewer, reply } => {
                let now = self.clock.now();
                let _ = reply.send(self.record.snapshot(viewer.as_ref(), now));
            }
        }
    }

    /// Fold into a copy, persist it, then adopt it. A failed fold or write
    /// leaves the room exactly as it was.
    async fn mutate(&mut self, who: &Identity, mutation: Mutation) -> RoomResult<Folded> {
        let mut next = self.record.clone();
        let folded = mutation::apply(&mut next, who, mutation, self.clock.now())?;
        self.persist(&next).await?;
        self.record = next;
        self.broadcaster.on_fold(&self.record, &folded, self.clock.now());
        Ok(folded)
    }

    async fn transition(&mut self, who: &Identity, command: Lifecycle) -> RoomResult<Transition> {
        let now = self.clock.now();
        let mut next = self.record.clone();
        let transition = next.room.apply(who, command, now)?;
        self.persist(&next).await?;
        self.record = next;
        info!(room = %self.record.room.id, status = %self.record.room.status, end_time = ?self.record.room.end_time, "room {}", command.name());
        self.broadcaster.on_transition(&self.record, transition, now);
        Ok(transition)
    }

    /// Complete the room if its end time has passed. Expiry is adopted even
    /// when the write fails: the stored end time already implies completion
    /// and the next load reconciles it.
    async fn expire(&mut self) -> bool {
        let now = self.clock.now();
        let Some(transition) = self.record.room.expire_if_due(now) else {
            return false;
        };
        if let Err(err) = self.persist(&self.record).await {
            error!(room = %self.record.room.id, %err, "expiry not persisted");
        }
        info!(room = %self.record.room.id, "room expired");
        self.broadcaster.on_transition(&self.record, transition, now);
        true
    }

    async fn persist(&self, record: &RoomRecord) -> RoomResult<()> {
        self.store.save(record).await.map_err(|err| {
            error!(room = %record.room.id, %err, "room write failed");
            RoomError::from(err)
        })
    }
}

async fn wake_at(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
