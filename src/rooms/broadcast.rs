use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::auth::{ConnectionId, Identity};

use super::{
    lifecycle::Transition,
    model::{RoomContent, RoomRecord},
    msg::{LifecycleEvent, ServerMessage},
    mutation::Folded,
};

/// Outbound queue of one connection. Every room the connection joined
/// pushes into the same queue; the socket task drains it.
pub type Outbox = mpsc::Sender<Arc<ServerMessage>>;

/// A live connection's presence in one room.
#[derive(Debug, Clone)]
pub struct Binding {
    pub conn: ConnectionId,
    pub outbox: Outbox,
}

/// Decides which bound connections get which message after a join, a fold
/// or a lifecycle transition.
///
/// A binding whose outbox was full when a message was due is lagging: it
/// missed at least one update, so the next thing it receives is a fresh
/// snapshot instead of an update it cannot apply.
#[derive(Debug)]
pub struct Broadcaster {
    bindings: HashMap<Identity, Binding>,
    lagging: HashSet<Identity>,
    delta_threshold: usize,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

impl Broadcaster {
    pub fn new(delta_threshold: usize) -> Self {
        Self {
            bindings: HashMap::new(),
            lagging: HashSet::new(),
            delta_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn is_bound(&self, who: &Identity, conn: ConnectionId) -> bool {
        self.bindings.get(who).is_some_and(|b| b.conn == conn)
    }

    /// Whether some binding still waits for a resync snapshot.
    pub fn is_lagging(&self) -> bool {
        !self.lagging.is_empty()
    }

    /// Bind the joiner and send it its snapshot. Queuing the snapshot first
    /// means no update can overtake it. A second join by the same identity
    /// replaces the earlier binding.
    ///
    /// Returns false when the snapshot could not be queued yet; a full outbox
    /// stays bound and gets the snapshot on resync, a closed one is dropped.
    pub fn on_join(&mut self, record: &RoomRecord, who: &Identity, binding: Binding, now: OffsetDateTime) -> bool {
        let conn = binding.conn;
        if let Some(previous) = self.bindings.insert(who.clone(), binding) {
            if previous.conn != conn {
                debug!(room = %record.room.id, identity = %who, replaced = %previous.conn, "binding replaced");
            }
        }
        self.send_to(record, who, None, now)
    }

    /// Drop a binding, unless it has since been replaced by another connection.
    pub fn on_leave(&mut self, who: &Identity, conn: ConnectionId) -> bool {
        if self.is_bound(who, conn) {
            self.bindings.remove(who);
            self.lagging.remove(who);
            return true;
        }
        false
    }

    pub fn on_fold(&mut self, record: &RoomRecord, folded: &Folded, now: OffsetDateTime) {
        let room_id = record.room.id;
        match (&record.content, folded) {
            (RoomContent::WordCloud(cloud), Folded::Word(word)) => {
                let update = if cloud.len() > self.delta_threshold {
                    match cloud.word_view(&word.text) {
                        Some(view) => ServerMessage::WordDelta { room_id, word: view },
                        None => return,
                    }
                } else {
                    ServerMessage::WordUpdate {
                        room_id,
                        words: cloud.view().words,
                    }
                };
                self.broadcast(record, Arc::new(update), now);

                let item = ServerMessage::NewWord {
                    room_id,
                    text: word.text.clone(),
                    by: word.by.public_label().to_owned(),
                    at: word.at,
                };
                self.send_to(record, &record.room.host, Some(Arc::new(item)), now);
            }
            (RoomContent::Poll(poll), _) => {
                self.broadcast(record, Arc::new(ServerMessage::PollUpdate { room_id, poll: poll.view() }), now);
            }
            (RoomContent::Qna(qna), _) => {
                self.broadcast(record, Arc::new(ServerMessage::QnaUpdate { room_id, qna: qna.view() }), now);
            }
            (RoomContent::WordCloud(_), _) => {}
        }
    }

    pub fn on_transition(&mut self, record: &RoomRecord, transition: Transition, now: OffsetDateTime) {
        let room = &record.room;
        let event = LifecycleEvent {
            room_id: room.id,
            status: room.status,
            end_time: room.end_time,
            expired: matches!(transition, Transition::Ended { expired: true }),
            state: record.snapshot(None, now),
        };
        let message = match transition {
            Transition::Started { .. } => ServerMessage::started(event),
            Transition::Ended { .. } => ServerMessage::ended(event),
        };
        self.broadcast(record, Arc::new(message), now);
    }

    /// Offer every lagging binding a fresh snapshot.
    pub fn resync(&mut self, record: &RoomRecord, now: OffsetDateTime) {
        let lagging: Vec<Identity> = self.lagging.iter().cloned().collect();
        for who in lagging {
            if self.send_to(record, &who, None, now) {
                debug!(room = %record.room.id, identity = %who, "binding resynchronised");
            }
        }
    }

    /// Queue `message` for `who`, or its snapshot when it is lagging or no
    /// message is given. Returns whether something was queued.
    fn send_to(&mut self, record: &RoomRecord, who: &Identity, message: Option<Arc<ServerMessage>>, now: OffsetDateTime) -> bool {
        let Some(binding) = self.bindings.get(who) else {
            return false;
        };
        let message = match message {
            Some(message) if !self.lagging.contains(who) => message,
            _ => Arc::new(ServerMessage::state(record.snapshot(Some(who), now))),
        };

        match deliver(&binding.outbox, message) {
            Delivery::Sent => {
                self.lagging.remove(who);
                true
            }
            Delivery::Full => {
                if self.lagging.insert(who.clone()) {
                    warn!(room = %record.room.id, identity = %who, conn = %binding.conn, "outbox full, binding lagging");
                }
                false
            }
            Delivery::Closed => {
                debug!(room = %record.room.id, identity = %who, conn = %binding.conn, "outbox closed, dropping binding");
                self.bindings.remove(who);
                self.lagging.remove(who);
                false
            }
        }
    }

    fn broadcast(&mut self, record: &RoomRecord, message: Arc<ServerMessage>, now: OffsetDateTime) {
        let bound: Vec<Identity> = self.bindings.keys().cloned().collect();
        for who in bound {
            self.send_to(record, &who, Some(Arc::clone(&message)), now);
        }
    }
}

/// Queue a message without waiting.
fn deliver(outbox: &Outbox, message: Arc<ServerMessage>) -> Delivery {
    match outbox.try_send(message) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => Delivery::Full,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}
