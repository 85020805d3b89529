use std::{collections::HashMap, sync::Arc};

use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{ConnectionId, Gateway, Identity},
    error::{RoomError, RoomResult},
};

use super::{
    broadcast::Outbox,
    model::{RoomDraft, RoomKind},
    msg::{ClientMessage, ServerMessage},
    registry::RoomRegistry,
};

/// Per-socket state: which rooms this connection joined and where its
/// outbound messages go.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub outbox: Outbox,
    joined: HashMap<Uuid, RoomKind>,
    last_word_room: Option<Uuid>,
}

impl Connection {
    /// Register a connection for `identity` and queue its `connected` greeting.
    pub async fn open(gateway: &Gateway, identity: Identity, outbox: Outbox) -> Self {
        let id = gateway.register(identity.clone()).await;
        let greeting = Arc::new(ServerMessage::Connected {
            connection_id: id,
            identity,
        });
        if let Err(err) = outbox.try_send(greeting) {
            debug!(conn = %id, %err, "greeting not queued");
        }
        Self {
            id,
            outbox,
            joined: HashMap::new(),
            last_word_room: None,
        }
    }

    pub fn joined(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.joined.keys().copied()
    }
}

/// Parse and run one text frame. Malformed frames are answered with a
/// validation error and the connection carries on.
pub async fn handle_text(registry: &RoomRegistry, gateway: &Gateway, conn: &mut Connection, text: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => handle_message(registry, gateway, conn, message).await,
        Err(err) => {
            debug!(conn = %conn.id, %err, "malformed message");
            Some(ServerMessage::error(
                &RoomError::validation(format!("malformed message: {err}")),
                None,
            ))
        }
    }
}

/// Run one client command. Returns the direct reply for the sender, if any;
/// everything else reaches the sender through its room bindings.
pub async fn handle_message(registry: &RoomRegistry, gateway: &Gateway, conn: &mut Connection, message: ClientMessage) -> Option<ServerMessage> {
    let command = message.name();
    match execute(registry, gateway, conn, message).await {
        Ok(reply) => reply,
        Err(err) => {
            debug!(conn = %conn.id, command, %err, "command rejected");
            Some(ServerMessage::error(&err, Some(command)))
        }
    }
}

async fn execute(registry: &RoomRegistry, gateway: &Gateway, conn: &mut Connection, message: ClientMessage) -> RoomResult<Option<ServerMessage>> {
    let identity = gateway.identity(conn.id).await?;

    if let Some((room_id, mutation)) = message.mutation() {
        let room_id = match room_id {
            Some(room_id) => room_id,
            None => conn
                .last_word_room
                .ok_or_else(|| RoomError::validation("join a word cloud before submitting words"))?,
        };
        registry.mutate(room_id, &identity, mutation).await?;
        return Ok(None);
    }

    if let Some((room_id, command)) = message.lifecycle() {
        registry.lifecycle(room_id, &identity, command).await?;
        return Ok(None);
    }

    use ClientMessage::*;
    match message {
        JoinSession { room_id } => {
            let kind = registry.join(room_id, conn.id, &identity, &conn.outbox).await?;
            conn.joined.insert(room_id, kind);
            if kind == RoomKind::WordCloud {
                conn.last_word_room = Some(room_id);
            }
            Ok(None)
        }
        LeaveSession { room_id } => {
            registry.leave(room_id, conn.id, &identity).await;
            conn.joined.remove(&room_id);
            if conn.last_word_room == Some(room_id) {
                conn.last_word_room = None;
            }
            Ok(None)
        }
        CreateSession { time_limit, title } => {
            let session_id = registry
                .create(identity, RoomDraft::WordCloud { title, time_limit })
                .await?;
            Ok(Some(ServerMessage::SessionCreated { session_id }))
        }
        CreatePoll { question, options, host_id, time_limit } => {
            check_host_id(&identity, host_id.as_deref())?;
            let poll_id = registry
                .create(identity, RoomDraft::Poll { question, options, time_limit })
                .await?;
            Ok(Some(ServerMessage::PollCreated { poll_id }))
        }
        CreateQna { host_id, title, time_limit } => {
            check_host_id(&identity, host_id.as_deref())?;
            let qna_id = registry
                .create(identity, RoomDraft::Qna { title, time_limit })
                .await?;
            Ok(Some(ServerMessage::QnaCreated { qna_id }))
        }
        // contributions and lifecycle commands returned above
        SubmitWord { .. } | VotePoll { .. } | AskQuestion { .. } | UpvoteQuestion { .. }
        | MarkAnswered { .. } | StartSession { .. } | EndSession { .. } => Ok(None),
    }
}

/// Hosts are always the caller; a claimed host id must agree.
fn check_host_id(identity: &Identity, host_id: Option<&str>) -> RoomResult<()> {
    match host_id {
        Some(claimed) if claimed != identity.id() => Err(RoomError::Authorization(
            "hostId does not match the connection's identity".into(),
        )),
        _ => Ok(()),
    }
}

/// Leave every joined room and drop the connection from the gateway.
pub async fn disconnect(registry: &RoomRegistry, gateway: &Gateway, conn: Connection) {
    if let Ok(identity) = gateway.identity(conn.id).await {
        for room_id in conn.joined() {
            registry.leave(room_id, conn.id, &identity).await;
        }
    }
    gateway.unregister(conn.id).await;
}
