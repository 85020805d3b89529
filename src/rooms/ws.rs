use std::sync::Arc;

use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, time::timeout};
use tracing::debug;

use crate::{
    auth::{Credentials, Gateway, Identity},
    config::Config,
    AppResult,
};

use super::{
    dispatch::{self, Connection},
    msg::ServerMessage,
    registry::RoomRegistry,
};

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    State(gateway): State<Gateway>,
    State(registry): State<RoomRegistry>,
    State(config): State<Arc<Config>>,
    credentials: Credentials,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let identity = gateway.resolve_handshake(&credentials)?;
    Ok(ws.on_upgrade(async move |socket| {
        serve_socket(socket, registry, gateway, config, identity).await
    }))
}

async fn serve_socket(
    socket: WebSocket,
    registry: RoomRegistry,
    gateway: Gateway,
    config: Arc<Config>,
    identity: Identity,
) {
    let (outbox, mut inbox) = mpsc::channel::<Arc<ServerMessage>>(config.outbox_capacity);
    let mut conn = Connection::open(&gateway, identity, outbox).await;
    let (mut sender, mut receiver) = socket.split();

    let heartbeat = config.heartbeat;
    let mut forward_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        ping.tick().await;
        loop {
            tokio::select! {
                message = inbox.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    let Ok(text) = serde_json::to_string(&*message) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    let idle = config.idle_timeout();
    loop {
        let frame = tokio::select! {
            frame = timeout(idle, receiver.next()) => frame,
            _ = &mut forward_task => break,
        };

        let text = match frame {
            Err(_) => {
                debug!(conn = %conn.id, "connection idle, closing");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(Message::Text(text)))) => text.as_str().to_owned(),
            Ok(Some(Ok(Message::Binary(bytes)))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(conn = %conn.id, "binary frame is not utf-8");
                    continue;
                }
            },
            Ok(Some(Ok(_))) => continue,
        };

        let Some(reply) = dispatch::handle_text(&registry, &gateway, &mut conn, &text).await else {
            continue;
        };
        if conn.outbox.send(Arc::new(reply)).await.is_err() {
            break;
        }
    }

    dispatch::disconnect(&registry, &gateway, conn).await;
    forward_task.abort();
}
