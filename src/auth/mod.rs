use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RoomError, RoomResult};

mod credentials;
mod token;

pub use credentials::Credentials;
pub use token::TokenVerifier;

const GUEST_ID_MAX_LEN: usize = 64;
const GUEST_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Who is behind a connection or request.
///
/// Registered users are resolved from a verified token; guests present an id
/// they generated (or were handed) themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Identity {
    User(String),
    Guest(String),
}

impl Identity {
    pub fn guest(id: &str) -> RoomResult<Self> {
        let valid = !id.is_empty()
            && id.len() <= GUEST_ID_MAX_LEN
            && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(RoomError::Authentication(format!("malformed guest id {id:?}")));
        }
        Ok(Self::Guest(id.to_owned()))
    }

    pub fn new_guest() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..9)
            .map(|_| GUEST_ALPHABET[rng.random_range(0..GUEST_ALPHABET.len())] as char)
            .collect();
        Self::Guest(format!("guest_{suffix}"))
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Guest(id) => id,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// What other participants may see. Guest ids double as credentials, so
    /// they are never shown to anyone but their owner.
    pub fn public_label(&self) -> &str {
        match self {
            Self::User(id) => id,
            Self::Guest(_) => "guest",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

impl FromStr for Identity {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Self::User(id.to_owned())),
            Some(("guest", id)) => Self::guest(id),
            _ => Err(RoomError::validation(format!("unrecognised identity {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Resolves credentials to identities and remembers which identity each live
/// connection carries.
#[derive(Clone)]
pub struct Gateway {
    verifier: TokenVerifier,
    connections: Arc<RwLock<HashMap<ConnectionId, Identity>>>,
}

impl Gateway {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier,
            connections: Arc::default(),
        }
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Identity for a realtime handshake.
    ///
    /// A bad token falls back to the guest id when one is offered; with no
    /// credentials at all the connection becomes a fresh guest.
    pub fn resolve_handshake(&self, credentials: &Credentials) -> RoomResult<Identity> {
        Ok(self.resolve(credentials)?.unwrap_or_else(Identity::new_guest))
    }

    /// Identity for a plain request. Anonymous requests are refused.
    pub fn resolve_request(&self, credentials: &Credentials) -> RoomResult<Identity> {
        self.resolve(credentials)?
            .ok_or_else(|| RoomError::Authentication("missing credentials".into()))
    }

    fn resolve(&self, credentials: &Credentials) -> RoomResult<Option<Identity>> {
        let guest = credentials.guest_id.as_deref().map(Identity::guest).transpose()?;

        let Some(token) = credentials.token.as_deref() else {
            return Ok(guest);
        };

        match self.verifier.verify(token) {
            Ok(user) => Ok(Some(user)),
            Err(err) => match guest {
                Some(guest) => {
                    debug!(%guest, error = %err, "token rejected, continuing as guest");
                    Ok(Some(guest))
                }
                None => Err(err),
            },
        }
    }

    pub async fn register(&self, identity: Identity) -> ConnectionId {
        let conn = ConnectionId::new();
        info!(%conn, %identity, "connection opened");
        self.connections.write().await.insert(conn, identity);
        conn
    }

    pub async fn unregister(&self, conn: ConnectionId) {
        if let Some(identity) = self.connections.write().await.remove(&conn) {
            info!(%conn, %identity, "connection closed");
        }
    }

    pub async fn identity(&self, conn: ConnectionId) -> RoomResult<Identity> {
        self.connections
            .read()
            .await
            .get(&conn)
            .cloned()
            .ok_or_else(|| RoomError::Authentication("connection is not registered".into()))
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
