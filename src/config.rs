use std::{fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

const DEV_TOKEN_SECRET: &str = "liveroom-development-secret";

/// Server settings, read once at startup from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub token_secret: String,
    pub heartbeat: Duration,
    pub outbox_capacity: usize,
    pub delta_threshold: usize,
    pub max_connections: u32,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("LIVEROOM_PORT", 3000),
            database_url: try_load("DATABASE_URL", "sqlite://liveroom.db?mode=rwc".to_owned()),
            token_secret: token_secret(),
            heartbeat: Duration::from_secs(try_load("LIVEROOM_HEARTBEAT_SECS", 20u64).max(1)),
            outbox_capacity: try_load("LIVEROOM_OUTBOX_CAPACITY", 256usize).max(1),
            delta_threshold: try_load("LIVEROOM_DELTA_THRESHOLD", 200),
            max_connections: try_load("LIVEROOM_MAX_CONNECTIONS", 8u32).max(1),
        }
    }

    /// A connection with no inbound frame for this long is closed.
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat * 3
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "memory".to_owned(),
            token_secret: DEV_TOKEN_SECRET.to_owned(),
            heartbeat: Duration::from_secs(20),
            outbox_capacity: 256,
            delta_threshold: 200,
            max_connections: 8,
        }
    }
}

fn var(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}

fn token_secret() -> String {
    var("LIVEROOM_TOKEN_SECRET").unwrap_or_else(|| {
        warn!("LIVEROOM_TOKEN_SECRET not set, bearer tokens use the development secret");
        DEV_TOKEN_SECRET.to_owned()
    })
}
