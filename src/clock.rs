use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;

/// Wall-clock time anchored to the tokio clock.
///
/// Room timers sleep on tokio instants while room records carry absolute UTC
/// times. Deriving "now" from the anchor keeps both in agreement, and lets
/// paused-time tests move wall time forward with `tokio::time::advance`.
#[derive(Debug, Clone, Copy)]
pub struct RoomClock {
    wall: OffsetDateTime,
    mono: Instant,
}

impl RoomClock {
    pub fn new() -> Self {
        Self::starting_at(OffsetDateTime::now_utc())
    }

    pub fn starting_at(wall: OffsetDateTime) -> Self {
        Self { wall, mono: Instant::now() }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.wall + self.mono.elapsed()
    }

    /// Time left until `at`, zero if it already passed.
    pub fn until(&self, at: OffsetDateTime) -> Duration {
        Duration::try_from(at - self.now()).unwrap_or_default()
    }

    /// The tokio instant at which `at` is reached.
    pub fn deadline(&self, at: OffsetDateTime) -> Instant {
        Instant::now() + self.until(at)
    }
}

impl Default for RoomClock {
    fn default() -> Self {
        Self::new()
    }
}
