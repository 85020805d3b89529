use std::time::Duration;

use time::OffsetDateTime;

use crate::{auth::Identity, error::{RoomError, RoomResult}};

use super::model::{Room, RoomKind, RoomStatus};

/// Host-issued lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    End,
}

impl Lifecycle {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "startSession",
            Self::End => "endSession",
        }
    }
}

/// A status change that happened, for the broadcast layer to announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started { end_time: Option<OffsetDateTime> },
    Ended { expired: bool },
}

impl Room {
    pub fn is_host(&self, who: &Identity) -> bool {
        &self.host == who
    }

    /// Whether contributions are accepted in the current status. Q&A takes
    /// questions before the host starts; the other kinds only while active.
    pub fn accepts_contributions(&self) -> bool {
        match (self.kind, self.status) {
            (_, RoomStatus::Completed) => false,
            (RoomKind::Qna, _) => true,
            (_, status) => status == RoomStatus::Active,
        }
    }

    pub fn remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        match (self.status, self.end_time) {
            (RoomStatus::Active, Some(end)) => Some(Duration::try_from(end - now).unwrap_or_default()),
            _ => None,
        }
    }

    pub fn apply(&mut self, who: &Identity, command: Lifecycle, now: OffsetDateTime) -> RoomResult<Transition> {
        if !self.is_host(who) {
            return Err(RoomError::Authorization(format!(
                "only the host can {} this room",
                match command {
                    Lifecycle::Start => "start",
                    Lifecycle::End => "end",
                }
            )));
        }
        match command {
            Lifecycle::Start => self.start(now),
            Lifecycle::End => self.end(),
        }
    }

    fn start(&mut self, now: OffsetDateTime) -> RoomResult<Transition> {
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::invalid_state(format!("room is already {}", self.status)));
        }
        self.status = RoomStatus::Active;
        self.end_time = self
            .time_limit
            .map(|secs| now + time::Duration::seconds(i64::from(secs)));
        Ok(Transition::Started { end_time: self.end_time })
    }

    fn end(&mut self) -> RoomResult<Transition> {
        if self.status != RoomStatus::Active {
            return Err(RoomError::invalid_state(format!(
                "room is {}, only an active room can be ended",
                self.status
            )));
        }
        self.status = RoomStatus::Completed;
        Ok(Transition::Ended { expired: false })
    }

    /// Complete an active room whose end time has passed.
    pub fn expire_if_due(&mut self, now: OffsetDateTime) -> Option<Transition> {
        match (self.status, self.end_time) {
            (RoomStatus::Active, Some(end)) if now >= end => {
                self.status = RoomStatus::Completed;
                Some(Transition::Ended { expired: true })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn room(kind: RoomKind, time_limit: Option<u32>) -> Room {
        Room {
            id: Uuid::now_v7(),
            kind,
            host: Identity::User("host".into()),
            status: RoomStatus::Waiting,
            title: None,
            created_at: at(0),
            time_limit,
            end_time: None,
        }
    }

    fn host() -> Identity {
        Identity::User("host".into())
    }

    #[test]
    fn start_sets_absolute_end_time() {
        let mut room = room(RoomKind::WordCloud, Some(60));
        let transition = room.apply(&host(), Lifecycle::Start, at(10)).unwrap();

        assert_eq!(transition, Transition::Started { end_time: Some(at(70)) });
        assert_eq!(room.status, RoomStatus::Active);
        assert_eq!(room.remaining(at(40)), Some(Duration::from_secs(30)));
        assert_eq!(room.remaining(at(80)), Some(Duration::ZERO));
    }

    #[test]
    fn only_the_host_drives_the_lifecycle() {
        let mut room = room(RoomKind::Poll, None);
        let intruder = Identity::Guest("host".into());

        assert!(matches!(
            room.apply(&intruder, Lifecycle::Start, at(0)),
            Err(RoomError::Authorization(_))
        ));
        assert_eq!(room.status, RoomStatus::Waiting);

        room.apply(&host(), Lifecycle::Start, at(0)).unwrap();
        assert!(matches!(
            room.apply(&intruder, Lifecycle::End, at(1)),
            Err(RoomError::Authorization(_))
        ));
        assert_eq!(room.status, RoomStatus::Active);
    }

    #[test]
    fn lifecycle_never_goes_backwards_or_repeats() {
        let mut room = room(RoomKind::WordCloud, Some(30));
        assert!(matches!(room.apply(&host(), Lifecycle::End, at(0)), Err(RoomError::InvalidState(_))));

        room.apply(&host(), Lifecycle::Start, at(0)).unwrap();
        let end_time = room.end_time;
        assert!(matches!(room.apply(&host(), Lifecycle::Start, at(5)), Err(RoomError::InvalidState(_))));
        assert_eq!(room.end_time, end_time);

        room.apply(&host(), Lifecycle::End, at(6)).unwrap();
        assert_eq!(room.status, RoomStatus::Completed);
        assert!(matches!(room.apply(&host(), Lifecycle::Start, at(7)), Err(RoomError::InvalidState(_))));
        assert!(matches!(room.apply(&host(), Lifecycle::End, at(7)), Err(RoomError::InvalidState(_))));
        assert_eq!(room.expire_if_due(at(100)), None);
    }

    #[test]
    fn expiry_completes_only_when_due() {
        let mut room = room(RoomKind::WordCloud, Some(60));
        assert_eq!(room.expire_if_due(at(1000)), None);

        room.apply(&host(), Lifecycle::Start, at(0)).unwrap();
        assert_eq!(room.expire_if_due(at(59)), None);
        assert_eq!(room.expire_if_due(at(60)), Some(Transition::Ended { expired: true }));
        assert_eq!(room.status, RoomStatus::Completed);
    }

    #[test]
    fn untimed_rooms_stay_active() {
        let mut room = room(RoomKind::Poll, None);
        room.apply(&host(), Lifecycle::Start, at(0)).unwrap();
        assert_eq!(room.end_time, None);
        assert_eq!(room.expire_if_due(at(1_000_000)), None);
        assert_eq!(room.remaining(at(5)), None);
    }

    #[test]
    fn contribution_policy_per_kind() {
        let mut cloud = room(RoomKind::WordCloud, None);
        let mut qna = room(RoomKind::Qna, None);
        assert!(!cloud.accepts_contributions());
        assert!(qna.accepts_contributions());

        cloud.apply(&host(), Lifecycle::Start, at(0)).unwrap();
        qna.apply(&host(), Lifecycle::Start, at(0)).unwrap();
        assert!(cloud.accepts_contributions());
        assert!(qna.accepts_contributions());

        cloud.apply(&host(), Lifecycle::End, at(1)).unwrap();
        qna.apply(&host(), Lifecycle::End, at(1)).unwrap();
        assert!(!cloud.accepts_contributions());
        assert!(!qna.accepts_contributions());
    }
}
