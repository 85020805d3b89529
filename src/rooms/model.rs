use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Identity, error::{RoomError, RoomResult}};

use super::{
    poll::{Poll, PollView},
    qna::{Qna, QnaView},
    wordcloud::{FeedItem, RECENT_FEED_LEN, WordCloud, WordCloudView},
};

pub const MIN_TIME_LIMIT_SECS: u32 = 10;
pub const MAX_TIME_LIMIT_SECS: u32 = 3600;
pub const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    WordCloud,
    Poll,
    Qna,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WordCloud => "wordcloud",
            Self::Poll => "poll",
            Self::Qna => "qna",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wordcloud" => Ok(Self::WordCloud),
            "poll" => Ok(Self::Poll),
            "qna" => Ok(Self::Qna),
            _ => Err(RoomError::validation(format!("unknown room kind {s:?}"))),
        }
    }
}

/// Lifecycle position. The derived ordering is the only direction a room
/// may move in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Active,
    Completed,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            _ => Err(RoomError::validation(format!("unknown room status {s:?}"))),
        }
    }
}

/// Room metadata. Only the room's actor changes it, through the transitions
/// in `lifecycle`.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: Uuid,
    pub kind: RoomKind,
    pub host: Identity,
    pub status: RoomStatus,
    pub title: Option<String>,
    pub created_at: OffsetDateTime,
    pub time_limit: Option<u32>,
    pub end_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RoomContent {
    WordCloud(WordCloud),
    Poll(Poll),
    Qna(Qna),
}

impl RoomContent {
    pub fn kind(&self) -> RoomKind {
        match self {
            Self::WordCloud(_) => RoomKind::WordCloud,
            Self::Poll(_) => RoomKind::Poll,
            Self::Qna(_) => RoomKind::Qna,
        }
    }
}

/// A room together with everything contributed to it; the unit the store
/// reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub room: Room,
    pub content: RoomContent,
}

/// What a host asks for when opening a room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomDraft {
    WordCloud { title: Option<String>, time_limit: Option<u32> },
    Poll { question: String, options: Vec<String>, time_limit: Option<u32> },
    Qna { title: Option<String>, time_limit: Option<u32> },
}

fn checked_time_limit(time_limit: Option<u32>) -> RoomResult<Option<u32>> {
    match time_limit {
        Some(secs) if !(MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&secs) => {
            Err(RoomError::validation(format!(
                "time limit must be between {MIN_TIME_LIMIT_SECS} and {MAX_TIME_LIMIT_SECS} seconds"
            )))
        }
        other => Ok(other),
    }
}

fn checked_title(title: Option<String>) -> RoomResult<Option<String>> {
    let Some(title) = title else {
        return Ok(None);
    };
    let title = title.trim();
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(RoomError::validation(format!(
            "title is longer than {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok((!title.is_empty()).then(|| title.to_owned()))
}

impl RoomDraft {
    pub fn kind(&self) -> RoomKind {
        match self {
            Self::WordCloud { .. } => RoomKind::WordCloud,
            Self::Poll { .. } => RoomKind::Poll,
            Self::Qna { .. } => RoomKind::Qna,
        }
    }

    /// Validate the draft and build the initial `waiting` record.
    pub fn into_record(self, host: Identity, now: OffsetDateTime) -> RoomResult<RoomRecord> {
        if self.kind() == RoomKind::WordCloud && !host.is_registered() {
            return Err(RoomError::Authentication(
                "sign in to host a word cloud".into(),
            ));
        }

        let (title, time_limit, content) = match self {
            Self::WordCloud { title, time_limit } => {
                (checked_title(title)?, time_limit, RoomContent::WordCloud(WordCloud::default()))
            }
            Self::Poll { question, options, time_limit } => {
                (None, time_limit, RoomContent::Poll(Poll::new(&question, &options)?))
            }
            Self::Qna { title, time_limit } => {
                (checked_title(title)?, time_limit, RoomContent::Qna(Qna::default()))
            }
        };

        Ok(RoomRecord {
            room: Room {
                id: Uuid::now_v7(),
                kind: content.kind(),
                host,
                status: RoomStatus::Waiting,
                title,
                created_at: now,
                time_limit: checked_time_limit(time_limit)?,
                end_time: None,
            },
            content,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: Uuid,
    pub kind: RoomKind,
    pub status: RoomStatus,
    pub title: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&Room> for RoomSummary {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            kind: room.kind,
            status: room.status,
            title: room.title.clone(),
            created_at: room.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContentView {
    WordCloud(WordCloudView),
    Poll(PollView),
    Qna(QnaView),
}

impl ContentView {
    pub fn of(content: &RoomContent) -> Self {
        match content {
            RoomContent::WordCloud(cloud) => Self::WordCloud(cloud.view()),
            RoomContent::Poll(poll) => Self::Poll(poll.view()),
            RoomContent::Qna(qna) => Self::Qna(qna.view()),
        }
    }
}

/// The parts of a snapshot that depend on who is looking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    pub identity: Identity,
    pub is_host: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voted_option: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upvoted: Vec<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asked: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<Vec<FeedItem>>,
}

/// Full room state as sent on join and served to result pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: Uuid,
    pub kind: RoomKind,
    pub status: RoomStatus,
    pub title: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub time_limit: Option<u32>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub remaining_seconds: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub server_time: OffsetDateTime,
    #[serde(flatten)]
    pub content: ContentView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerState>,
}

impl RoomRecord {
    pub fn snapshot(&self, viewer: Option<&Identity>, now: OffsetDateTime) -> Snapshot {
        let room = &self.room;
        Snapshot {
            id: room.id,
            kind: room.kind,
            status: room.status,
            title: room.title.clone(),
            created_at: room.created_at,
            time_limit: room.time_limit,
            end_time: room.end_time,
            remaining_seconds: room.remaining(now).map(|left| left.as_secs()),
            server_time: now,
            content: ContentView::of(&self.content),
            viewer: viewer.map(|who| self.viewer_state(who)),
        }
    }

    fn viewer_state(&self, who: &Identity) -> ViewerState {
        let is_host = self.room.is_host(who);
        let mut state = ViewerState {
            identity: who.clone(),
            is_host,
            voted_option: None,
            upvoted: Vec::new(),
            asked: Vec::new(),
            feed: None,
        };
        match &self.content {
            RoomContent::WordCloud(cloud) if is_host => {
                state.feed = Some(cloud.recent(RECENT_FEED_LEN));
            }
            RoomContent::WordCloud(_) => {}
            RoomContent::Poll(poll) => state.voted_option = poll.voted_option(who),
            RoomContent::Qna(qna) => {
                state.upvoted = qna.upvoted_by(who);
                state.asked = qna.asked_by(who);
            }
        }
        state
    }
}
