use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{ConnectionId, Identity},
    error::{ErrorKind, RoomError},
};

use super::{
    lifecycle::Lifecycle,
    model::{RoomKind, RoomStatus, Snapshot},
    mutation::Mutation,
    poll::PollView,
    qna::QnaView,
    wordcloud::WordView,
};

/// Everything a client may send over the socket.
///
/// The aliases accept the event and field names older clients emit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(alias = "joinPoll", alias = "joinQnA")]
    JoinSession {
        #[serde(alias = "sessionId", alias = "pollId", alias = "qnaId")]
        room_id: Uuid,
    },
    LeaveSession {
        #[serde(alias = "sessionId", alias = "pollId", alias = "qnaId")]
        room_id: Uuid,
    },
    SubmitWord {
        #[serde(default, alias = "sessionId")]
        room_id: Option<Uuid>,
        #[serde(alias = "word")]
        text: String,
    },
    VotePoll {
        #[serde(alias = "pollId")]
        room_id: Uuid,
        option_index: usize,
    },
    AskQuestion {
        #[serde(alias = "qnaId")]
        room_id: Uuid,
        text: String,
    },
    UpvoteQuestion {
        #[serde(alias = "qnaId")]
        room_id: Uuid,
        question_id: Uuid,
    },
    MarkAnswered {
        #[serde(alias = "qnaId")]
        room_id: Uuid,
        question_id: Uuid,
    },
    #[serde(alias = "startPoll")]
    StartSession {
        #[serde(alias = "sessionId", alias = "pollId", alias = "qnaId")]
        room_id: Uuid,
    },
    #[serde(alias = "endPoll")]
    EndSession {
        #[serde(alias = "sessionId", alias = "pollId", alias = "qnaId")]
        room_id: Uuid,
    },
    CreateSession {
        time_limit: Option<u32>,
        title: Option<String>,
    },
    CreatePoll {
        question: String,
        options: Vec<String>,
        host_id: Option<String>,
        time_limit: Option<u32>,
    },
    #[serde(rename = "createQnA")]
    CreateQna {
        host_id: Option<String>,
        title: Option<String>,
        time_limit: Option<u32>,
    },
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        use ClientMessage::*;
        match self {
            JoinSession { .. } => "joinSession",
            LeaveSession { .. } => "leaveSession",
            SubmitWord { .. } => "submitWord",
            VotePoll { .. } => "votePoll",
            AskQuestion { .. } => "askQuestion",
            UpvoteQuestion { .. } => "upvoteQuestion",
            MarkAnswered { .. } => "markAnswered",
            StartSession { .. } => "startSession",
            EndSession { .. } => "endSession",
            CreateSession { .. } => "createSession",
            CreatePoll { .. } => "createPoll",
            CreateQna { .. } => "createQnA",
        }
    }

    /// The contribution this message carries, if it is one. Word
    /// submissions without a room id are resolved by the caller.
    pub fn mutation(&self) -> Option<(Option<Uuid>, Mutation)> {
        use ClientMessage::*;
        let (room_id, mutation) = match self {
            SubmitWord { room_id, text } => (*room_id, Mutation::SubmitWord { text: text.clone() }),
            VotePoll { room_id, option_index } => {
                (Some(*room_id), Mutation::Vote { option_index: *option_index })
            }
            AskQuestion { room_id, text } => (Some(*room_id), Mutation::Ask { text: text.clone() }),
            UpvoteQuestion { room_id, question_id } => {
                (Some(*room_id), Mutation::Upvote { question_id: *question_id })
            }
            MarkAnswered { room_id, question_id } => {
                (Some(*room_id), Mutation::MarkAnswered { question_id: *question_id })
            }
            _ => return None,
        };
        Some((room_id, mutation))
    }

    pub fn lifecycle(&self) -> Option<(Uuid, Lifecycle)> {
        match self {
            Self::StartSession { room_id } => Some((*room_id, Lifecycle::Start)),
            Self::EndSession { room_id } => Some((*room_id, Lifecycle::End)),
            _ => None,
        }
    }
}

/// Payload of the start/end events. Carries the absolute end time so every
/// client counts down to the same instant, plus the full state for resync.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub room_id: Uuid,
    pub status: RoomStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub expired: bool,
    pub state: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        connection_id: ConnectionId,
        identity: Identity,
    },
    SessionCreated {
        session_id: Uuid,
    },
    PollCreated {
        poll_id: Uuid,
    },
    #[serde(rename = "qnaCreated")]
    QnaCreated {
        qna_id: Uuid,
    },

    SessionState(Snapshot),
    PollState(Snapshot),
    QnaState(Snapshot),

    WordUpdate {
        room_id: Uuid,
        words: Vec<WordView>,
    },
    WordDelta {
        room_id: Uuid,
        #[serde(flatten)]
        word: WordView,
    },
    PollUpdate {
        room_id: Uuid,
        #[serde(flatten)]
        poll: PollView,
    },
    QnaUpdate {
        room_id: Uuid,
        #[serde(flatten)]
        qna: QnaView,
    },
    NewWord {
        room_id: Uuid,
        text: String,
        by: String,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },

    SessionStarted(LifecycleEvent),
    PollStarted(LifecycleEvent),
    SessionEnded(LifecycleEvent),
    PollEnded(LifecycleEvent),

    Error {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<&'static str>,
    },
}

impl ServerMessage {
    pub fn state(snapshot: Snapshot) -> Self {
        match snapshot.kind {
            RoomKind::WordCloud => Self::SessionState(snapshot),
            RoomKind::Poll => Self::PollState(snapshot),
            RoomKind::Qna => Self::QnaState(snapshot),
        }
    }

    pub fn started(event: LifecycleEvent) -> Self {
        match event.state.kind {
            RoomKind::Poll => Self::PollStarted(event),
            RoomKind::WordCloud | RoomKind::Qna => Self::SessionStarted(event),
        }
    }

    pub fn ended(event: LifecycleEvent) -> Self {
        match event.state.kind {
            RoomKind::Poll => Self::PollEnded(event),
            RoomKind::WordCloud | RoomKind::Qna => Self::SessionEnded(event),
        }
    }

    pub fn error(err: &RoomError, command: Option<&'static str>) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: serde_json::Value) -> ClientMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_canonical_names() {
        let id = Uuid::now_v7();
        assert_eq!(
            parse(json!({ "type": "votePoll", "roomId": id, "optionIndex": 2 })),
            ClientMessage::VotePoll { room_id: id, option_index: 2 }
        );
        assert_eq!(
            parse(json!({ "type": "submitWord", "text": "cat" })),
            ClientMessage::SubmitWord { room_id: None, text: "cat".into() }
        );
        assert_eq!(
            parse(json!({ "type": "createQnA" })),
            ClientMessage::CreateQna { host_id: None, title: None, time_limit: None }
        );
    }

    #[test]
    fn accepts_legacy_aliases() {
        let id = Uuid::now_v7();
        assert_eq!(
            parse(json!({ "type": "joinPoll", "pollId": id })),
            ClientMessage::JoinSession { room_id: id }
        );
        assert_eq!(
            parse(json!({ "type": "joinQnA", "qnaId": id })),
            ClientMessage::JoinSession { room_id: id }
        );
        assert_eq!(
            parse(json!({ "type": "submitWord", "sessionId": id, "word": "Cat" })),
            ClientMessage::SubmitWord { room_id: Some(id), text: "Cat".into() }
        );
        assert_eq!(
            parse(json!({ "type": "startPoll", "pollId": id })),
            ClientMessage::StartSession { room_id: id }
        );
        assert_eq!(
            parse(json!({ "type": "upvoteQuestion", "qnaId": id, "questionId": id })),
            ClientMessage::UpvoteQuestion { room_id: id, question_id: id }
        );
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "explode" })).is_err());
        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "votePoll", "roomId": "nope", "optionIndex": 0 })).is_err());
        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "votePoll", "roomId": Uuid::nil(), "optionIndex": -1 })).is_err());
    }

    #[test]
    fn server_messages_are_type_tagged() {
        let err = ServerMessage::error(&RoomError::DuplicateAction("already voted".into()), Some("votePoll"));
        assert_eq!(
            serde_json::to_value(err).unwrap(),
            json!({ "type": "error", "kind": "duplicate_action", "message": "already voted", "command": "votePoll" })
        );

        let id = Uuid::nil();
        let created = serde_json::to_value(ServerMessage::QnaCreated { qna_id: id }).unwrap();
        assert_eq!(created, json!({ "type": "qnaCreated", "qnaId": id }));

        let delta = ServerMessage::WordDelta {
            room_id: id,
            word: WordView { text: "cat".into(), value: 3, last_submitted_at: None },
        };
        let delta = serde_json::to_value(delta).unwrap();
        assert_eq!(delta["type"], "wordDelta");
        assert_eq!(delta["text"], "cat");
        assert_eq!(delta["value"], 3);
    }
}
