use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Identity, error::{RoomError, RoomResult}};

use super::{
    model::{RoomContent, RoomKind, RoomRecord},
    wordcloud::WordFolded,
};

/// A contribution to a room, already parsed off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SubmitWord { text: String },
    Vote { option_index: usize },
    Ask { text: String },
    Upvote { question_id: Uuid },
    MarkAnswered { question_id: Uuid },
}

/// What a successful fold changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Folded {
    Word(WordFolded),
    Vote { option_index: usize },
    Asked { question_id: Uuid },
    Upvoted { question_id: Uuid, upvotes: usize },
    Answered { question_id: Uuid },
}

impl Mutation {
    pub fn target(&self) -> RoomKind {
        match self {
            Self::SubmitWord { .. } => RoomKind::WordCloud,
            Self::Vote { .. } => RoomKind::Poll,
            Self::Ask { .. } | Self::Upvote { .. } | Self::MarkAnswered { .. } => RoomKind::Qna,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitWord { .. } => "submitWord",
            Self::Vote { .. } => "votePoll",
            Self::Ask { .. } => "askQuestion",
            Self::Upvote { .. } => "upvoteQuestion",
            Self::MarkAnswered { .. } => "markAnswered",
        }
    }
}

/// Fold one mutation into a room record.
///
/// Checks run before anything is touched, so an error leaves the record as
/// it was.
pub fn apply(record: &mut RoomRecord, who: &Identity, mutation: Mutation, now: OffsetDateTime) -> RoomResult<Folded> {
    let room = &record.room;
    if room.kind != mutation.target() {
        return Err(RoomError::validation(format!(
            "{} is not accepted by a {} room",
            mutation.name(),
            room.kind
        )));
    }
    if !room.accepts_contributions() {
        return Err(RoomError::invalid_state(format!(
            "room is {}, {} is not accepted",
            room.status,
            mutation.name()
        )));
    }
    if matches!(mutation, Mutation::MarkAnswered { .. }) && !room.is_host(who) {
        return Err(RoomError::Authorization(
            "only the host can mark questions answered".into(),
        ));
    }

    match (&mut record.content, mutation) {
        (RoomContent::WordCloud(cloud), Mutation::SubmitWord { text }) => {
            cloud.submit(who, &text, now).map(Folded::Word)
        }
        (RoomContent::Poll(poll), Mutation::Vote { option_index }) => {
            poll.vote(who, option_index)?;
            Ok(Folded::Vote { option_index })
        }
        (RoomContent::Qna(qna), Mutation::Ask { text }) => {
            let question_id = qna.ask(who, &text, now)?;
            Ok(Folded::Asked { question_id })
        }
        (RoomContent::Qna(qna), Mutation::Upvote { question_id }) => {
            let upvotes = qna.upvote(who, question_id)?;
            Ok(Folded::Upvoted { question_id, upvotes })
        }
        (RoomContent::Qna(qna), Mutation::MarkAnswered { question_id }) => {
            qna.mark_answered(question_id, now)?;
            Ok(Folded::Answered { question_id })
        }
        (content, mutation) => Err(RoomError::validation(format!(
            "{} is not accepted by a {} room",
            mutation.name(),
            content.kind()
        ))),
    }
}
