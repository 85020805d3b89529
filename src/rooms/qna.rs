use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Identity, error::{RoomError, RoomResult}};

pub const MAX_QUESTION_CHARS: usize = 280;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub author: Identity,
    upvoters: BTreeSet<Identity>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub answered_at: Option<OffsetDateTime>,
}

impl Question {
    pub fn upvotes(&self) -> usize {
        self.upvoters.len()
    }

    pub fn is_answered(&self) -> bool {
        self.answered_at.is_some()
    }

    fn view(&self) -> QuestionView {
        QuestionView {
            id: self.id,
            text: self.text.clone(),
            upvotes: self.upvotes(),
            answered: self.is_answered(),
            created_at: self.created_at,
        }
    }
}

/// Questions in the order they were asked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Qna {
    questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: Uuid,
    pub text: String,
    pub upvotes: usize,
    pub answered: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QnaView {
    /// Unanswered, most upvoted first, earliest first on ties.
    pub questions: Vec<QuestionView>,
    /// Answered, in the order they were asked.
    pub answered: Vec<QuestionView>,
}

impl Qna {
    pub fn ask(&mut self, who: &Identity, raw: &str, at: OffsetDateTime) -> RoomResult<Uuid> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(RoomError::validation("question must not be empty"));
        }
        if text.chars().count() > MAX_QUESTION_CHARS {
            return Err(RoomError::validation(format!(
                "question is longer than {MAX_QUESTION_CHARS} characters"
            )));
        }

        let id = Uuid::now_v7();
        self.questions.push(Question {
            id,
            text: text.to_owned(),
            author: who.clone(),
            upvoters: BTreeSet::new(),
            created_at: at,
            answered_at: None,
        });
        Ok(id)
    }

    pub fn upvote(&mut self, who: &Identity, question_id: Uuid) -> RoomResult<usize> {
        let question = self.find_mut(question_id)?;
        if question.is_answered() {
            return Err(RoomError::invalid_state("question was already answered"));
        }
        if &question.author == who {
            return Err(RoomError::validation("cannot upvote your own question"));
        }
        if !question.upvoters.insert(who.clone()) {
            return Err(RoomError::DuplicateAction("already upvoted this question".into()));
        }
        Ok(question.upvotes())
    }

    /// Answered is final: there is no way back to the active list.
    pub fn mark_answered(&mut self, question_id: Uuid, at: OffsetDateTime) -> RoomResult<()> {
        let question = self.find_mut(question_id)?;
        if question.is_answered() {
            return Err(RoomError::invalid_state("question was already answered"));
        }
        question.answered_at = Some(at);
        Ok(())
    }

    pub fn get(&self, question_id: Uuid) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn upvoted_by(&self, who: &Identity) -> Vec<Uuid> {
        self.questions
            .iter()
            .filter(|q| q.upvoters.contains(who))
            .map(|q| q.id)
            .collect()
    }

    pub fn asked_by(&self, who: &Identity) -> Vec<Uuid> {
        self.questions
            .iter()
            .filter(|q| &q.author == who)
            .map(|q| q.id)
            .collect()
    }

    pub fn view(&self) -> QnaView {
        let (answered, mut active): (Vec<&Question>, Vec<&Question>) =
            self.questions.iter().partition(|q| q.is_answered());
        // stable: equal upvotes and timestamps keep asking order
        active.sort_by(|a, b| {
            b.upvotes()
                .cmp(&a.upvotes())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        QnaView {
            questions: active.into_iter().map(Question::view).collect(),
            answered: answered.into_iter().map(Question::view).collect(),
        }
    }

    fn find_mut(&mut self, question_id: Uuid) -> RoomResult<&mut Question> {
        self.questions
            .iter_mut()
            .find(|q| q.id == question_id)
            .ok_or_else(|| RoomError::NotFound(format!("question {question_id}")))
    }
}
