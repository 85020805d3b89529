use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{auth::Identity, error::{RoomError, RoomResult}};

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;
pub const MAX_QUESTION_CHARS: usize = 200;
pub const MAX_OPTION_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    text: String,
    voters: BTreeSet<Identity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    question: String,
    options: Vec<PollOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionView {
    pub text: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub question: String,
    pub options: Vec<OptionView>,
    pub total_votes: usize,
}

fn checked_text(raw: &str, what: &str, max: usize) -> RoomResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(RoomError::validation(format!("{what} must not be empty")));
    }
    if text.chars().count() > max {
        return Err(RoomError::validation(format!("{what} is longer than {max} characters")));
    }
    Ok(text.to_owned())
}

impl Poll {
    pub fn new(question: &str, options: &[String]) -> RoomResult<Self> {
        let question = checked_text(question, "poll question", MAX_QUESTION_CHARS)?;
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
            return Err(RoomError::validation(format!(
                "a poll needs between {MIN_OPTIONS} and {MAX_OPTIONS} options"
            )));
        }
        let options = options
            .iter()
            .map(|text| {
                Ok(PollOption {
                    text: checked_text(text, "poll option", MAX_OPTION_CHARS)?,
                    voters: BTreeSet::new(),
                })
            })
            .collect::<RoomResult<_>>()?;

        Ok(Self { question, options })
    }

    /// One vote per identity across the whole poll.
    pub fn vote(&mut self, who: &Identity, index: usize) -> RoomResult<()> {
        if index >= self.options.len() {
            return Err(RoomError::validation(format!(
                "option {index} is out of range (poll has {} options)",
                self.options.len()
            )));
        }
        if self.voted_option(who).is_some() {
            return Err(RoomError::DuplicateAction("already voted in this poll".into()));
        }
        self.options[index].voters.insert(who.clone());
        Ok(())
    }

    pub fn voted_option(&self, who: &Identity) -> Option<usize> {
        self.options.iter().position(|option| option.voters.contains(who))
    }

    pub fn total_votes(&self) -> usize {
        self.options.iter().map(|option| option.voters.len()).sum()
    }

    pub fn view(&self) -> PollView {
        PollView {
            question: self.question.clone(),
            options: self
                .options
                .iter()
                .map(|option| OptionView {
                    text: option.text.clone(),
                    count: option.voters.len(),
                })
                .collect(),
            total_votes: self.total_votes(),
        }
    }
}
