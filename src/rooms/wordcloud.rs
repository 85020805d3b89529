use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{auth::Identity, error::{RoomError, RoomResult}};

pub const MAX_WORD_CHARS: usize = 20;
pub const RECENT_FEED_LEN: usize = 50;

/// Case-fold, trim and cap a submitted word.
///
/// Runs of inner whitespace collapse to one space so "ice  cream" and
/// "Ice Cream" land on the same entry.
pub fn normalize(raw: &str) -> RoomResult<String> {
    let folded = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let capped: String = folded.chars().take(MAX_WORD_CHARS).collect();
    let capped = capped.trim_end();
    if capped.is_empty() {
        return Err(RoomError::validation("word must not be empty"));
    }
    Ok(capped.to_owned())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub by: Identity,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// One normalized word and every submission that folded into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    history: Vec<Submission>,
}

impl WordEntry {
    pub fn count(&self) -> usize {
        self.history.len()
    }

    pub fn last_submitted_at(&self) -> Option<OffsetDateTime> {
        self.history.last().map(|s| s.at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordCloud {
    entries: BTreeMap<String, WordEntry>,
}

/// The entry a submission landed on, with its count after the fold.
#[derive(Debug, Clone, PartialEq)]
pub struct WordFolded {
    pub text: String,
    pub value: usize,
    pub by: Identity,
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordView {
    pub text: String,
    pub value: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_submitted_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedItem {
    pub text: String,
    pub by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordCloudView {
    pub words: Vec<WordView>,
    pub total_submissions: usize,
}

impl WordCloud {
    pub fn submit(&mut self, by: &Identity, raw: &str, at: OffsetDateTime) -> RoomResult<WordFolded> {
        let text = normalize(raw)?;
        let entry = self.entries.entry(text.clone()).or_default();
        entry.history.push(Submission { by: by.clone(), at });

        Ok(WordFolded {
            value: entry.count(),
            text,
            by: by.clone(),
            at,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, text: &str) -> Option<&WordEntry> {
        self.entries.get(text)
    }

    pub fn total_submissions(&self) -> usize {
        self.entries.values().map(WordEntry::count).sum()
    }

    pub fn word_view(&self, text: &str) -> Option<WordView> {
        self.entries.get(text).map(|entry| WordView {
            text: text.to_owned(),
            value: entry.count(),
            last_submitted_at: entry.last_submitted_at(),
        })
    }

    pub fn view(&self) -> WordCloudView {
        let words = self
            .entries
            .iter()
            .map(|(text, entry)| WordView {
                text: text.clone(),
                value: entry.count(),
                last_submitted_at: entry.last_submitted_at(),
            })
            .collect();

        WordCloudView {
            words,
            total_submissions: self.total_submissions(),
        }
    }

    /// Newest submissions first, for the host's live feed.
    pub fn recent(&self, limit: usize) -> Vec<FeedItem> {
        let mut feed: Vec<FeedItem> = self
            .entries
            .iter()
            .flat_map(|(text, entry)| {
                entry.history.iter().map(move |s| FeedItem {
                    text: text.clone(),
                    by: s.by.public_label().to_owned(),
                    at: s.at,
                })
            })
            .collect();
        feed.sort_by(|a, b| b.at.cmp(&a.at));
        feed.truncate(limit);
        feed
    }
}
