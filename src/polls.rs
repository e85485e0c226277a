//! Timed polls
//!
//! A poll is a public message with one vote set per option. A user appears in
//! at most one option's set; voting again moves the vote. `is_closed` only
//! ever goes from false to true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Options above this count render as a select menu instead of buttons
pub const MAX_BUTTON_OPTIONS: usize = 5;
/// Discord component label limit
const LABEL_LIMIT: usize = 80;
/// Prefix shared by every poll component id
pub const CUSTOM_ID_PREFIX: &str = "poll";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub votes: BTreeSet<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub question: String,
    pub options: Vec<PollOption>,
    pub created_by: u64,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of a vote attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    /// The poll was already closed; nothing changed
    Closed,
    /// The poll's end time has passed; the caller should close it
    Expired,
    UnknownOption,
    UnknownPoll,
}

impl Poll {
    /// Create an open poll with options numbered `1..=n`
    pub fn new(
        guild_id: u64,
        channel_id: u64,
        message_id: u64,
        created_by: u64,
        question: impl Into<String>,
        labels: impl IntoIterator<Item = String>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        let options = labels
            .into_iter()
            .enumerate()
            .map(|(index, label)| PollOption {
                id: (index + 1).to_string(),
                label,
                votes: BTreeSet::new(),
            })
            .collect();
        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            channel_id,
            message_id,
            question: question.into(),
            options,
            created_by,
            ends_at,
            is_closed: false,
            created_at: Utc::now(),
        }
    }

    /// Open and past its end time
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_closed && self.ends_at.is_some_and(|ends| ends <= now)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|ends| ends <= now)
    }

    /// Mark closed; returns whether this call changed anything
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.is_closed, true)
    }

    /// Move `user_id`'s vote to `option_id`
    pub fn cast_vote(&mut self, user_id: u64, option_id: &str, now: DateTime<Utc>) -> VoteOutcome {
        if self.is_closed {
            return VoteOutcome::Closed;
        }
        if self.is_expired(now) {
            return VoteOutcome::Expired;
        }
        if !self.options.iter().any(|option| option.id == option_id) {
            return VoteOutcome::UnknownOption;
        }

        for option in &mut self.options {
            if option.id == option_id {
                option.votes.insert(user_id);
            } else {
                option.votes.remove(&user_id);
            }
        }
        VoteOutcome::Recorded
    }

    #[must_use]
    pub fn total_votes(&self) -> usize {
        self.options.iter().map(|option| option.votes.len()).sum()
    }

    /// Render state for the poll message
    #[must_use]
    pub fn view(&self, now: DateTime<Utc>) -> PollView {
        let total = self.total_votes();
        let lines: Vec<String> = self
            .options
            .iter()
            .enumerate()
            .map(|(index, option)| {
                let count = option.votes.len();
                let percent = if total == 0 {
                    0
                } else {
                    (count * 100 + total / 2) / total
                };
                format!("{}. {} — {count} ({percent}%)", index + 1, option.label)
            })
            .collect();

        let description = if lines.is_empty() {
            "No votes yet.".to_string()
        } else {
            lines.join("\n")
        };

        let footer = match self.ends_at {
            _ if self.is_closed => "Poll closed".to_string(),
            Some(ends) => format!("Ends <t:{}:R>", ends.timestamp()),
            None => "Vote below".to_string(),
        };

        let disabled = self.is_closed || self.is_expired(now);
        let choices = self
            .options
            .iter()
            .map(|option| (option.id.clone(), clamp_label(&option.label)))
            .collect();

        let controls = if self.options.len() <= MAX_BUTTON_OPTIONS {
            PollControls::Buttons(choices)
        } else {
            PollControls::Select(choices)
        };

        PollView {
            title: self.question.clone(),
            description,
            footer,
            controls,
            disabled,
            poll_id: self.id.clone(),
        }
    }
}

/// Component layout for a rendered poll; each choice is `(option id, label)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollControls {
    Buttons(Vec<(String, String)>),
    Select(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollView {
    pub title: String,
    pub description: String,
    pub footer: String,
    pub controls: PollControls,
    pub disabled: bool,
    poll_id: String,
}

impl PollView {
    /// Custom id of the button for one option
    #[must_use]
    pub fn button_id(&self, option_id: &str) -> String {
        format!("{CUSTOM_ID_PREFIX}:{}:{option_id}", self.poll_id)
    }

    /// Custom id of the select menu
    #[must_use]
    pub fn select_id(&self) -> String {
        format!("{CUSTOM_ID_PREFIX}:{}", self.poll_id)
    }
}

/// Split a component id into `(poll id, option id)`
#[must_use]
pub fn parse_custom_id(custom_id: &str) -> Option<(&str, Option<&str>)> {
    let mut parts = custom_id.split(':');
    if parts.next()? != CUSTOM_ID_PREFIX {
        return None;
    }
    let poll_id = parts.next().filter(|id| !id.is_empty())?;
    Some((poll_id, parts.next().filter(|id| !id.is_empty())))
}

fn clamp_label(label: &str) -> String {
    if label.chars().count() <= LABEL_LIMIT {
        return label.to_string();
    }
    let mut cut: String = label.chars().take(LABEL_LIMIT - 3).collect();
    cut.push_str("...");
    cut
}
