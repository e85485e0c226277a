//! Moderation case records

use crate::error::ModerationError;
use crate::platform::Actor;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reason stored when a moderator gives none
pub const DEFAULT_REASON: &str = "No reason provided";

/// What a case records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseAction {
    #[display("warn")]
    Warn,
    #[display("kick")]
    Kick,
    #[display("ban")]
    Ban,
    #[display("unban")]
    Unban,
    #[display("mute")]
    Mute,
    #[display("unmute")]
    Unmute,
    #[display("lock")]
    Lock,
    #[display("unlock")]
    Unlock,
    #[display("lockdown")]
    Lockdown,
    #[display("purge")]
    Purge,
    #[display("tempban")]
    Tempban,
    #[display("automod")]
    Automod,
}

impl CaseAction {
    pub const ALL: [Self; 12] = [
        Self::Warn,
        Self::Kick,
        Self::Ban,
        Self::Unban,
        Self::Mute,
        Self::Unmute,
        Self::Lock,
        Self::Unlock,
        Self::Lockdown,
        Self::Purge,
        Self::Tempban,
        Self::Automod,
    ];

    /// Embed colour for the case log
    #[must_use]
    pub const fn colour(self) -> u32 {
        match self {
            Self::Warn => 0x00ff_a500,
            Self::Kick | Self::Lock | Self::Automod => 0x00ff_6b6b,
            Self::Ban | Self::Tempban | Self::Lockdown => 0x00cc_0000,
            Self::Unban | Self::Unmute | Self::Unlock => 0x002e_cc71,
            Self::Mute => 0x00e6_7e22,
            Self::Purge => 0x0034_98db,
        }
    }
}

impl FromStr for CaseAction {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|action| action.to_string() == wanted)
            .ok_or_else(|| ModerationError::Validation(format!("Unknown case action: {s}")))
    }
}

/// Message details attached to automod cases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomodContext {
    /// Filter label, e.g. "Banned Word"
    pub filter: String,
    pub channel_id: u64,
    pub matched: Option<String>,
    pub content: String,
}

/// One immutable entry in a guild's case ledger
///
/// Only `reason` and `log_message_id` change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationCase {
    pub guild_id: u64,
    pub case_number: u64,
    pub action: CaseAction,
    pub target_id: u64,
    pub target_tag: String,
    pub moderator_id: u64,
    pub moderator_tag: String,
    pub reason: String,
    /// Length of timed actions, in seconds
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub log_message_id: Option<u64>,
    #[serde(default)]
    pub context: Option<AutomodContext>,
    pub created_at: DateTime<Utc>,
}

/// Everything about a case except its number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDraft {
    pub action: CaseAction,
    pub target: Actor,
    pub moderator: Actor,
    pub reason: String,
    pub duration_secs: Option<u64>,
    pub context: Option<AutomodContext>,
}

impl CaseDraft {
    pub fn new(action: CaseAction, target: Actor, moderator: Actor) -> Self {
        Self {
            action,
            target,
            moderator,
            reason: DEFAULT_REASON.to_string(),
            duration_secs: None,
            context: None,
        }
    }

    /// Blank reasons fall back to [`DEFAULT_REASON`]
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if !reason.trim().is_empty() {
            self.reason = reason;
        }
        self
    }

    #[must_use]
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn context(mut self, context: AutomodContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Stamp the draft with its allocated number
    #[must_use]
    pub fn into_case(self, guild_id: u64, case_number: u64, created_at: DateTime<Utc>) -> ModerationCase {
        ModerationCase {
            guild_id,
            case_number,
            action: self.action,
            target_id: self.target.id,
            target_tag: self.target.tag,
            moderator_id: self.moderator.id,
            moderator_tag: self.moderator.tag,
            reason: self.reason,
            duration_secs: self.duration_secs,
            log_message_id: None,
            context: self.context,
            created_at,
        }
    }
}
