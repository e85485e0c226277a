//! Chat platform seam
//!
//! The moderation core never talks to Discord directly. Everything it needs
//! from the gateway client goes through [`Platform`], which the bot binary
//! implements with serenity and the tests replace with a mock.

mod discord;

pub use discord::DiscordPlatform;
pub(crate) use discord::{case_embed, poll_components, poll_embed};

use crate::error::ModerationResult;
use crate::ledger::CaseLogEntry;
use crate::polls::Poll;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// A user as the ledger records them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: u64,
    pub tag: String,
}

impl Actor {
    pub fn new(id: u64, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into(),
        }
    }

    /// Discord mention markup for this user
    #[must_use]
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tag, self.id)
    }
}

/// What the bot may still do to a guild member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberStanding {
    /// The bot's role ceiling is above the member's
    pub moderatable: bool,
    pub timed_out_until: Option<DateTime<Utc>>,
}

impl MemberStanding {
    #[must_use]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.timed_out_until.is_some_and(|until| until > now)
    }
}

/// Operations the moderation core needs from the chat platform
///
/// Every method may fail with [`crate::ModerationError::PermissionDenied`] or
/// [`crate::ModerationError::NotFound`]; callers decide whether that is fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// The bot's own identity, recorded as moderator on automated cases
    fn bot_identity(&self) -> Actor;

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> ModerationResult<()>;

    /// Post a notice that removes itself after a short delay
    async fn send_ephemeral_notice(&self, channel_id: u64, text: String) -> ModerationResult<()>;

    async fn resolve_member(&self, guild_id: u64, user_id: u64)
    -> ModerationResult<MemberStanding>;

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: String,
    ) -> ModerationResult<()>;

    async fn ban_member(&self, guild_id: u64, user_id: u64, reason: String)
    -> ModerationResult<()>;

    async fn unban_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: String,
    ) -> ModerationResult<()>;

    /// Send a rendered case to a log channel, returning the message id
    async fn send_case_log(&self, channel_id: u64, entry: CaseLogEntry) -> ModerationResult<u64>;

    /// Re-render a poll's public message from its current state
    async fn render_poll(&self, poll: Poll) -> ModerationResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_actor_display_and_mention() {
        let actor = Actor::new(42, "someone");
        assert_eq!(actor.to_string(), "someone (42)");
        assert_eq!(actor.mention(), "<@42>");
    }

    #[test]
    fn test_member_standing_timeout() {
        let now = Utc::now();
        let standing = MemberStanding {
            moderatable: true,
            timed_out_until: Some(now + ChronoDuration::minutes(1)),
        };
        assert!(standing.is_timed_out(now));
        assert!(!standing.is_timed_out(now + ChronoDuration::minutes(2)));

        let free = MemberStanding {
            moderatable: true,
            timed_out_until: None,
        };
        assert!(!free.is_timed_out(now));
    }
}
