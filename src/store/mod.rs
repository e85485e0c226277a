//! Persistence seams for cases, temp bans and polls
//!
//! The traits mirror what a document store offers: find by filter with sort
//! and limit, atomic increment, insert with a uniqueness check, conditional
//! update and conditional delete. [`MemoryStore`] implements all three.
//!
//! Mutating calls report what took effect. Callers read `Err` as "nothing
//! changed", so a durability failure after the change landed is not an `Err`.

mod memory;

pub use memory::MemoryStore;

use crate::error::ModerationResult;
use crate::ledger::{CaseAction, ModerationCase};
use crate::polls::{Poll, VoteOutcome};
use crate::temp_bans::TempBan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Filter for case lookups; results come back newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseQuery {
    pub guild_id: u64,
    pub target_id: Option<u64>,
    pub action: Option<CaseAction>,
    pub limit: usize,
}

impl CaseQuery {
    #[must_use]
    pub fn guild(guild_id: u64, limit: usize) -> Self {
        Self {
            guild_id,
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, case: &ModerationCase) -> bool {
        case.guild_id == self.guild_id
            && self.target_id.is_none_or(|target| case.target_id == target)
            && self.action.is_none_or(|action| case.action == action)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Atomically increment and return the guild's case counter
    async fn next_case_number(&self, guild_id: u64) -> ModerationResult<u64>;

    /// Insert a case, failing with `AllocationConflict` if its number is taken
    async fn insert_case(&self, case: ModerationCase) -> ModerationResult<()>;

    async fn get_case(&self, guild_id: u64, case_number: u64)
    -> ModerationResult<Option<ModerationCase>>;

    async fn find_cases(&self, query: CaseQuery) -> ModerationResult<Vec<ModerationCase>>;

    /// Replace a case's reason, returning the updated case
    async fn set_case_reason(
        &self,
        guild_id: u64,
        case_number: u64,
        reason: String,
    ) -> ModerationResult<Option<ModerationCase>>;

    async fn set_case_log_message(
        &self,
        guild_id: u64,
        case_number: u64,
        message_id: u64,
    ) -> ModerationResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TempBanStore: Send + Sync {
    async fn insert_temp_ban(&self, ban: TempBan) -> ModerationResult<()>;

    /// Bans with `expires_at <= now`, soonest first, at most `limit`
    async fn due_temp_bans(&self, now: DateTime<Utc>, limit: usize)
    -> ModerationResult<Vec<TempBan>>;

    /// Delete a ban record; only the caller that removed it gets `true`
    async fn claim_temp_ban(&self, id: &str) -> ModerationResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn insert_poll(&self, poll: Poll) -> ModerationResult<()>;

    async fn get_poll(&self, id: &str) -> ModerationResult<Option<Poll>>;

    /// Open polls past their end time, soonest first, at most `limit`
    async fn due_polls(&self, now: DateTime<Utc>, limit: usize) -> ModerationResult<Vec<Poll>>;

    /// Flip `is_closed`; only the caller that flipped it gets the poll back
    async fn close_poll(&self, id: &str) -> ModerationResult<Option<Poll>>;

    /// Apply a vote atomically against the stored poll
    async fn cast_vote(
        &self,
        id: &str,
        user_id: u64,
        option_id: String,
        now: DateTime<Utc>,
    ) -> ModerationResult<(VoteOutcome, Option<Poll>)>;
}
