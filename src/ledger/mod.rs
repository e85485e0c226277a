//! Case ledger
//!
//! Allocates per-guild case numbers, stores cases, and mirrors them to the
//! guild's mod log channel.
//!
//! Allocation pairs an atomic counter with a unique insert. The counter makes
//! concurrent callers see distinct numbers; the insert catches numbers taken
//! behind the counter's back, and the ledger retries those with a fresh number.

mod case;
mod render;

pub use case::{AutomodContext, CaseAction, CaseDraft, DEFAULT_REASON, ModerationCase};
pub use render::{CaseLogEntry, format_duration, render_case};

use crate::CASE_TARGET;
use crate::error::{ModerationError, ModerationResult};
use crate::platform::Platform;
use crate::store::{CaseQuery, CaseStore};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default number of cases returned by a search
pub const SEARCH_LIMIT: usize = 15;

/// A committed case plus the background mirror task, if one was started
#[derive(Debug)]
pub struct CaseReceipt {
    pub case: ModerationCase,
    pub mirror: Option<JoinHandle<()>>,
}

impl CaseReceipt {
    #[must_use]
    pub fn case_number(&self) -> u64 {
        self.case.case_number
    }
}

#[derive(Clone)]
pub struct CaseLedger {
    store: Arc<dyn CaseStore>,
    platform: Arc<dyn Platform>,
    max_attempts: u32,
}

impl CaseLedger {
    pub fn new(store: Arc<dyn CaseStore>, platform: Arc<dyn Platform>, max_attempts: u32) -> Self {
        Self {
            store,
            platform,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Allocate a number, store the case, and start mirroring it
    ///
    /// The case is committed once this returns `Ok`; mirroring runs on its own
    /// task and a mirror failure never removes the case.
    ///
    /// # Errors
    /// Returns `AllocationExhausted` if every attempt hit a taken number, or
    /// the store's error if allocation or insert fails otherwise.
    pub async fn record(
        &self,
        guild_id: u64,
        log_channel_id: Option<u64>,
        draft: CaseDraft,
    ) -> ModerationResult<CaseReceipt> {
        for attempt in 1..=self.max_attempts {
            let case_number = self.store.next_case_number(guild_id).await?;
            let case = draft.clone().into_case(guild_id, case_number, Utc::now());

            match self.store.insert_case(case.clone()).await {
                Ok(()) => {
                    info!(
                        target: CASE_TARGET,
                        guild_id,
                        case_number,
                        action = %case.action,
                        target_id = case.target_id,
                        moderator_id = case.moderator_id,
                        "Recorded case"
                    );
                    let mirror = log_channel_id.map(|channel_id| self.spawn_mirror(channel_id, case.clone()));
                    return Ok(CaseReceipt { case, mirror });
                }
                Err(ModerationError::AllocationConflict { .. }) => {
                    warn!(
                        target: CASE_TARGET,
                        guild_id, case_number, attempt, "Case number already taken, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(ModerationError::AllocationExhausted {
            guild_id,
            attempts: self.max_attempts,
        })
    }

    fn spawn_mirror(&self, channel_id: u64, case: ModerationCase) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let platform = Arc::clone(&self.platform);
        tokio::spawn(async move {
            mirror_case(store.as_ref(), platform.as_ref(), channel_id, &case).await;
        })
    }

    /// # Errors
    /// Propagates store failures.
    pub async fn get_case(
        &self,
        guild_id: u64,
        case_number: u64,
    ) -> ModerationResult<Option<ModerationCase>> {
        self.store.get_case(guild_id, case_number).await
    }

    /// Replace a case's reason
    ///
    /// # Errors
    /// Returns `NotFound` if the case does not exist and `Validation` for a
    /// blank reason.
    pub async fn edit_reason(
        &self,
        guild_id: u64,
        case_number: u64,
        reason: &str,
    ) -> ModerationResult<ModerationCase> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ModerationError::Validation("Reason cannot be empty".to_string()));
        }

        let updated = self
            .store
            .set_case_reason(guild_id, case_number, reason.to_string())
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("Case #{case_number}")))?;
        info!(target: CASE_TARGET, guild_id, case_number, "Case reason edited");
        Ok(updated)
    }

    /// Cases for one target, newest first
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn search(
        &self,
        guild_id: u64,
        target_id: u64,
        action: Option<CaseAction>,
    ) -> ModerationResult<Vec<ModerationCase>> {
        self.store
            .find_cases(CaseQuery {
                guild_id,
                target_id: Some(target_id),
                action,
                limit: SEARCH_LIMIT,
            })
            .await
    }
}

async fn mirror_case(
    store: &dyn CaseStore,
    platform: &dyn Platform,
    channel_id: u64,
    case: &ModerationCase,
) {
    let guild_id = case.guild_id;
    let case_number = case.case_number;

    let message_id = match platform.send_case_log(channel_id, render_case(case)).await {
        Ok(message_id) => message_id,
        Err(e) => {
            warn!(
                target: CASE_TARGET,
                guild_id, case_number, channel_id, error = %e, "Failed to mirror case to log channel"
            );
            return;
        }
    };

    if let Err(e) = store
        .set_case_log_message(guild_id, case_number, message_id)
        .await
    {
        error!(
            target: CASE_TARGET,
            guild_id, case_number, message_id, error = %e, "Failed to store case log message id"
        );
    }
}
