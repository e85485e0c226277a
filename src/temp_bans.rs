//! Timed bans
//!
//! Issuing a temp ban bans the member, stores a [`TempBan`] record and logs a
//! `tempban` case. The record is removed exactly once, by the sweeper, after
//! `expires_at`.

use crate::CASE_TARGET;
use crate::error::{ModerationError, ModerationResult};
use crate::ledger::{CaseAction, CaseDraft, CaseLedger, CaseReceipt, DEFAULT_REASON};
use crate::platform::{Actor, Platform};
use crate::store::TempBanStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBan {
    pub id: String,
    pub guild_id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub user_tag: String,
    pub moderator_id: u64,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TempBan {
    pub fn new(
        guild_id: u64,
        user: &Actor,
        moderator_id: u64,
        reason: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            user_id: user.id,
            user_tag: user.tag.clone(),
            moderator_id,
            reason: reason.into(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Human duration for audit reasons, e.g. `6 hour(s)`
#[must_use]
pub fn describe_duration(secs: u64) -> String {
    match secs {
        0..3_600 => format!("{} minute(s)", secs / 60),
        3_600..86_400 => format!("{} hour(s)", secs / 3_600),
        _ => format!("{} day(s)", secs / 86_400),
    }
}

/// A temp ban that took effect
#[derive(Debug)]
pub struct TempBanReceipt {
    pub ban: TempBan,
    /// `None` when the ban stands but its case could not be logged
    pub case: Option<CaseReceipt>,
}

#[derive(Clone)]
pub struct TempBanService {
    store: Arc<dyn TempBanStore>,
    platform: Arc<dyn Platform>,
    ledger: CaseLedger,
}

impl TempBanService {
    pub fn new(store: Arc<dyn TempBanStore>, platform: Arc<dyn Platform>, ledger: CaseLedger) -> Self {
        Self {
            store,
            platform,
            ledger,
        }
    }

    /// Ban `target` for `duration`
    ///
    /// # Errors
    /// Returns `Validation` for self-targeting or a zero duration, the
    /// platform error if the ban is refused, or the store error if the expiry
    /// record cannot be saved (the ban is in place at that point).
    pub async fn issue(
        &self,
        guild_id: u64,
        log_channel_id: Option<u64>,
        target: Actor,
        moderator: Actor,
        duration: Duration,
        reason: &str,
    ) -> ModerationResult<TempBanReceipt> {
        if target.id == moderator.id {
            return Err(ModerationError::Validation("You cannot tempban yourself.".to_string()));
        }
        if target.id == self.platform.bot_identity().id {
            return Err(ModerationError::Validation("I cannot tempban myself.".to_string()));
        }
        let secs = duration.as_secs();
        if secs == 0 {
            return Err(ModerationError::Validation(
                "Tempban duration must be positive".to_string(),
            ));
        }
        let length = chrono::Duration::from_std(duration)
            .map_err(|e| ModerationError::Validation(format!("Tempban duration too long: {e}")))?;

        let reason = match reason.trim() {
            "" => DEFAULT_REASON,
            reason => reason,
        };

        self.platform
            .ban_member(
                guild_id,
                target.id,
                format!("[Tempban: {}] {reason}", describe_duration(secs)),
            )
            .await?;

        let ban = TempBan::new(guild_id, &target, moderator.id, reason, Utc::now() + length);
        if let Err(e) = self.store.insert_temp_ban(ban.clone()).await {
            error!(
                guild_id,
                user_id = target.id,
                error = %e,
                "Ban applied but its expiry record was not saved"
            );
            return Err(e);
        }
        info!(
            guild_id,
            user_id = target.id,
            moderator_id = moderator.id,
            expires_at = %ban.expires_at,
            "Temp ban issued"
        );

        let draft = CaseDraft::new(CaseAction::Tempban, target, moderator)
            .reason(reason)
            .duration_secs(secs);
        let case = match self.ledger.record(guild_id, log_channel_id, draft).await {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                error!(target: CASE_TARGET, guild_id, error = %e, "Failed to record tempban case");
                None
            }
        };

        Ok(TempBanReceipt { ban, case })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use crate::store::{CaseStore, MemoryStore, TempBanStore};

    fn platform() -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform
            .expect_bot_identity()
            .returning(|| Actor::new(1, "warden"));
        platform
    }

    fn service(store: &Arc<MemoryStore>, platform: MockPlatform) -> TempBanService {
        let platform: Arc<dyn Platform> = Arc::new(platform);
        let ledger = CaseLedger::new(store.clone(), Arc::clone(&platform), 3);
        TempBanService::new(store.clone(), platform, ledger)
    }

    #[test]
    fn test_describe_duration() {
        assert_eq!(describe_duration(1_800), "30 minute(s)");
        assert_eq!(describe_duration(21_600), "6 hour(s)");
        assert_eq!(describe_duration(604_800), "7 day(s)");
    }

    #[tokio::test]
    async fn test_issue_bans_records_and_logs() {
        let store = Arc::new(MemoryStore::in_memory());
        let mut platform = platform();
        platform
            .expect_ban_member()
            .withf(|guild_id, user_id, reason| {
                *guild_id == 10 && *user_id == 20 && reason == "[Tempban: 1 hour(s)] spamming"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let receipt = service(&store, platform)
            .issue(
                10,
                None,
                Actor::new(20, "target"),
                Actor::new(30, "mod"),
                Duration::from_secs(3_600),
                "spamming",
            )
            .await
            .unwrap();

        assert_eq!(receipt.ban.user_id, 20);
        let case = receipt.case.unwrap().case;
        assert_eq!(case.action, CaseAction::Tempban);
        assert_eq!(case.duration_secs, Some(3_600));

        let later = Utc::now() + chrono::Duration::hours(2);
        let due = store.due_temp_bans(later, 25).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(store.due_temp_bans(Utc::now(), 25).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refused_ban_leaves_no_record() {
        let store = Arc::new(MemoryStore::in_memory());
        let mut platform = platform();
        platform
            .expect_ban_member()
            .returning(|_, _, _| Err(ModerationError::PermissionDenied("hierarchy".to_string())));

        let err = service(&store, platform)
            .issue(
                10,
                None,
                Actor::new(20, "target"),
                Actor::new(30, "mod"),
                Duration::from_secs(60),
                "",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ModerationError::PermissionDenied(_)));
        let later = Utc::now() + chrono::Duration::days(1);
        assert!(store.due_temp_bans(later, 0).await.unwrap().is_empty());
        assert!(store.get_case(10, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_self_and_bot_targets() {
        let store = Arc::new(MemoryStore::in_memory());
        let service = service(&store, platform());
        let mod_actor = Actor::new(30, "mod");

        let own = service
            .issue(10, None, mod_actor.clone(), mod_actor.clone(), Duration::from_secs(60), "")
            .await;
        assert!(matches!(own, Err(ModerationError::Validation(_))));

        let bot = service
            .issue(10, None, Actor::new(1, "warden"), mod_actor.clone(), Duration::from_secs(60), "")
            .await;
        assert!(matches!(bot, Err(ModerationError::Validation(_))));

        let zero = service
            .issue(10, None, Actor::new(20, "t"), mod_actor, Duration::ZERO, "")
            .await;
        assert!(matches!(zero, Err(ModerationError::Validation(_))));
    }
}
