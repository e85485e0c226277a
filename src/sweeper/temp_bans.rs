use crate::CASE_TARGET;
use crate::data::PolicyStore;
use crate::error::ModerationResult;
use crate::ledger::{CaseAction, CaseDraft, CaseLedger};
use crate::platform::{Actor, Platform};
use crate::store::TempBanStore;
use crate::sweeper::{SweepKind, SweepReport, Sweeper};
use crate::temp_bans::TempBan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const TEMPBAN_EXPIRED_REASON: &str = "Tempban expired";

/// Lifts expired temp bans
///
/// Each record is claimed (deleted) before the unban call, so a record is
/// acted on at most once even if two passes see it.
pub struct TempBanSweeper {
    store: Arc<dyn TempBanStore>,
    platform: Arc<dyn Platform>,
    ledger: CaseLedger,
    policies: PolicyStore,
    batch: usize,
}

impl TempBanSweeper {
    pub fn new(
        store: Arc<dyn TempBanStore>,
        platform: Arc<dyn Platform>,
        ledger: CaseLedger,
        policies: PolicyStore,
        batch: usize,
    ) -> Self {
        Self {
            store,
            platform,
            ledger,
            policies,
            batch,
        }
    }

    async fn lift(&self, ban: &TempBan, report: &mut SweepReport) {
        match self.store.claim_temp_ban(&ban.id).await {
            Ok(true) => {}
            Ok(false) => {
                report.skipped += 1;
                return;
            }
            Err(e) => {
                error!(ban_id = %ban.id, guild_id = ban.guild_id, error = %e, "Failed to claim temp ban");
                report.failed += 1;
                return;
            }
        }

        let unbanned = self
            .platform
            .unban_member(ban.guild_id, ban.user_id, TEMPBAN_EXPIRED_REASON.to_string())
            .await;
        match unbanned {
            Ok(()) => {
                info!(guild_id = ban.guild_id, user_id = ban.user_id, "Temp ban lifted");
                report.applied += 1;
                self.record_unban(ban).await;
            }
            Err(e) if e.is_already_satisfied() => {
                info!(guild_id = ban.guild_id, user_id = ban.user_id, "Temp ban already lifted");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(
                    guild_id = ban.guild_id,
                    user_id = ban.user_id,
                    error = %e,
                    "Failed to lift temp ban, record dropped"
                );
                report.failed += 1;
            }
        }
    }

    async fn record_unban(&self, ban: &TempBan) {
        let tag = if ban.user_tag.is_empty() {
            ban.user_id.to_string()
        } else {
            ban.user_tag.clone()
        };
        let draft = CaseDraft::new(
            CaseAction::Unban,
            Actor::new(ban.user_id, tag),
            self.platform.bot_identity(),
        )
        .reason(TEMPBAN_EXPIRED_REASON);
        let log_channel = self.policies.fetch(ban.guild_id).mod_log_channel_id;

        if let Err(e) = self.ledger.record(ban.guild_id, log_channel, draft).await {
            error!(
                target: CASE_TARGET,
                guild_id = ban.guild_id,
                user_id = ban.user_id,
                error = %e,
                "Failed to record unban case"
            );
        }
    }
}

#[async_trait]
impl Sweeper for TempBanSweeper {
    fn kind(&self) -> SweepKind {
        SweepKind::TempBans
    }

    async fn sweep(&self, now: DateTime<Utc>) -> ModerationResult<SweepReport> {
        let due = self.store.due_temp_bans(now, self.batch).await?;
        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };
        for ban in &due {
            self.lift(ban, &mut report).await;
        }
        Ok(report)
    }
}
