//! Per-message automod pipeline
//!
//! A message is either bypassed or run through the filters in
//! [`FilterKind::PRIORITY`] order. Every side effect is a step whose outcome
//! lands in the [`PipelineReport`]; no step failure stops later steps or
//! later messages.

use crate::data::PolicyConfig;
use crate::error::{ErrorKind, ModerationResult};
use crate::ledger::{AutomodContext, CaseAction, CaseDraft, CaseLedger};
use crate::moderation::escalation::EscalationTracker;
use crate::moderation::filters::{FilterKind, FilterMatch, MentionSet, evaluate};
use crate::platform::{Actor, Platform};
use crate::{CASE_TARGET, MODERATION_TARGET};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Label used on cases logged for automatic timeouts
const AUTO_TIMEOUT_LABEL: &str = "Auto Timeout";

/// A guild message as the pipeline sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author: Actor,
    pub author_roles: Vec<u64>,
    /// Author holds Manage Messages in this guild
    pub author_is_staff: bool,
    pub content: String,
    pub mentions: MentionSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    IgnoredChannel,
    StaffPermission,
    ModRole,
}

/// Where a message ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Bypassed(BypassReason),
    /// A destructive filter matched; evaluation stopped there
    Deleted,
    /// Only advisory filters matched
    Flagged,
    Clean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Delete,
    Warn,
    RecordCase,
    TimeoutNotice,
    TimeoutCase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// The target was already gone
    AlreadySatisfied,
    Failed(ErrorKind),
}

impl StepOutcome {
    fn from_result<T>(result: &ModerationResult<T>) -> Self {
        match result {
            Ok(_) => Self::Done,
            Err(e) if e.is_already_satisfied() => Self::AlreadySatisfied,
            Err(e) => Self::Failed(e.kind()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub filter: FilterKind,
    pub step: Step,
    pub outcome: StepOutcome,
}

/// What escalation did for this message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    Disabled,
    /// Counted, below the threshold
    Pending,
    MemberUnavailable(ErrorKind),
    NotModeratable,
    AlreadyTimedOut,
    TimeoutFailed(ErrorKind),
    TimedOut { minutes: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub state: MessageState,
    pub matches: Vec<FilterMatch>,
    pub steps: Vec<StepReport>,
    /// Numbers of every case committed while handling the message
    pub cases: Vec<u64>,
    pub escalation: Option<EscalationOutcome>,
}

impl PipelineReport {
    fn new(state: MessageState) -> Self {
        Self {
            state,
            matches: Vec::new(),
            steps: Vec::new(),
            cases: Vec::new(),
            escalation: None,
        }
    }

    fn push(&mut self, filter: FilterKind, step: Step, outcome: StepOutcome) {
        self.steps.push(StepReport {
            filter,
            step,
            outcome,
        });
    }

    /// Outcome of the first matching step
    #[must_use]
    pub fn outcome(&self, filter: FilterKind, step: Step) -> Option<StepOutcome> {
        self.steps
            .iter()
            .find(|report| report.filter == filter && report.step == step)
            .map(|report| report.outcome)
    }
}

/// Decide whether a message skips automod
#[must_use]
pub fn bypass_reason(config: &PolicyConfig, message: &InboundMessage) -> Option<BypassReason> {
    if config.ignored_channel_ids.contains(&message.channel_id) {
        return Some(BypassReason::IgnoredChannel);
    }
    if config.moderation.bypass_staff && message.author_is_staff {
        return Some(BypassReason::StaffPermission);
    }
    if config
        .mod_role_id
        .is_some_and(|role| message.author_roles.contains(&role))
    {
        return Some(BypassReason::ModRole);
    }
    None
}

#[derive(Clone)]
pub struct ModerationPipeline {
    platform: Arc<dyn Platform>,
    ledger: CaseLedger,
    tracker: EscalationTracker,
}

impl ModerationPipeline {
    pub fn new(platform: Arc<dyn Platform>, ledger: CaseLedger, tracker: EscalationTracker) -> Self {
        Self {
            platform,
            ledger,
            tracker,
        }
    }

    /// Run automod for one message under `config`
    pub async fn process(&self, config: &PolicyConfig, message: &InboundMessage) -> PipelineReport {
        if let Some(reason) = bypass_reason(config, message) {
            debug!(
                target: MODERATION_TARGET,
                guild_id = message.guild_id,
                message_id = message.message_id,
                ?reason,
                "Message bypassed automod"
            );
            return PipelineReport::new(MessageState::Bypassed(reason));
        }

        let mut report = PipelineReport::new(MessageState::Clean);
        for kind in FilterKind::PRIORITY {
            let Some(hit) = evaluate(kind, &message.content, &message.mentions, &config.moderation)
            else {
                continue;
            };

            info!(
                target: MODERATION_TARGET,
                guild_id = message.guild_id,
                channel_id = message.channel_id,
                user_id = message.author.id,
                filter = %kind,
                matched = hit.matched.as_deref().unwrap_or_default(),
                "Automod filter matched"
            );

            if kind.is_destructive() {
                let deleted = self
                    .platform
                    .delete_message(message.channel_id, message.message_id)
                    .await;
                if let Err(e) = &deleted {
                    warn!(
                        target: MODERATION_TARGET,
                        guild_id = message.guild_id,
                        message_id = message.message_id,
                        error = %e,
                        "Failed to delete message"
                    );
                }
                report.push(kind, Step::Delete, StepOutcome::from_result(&deleted));
                report.state = MessageState::Deleted;
            } else {
                report.state = MessageState::Flagged;
            }

            if let Some(warning) = kind.warning() {
                let text = format!("{}, {warning}", message.author.mention());
                let outcome = self.notify(message, text).await;
                report.push(kind, Step::Warn, outcome);
            }

            let outcome = self.record_automod_case(config, message, &hit, &mut report).await;
            report.push(kind, Step::RecordCase, outcome);

            if kind.feeds_escalation() {
                let escalation = self.escalate(config, message, kind, &mut report).await;
                report.escalation = Some(escalation);
            }

            report.matches.push(hit);
            if kind.is_destructive() {
                break;
            }
        }

        report
    }

    async fn notify(&self, message: &InboundMessage, text: String) -> StepOutcome {
        let result = self
            .platform
            .send_ephemeral_notice(message.channel_id, text)
            .await;
        if let Err(e) = &result {
            warn!(
                target: MODERATION_TARGET,
                channel_id = message.channel_id,
                error = %e,
                "Failed to send automod notice"
            );
        }
        StepOutcome::from_result(&result)
    }

    async fn record_automod_case(
        &self,
        config: &PolicyConfig,
        message: &InboundMessage,
        hit: &FilterMatch,
        report: &mut PipelineReport,
    ) -> StepOutcome {
        let draft = CaseDraft::new(
            CaseAction::Automod,
            message.author.clone(),
            self.platform.bot_identity(),
        )
        .reason(hit.case_reason())
        .context(AutomodContext {
            filter: hit.kind.to_string(),
            channel_id: message.channel_id,
            matched: hit.matched.clone(),
            content: message.content.clone(),
        });
        self.commit_case(config, message, draft, report).await
    }

    async fn commit_case(
        &self,
        config: &PolicyConfig,
        message: &InboundMessage,
        draft: CaseDraft,
        report: &mut PipelineReport,
    ) -> StepOutcome {
        let result = self
            .ledger
            .record(message.guild_id, config.mod_log_channel_id, draft)
            .await;
        match &result {
            Ok(receipt) => report.cases.push(receipt.case_number()),
            Err(e) => error!(
                target: CASE_TARGET,
                guild_id = message.guild_id,
                user_id = message.author.id,
                error = %e,
                "Failed to record automod case"
            ),
        }
        StepOutcome::from_result(&result)
    }

    /// Count a violation and time the author out once the window fills
    async fn escalate(
        &self,
        config: &PolicyConfig,
        message: &InboundMessage,
        kind: FilterKind,
        report: &mut PipelineReport,
    ) -> EscalationOutcome {
        let policy = &config.moderation.escalation;
        if !policy.enabled {
            return EscalationOutcome::Disabled;
        }

        let triggered = self.tracker.record_violation(
            message.guild_id,
            message.author.id,
            policy.window(),
            policy.max_violations,
        );
        if !triggered {
            return EscalationOutcome::Pending;
        }

        let guild_id = message.guild_id;
        let user_id = message.author.id;
        let standing = match self.platform.resolve_member(guild_id, user_id).await {
            Ok(standing) => standing,
            Err(e) => {
                warn!(target: MODERATION_TARGET, guild_id, user_id, error = %e, "Escalation skipped, member unavailable");
                return EscalationOutcome::MemberUnavailable(e.kind());
            }
        };
        if !standing.moderatable {
            warn!(target: MODERATION_TARGET, guild_id, user_id, "Escalation skipped, member outranks the bot");
            return EscalationOutcome::NotModeratable;
        }
        if standing.is_timed_out(Utc::now()) {
            debug!(target: MODERATION_TARGET, guild_id, user_id, "Escalation skipped, already timed out");
            return EscalationOutcome::AlreadyTimedOut;
        }

        if let Err(e) = self
            .platform
            .timeout_member(
                guild_id,
                user_id,
                policy.timeout(),
                format!("Auto timeout: {}", kind.escalation_reason()),
            )
            .await
        {
            error!(target: MODERATION_TARGET, guild_id, user_id, error = %e, "Failed to time out member");
            return EscalationOutcome::TimeoutFailed(e.kind());
        }
        info!(
            target: MODERATION_TARGET,
            guild_id,
            user_id,
            minutes = policy.timeout_minutes,
            "Member timed out for repeated violations"
        );

        let text = format!(
            "{}, you have been timed out for {} minutes due to repeated violations.",
            message.author.mention(),
            policy.timeout_minutes
        );
        let outcome = self.notify(message, text).await;
        report.push(kind, Step::TimeoutNotice, outcome);

        let draft = CaseDraft::new(
            CaseAction::Automod,
            message.author.clone(),
            self.platform.bot_identity(),
        )
        .reason(format!(
            "[{AUTO_TIMEOUT_LABEL}] Reached {} violations in {} minutes",
            policy.max_violations, policy.window_minutes
        ))
        .duration_secs(policy.timeout().as_secs())
        .context(AutomodContext {
            filter: AUTO_TIMEOUT_LABEL.to_string(),
            channel_id: message.channel_id,
            matched: None,
            content: message.content.clone(),
        });
        let outcome = self.commit_case(config, message, draft, report).await;
        report.push(kind, Step::TimeoutCase, outcome);

        EscalationOutcome::TimedOut {
            minutes: policy.timeout_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModerationError;
    use crate::platform::{MemberStanding, MockPlatform};
    use crate::store::{CaseStore, MemoryStore, MockCaseStore};
    use crate::test_support::{bot_platform, message, policy_with};

    fn pipeline(platform: MockPlatform, store: Arc<dyn CaseStore>) -> ModerationPipeline {
        let platform: Arc<dyn Platform> = Arc::new(platform);
        let ledger = CaseLedger::new(store, Arc::clone(&platform), 3);
        ModerationPipeline::new(platform, ledger, EscalationTracker::new())
    }

    #[tokio::test]
    async fn test_ignored_channel_and_staff_bypass() {
        let pipeline = pipeline(MockPlatform::new(), Arc::new(MemoryStore::in_memory()));
        let mut config = policy_with(|policy| {
            policy.banned_words.enabled = true;
            policy.banned_words.words = vec!["spam".to_string()];
        });
        config.mod_role_id = Some(900);

        let mut msg = message("spam");
        msg.author_is_staff = true;
        let report = pipeline.process(&config, &msg).await;
        assert_eq!(report.state, MessageState::Bypassed(BypassReason::StaffPermission));

        msg.author_is_staff = false;
        msg.author_roles = vec![900];
        let report = pipeline.process(&config, &msg).await;
        assert_eq!(report.state, MessageState::Bypassed(BypassReason::ModRole));

        config.ignored_channel_ids.insert(msg.channel_id);
        let report = pipeline.process(&config, &msg).await;
        assert_eq!(report.state, MessageState::Bypassed(BypassReason::IgnoredChannel));
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn test_staff_evaluated_when_bypass_disabled() {
        let mut platform = bot_platform();
        platform.expect_send_ephemeral_notice().returning(|_, _| Ok(()));
        let pipeline = pipeline(platform, Arc::new(MemoryStore::in_memory()));
        let config = policy_with(|policy| {
            policy.bypass_staff = false;
            policy.caps.enabled = true;
        });

        let mut msg = message("THIS IS VERY LOUD");
        msg.author_is_staff = true;
        let report = pipeline.process(&config, &msg).await;
        assert_eq!(report.state, MessageState::Flagged);
    }

    #[tokio::test]
    async fn test_delete_failure_still_logs_and_stops() {
        let mut platform = bot_platform();
        platform
            .expect_delete_message()
            .times(1)
            .returning(|_, _| Err(ModerationError::PermissionDenied("no manage".to_string())));
        platform
            .expect_send_ephemeral_notice()
            .withf(|_, text| text.ends_with("your message contained a banned word and was removed."))
            .times(1)
            .returning(|_, _| Ok(()));
        let store = Arc::new(MemoryStore::in_memory());
        let pipeline = pipeline(platform, store.clone());

        let config = policy_with(|policy| {
            policy.banned_words.enabled = true;
            policy.banned_words.words = vec!["spam".to_string()];
            policy.regex_filters.enabled = true;
            policy.regex_filters.patterns = vec!["sp.m".to_string()];
        });
        let report = pipeline.process(&config, &message("buy spam")).await;

        assert_eq!(report.state, MessageState::Deleted);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(
            report.outcome(FilterKind::BannedWords, Step::Delete),
            Some(StepOutcome::Failed(ErrorKind::PermissionDenied))
        );
        assert_eq!(
            report.outcome(FilterKind::BannedWords, Step::RecordCase),
            Some(StepOutcome::Done)
        );
        assert_eq!(report.escalation, Some(EscalationOutcome::Pending));
        assert_eq!(report.cases, vec![1]);

        let case = store.get_case(1, 1).await.unwrap().unwrap();
        assert_eq!(case.reason, "[Banned Word] Banned word detected (matched: spam)");
        assert_eq!(case.moderator_tag, "warden");
    }

    #[tokio::test]
    async fn test_message_already_gone_counts_as_satisfied() {
        let mut platform = bot_platform();
        platform
            .expect_delete_message()
            .returning(|_, _| Err(ModerationError::NotFound("message".to_string())));
        platform.expect_send_ephemeral_notice().returning(|_, _| Ok(()));
        let pipeline = pipeline(platform, Arc::new(MemoryStore::in_memory()));

        let config = policy_with(|policy| {
            policy.regex_filters.enabled = true;
            policy.regex_filters.patterns = vec!["(".to_string(), r"discord\.gg/\w+".to_string()];
        });
        let report = pipeline.process(&config, &message("join discord.gg/abc")).await;
        assert_eq!(
            report.outcome(FilterKind::Regex, Step::Delete),
            Some(StepOutcome::AlreadySatisfied)
        );
        assert_eq!(report.state, MessageState::Deleted);
    }

    #[tokio::test]
    async fn test_advisory_filters_all_run() {
        let mut platform = bot_platform();
        platform
            .expect_send_ephemeral_notice()
            .times(2)
            .returning(|_, _| Ok(()));
        let pipeline = pipeline(platform, Arc::new(MemoryStore::in_memory()));

        let config = policy_with(|policy| {
            policy.caps.enabled = true;
            policy.mentions.enabled = true;
            policy.mentions.max = 1;
            policy.swears.enabled = true;
        });
        let mut msg = message("WHAT THE HELL IS THIS");
        msg.mentions.users.extend([1, 2]);
        let report = pipeline.process(&config, &msg).await;

        assert_eq!(report.state, MessageState::Flagged);
        let kinds: Vec<FilterKind> = report.matches.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![FilterKind::Caps, FilterKind::Mentions, FilterKind::SwearMonitor]
        );
        assert_eq!(report.cases, vec![1, 2, 3]);
        assert!(report.outcome(FilterKind::SwearMonitor, Step::Warn).is_none());
        assert_eq!(report.escalation, Some(EscalationOutcome::Pending));
    }

    #[tokio::test]
    async fn test_clean_message() {
        let pipeline = pipeline(MockPlatform::new(), Arc::new(MemoryStore::in_memory()));
        let config = policy_with(|policy| {
            policy.caps.enabled = true;
            policy.swears.enabled = true;
        });
        let report = pipeline.process(&config, &message("hello there")).await;
        assert_eq!(report.state, MessageState::Clean);
        assert!(report.steps.is_empty());
        assert!(report.escalation.is_none());
    }

    #[tokio::test]
    async fn test_third_violation_times_out() {
        let mut platform = bot_platform();
        platform.expect_resolve_member().times(1).returning(|_, _| {
            Ok(MemberStanding {
                moderatable: true,
                timed_out_until: None,
            })
        });
        platform
            .expect_timeout_member()
            .withf(|_, user_id, duration, reason| {
                *user_id == 500
                    && duration.as_secs() == 300
                    && reason == "Auto timeout: Swear word"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        platform
            .expect_send_ephemeral_notice()
            .withf(|_, text| {
                text == "<@500>, you have been timed out for 5 minutes due to repeated violations."
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let store = Arc::new(MemoryStore::in_memory());
        let pipeline = pipeline(platform, store.clone());
        let config = policy_with(|policy| policy.swears.enabled = true);

        for _ in 0..2 {
            let report = pipeline.process(&config, &message("oh crap")).await;
            assert_eq!(report.escalation, Some(EscalationOutcome::Pending));
        }
        let report = pipeline.process(&config, &message("oh crap")).await;
        assert_eq!(report.escalation, Some(EscalationOutcome::TimedOut { minutes: 5 }));
        assert_eq!(report.cases, vec![3, 4]);

        let case = store.get_case(1, 4).await.unwrap().unwrap();
        assert_eq!(case.reason, "[Auto Timeout] Reached 3 violations in 5 minutes");
        assert_eq!(case.duration_secs, Some(300));
    }

    #[tokio::test]
    async fn test_unmoderatable_member_is_not_timed_out() {
        let mut platform = bot_platform();
        platform.expect_resolve_member().returning(|_, _| {
            Ok(MemberStanding {
                moderatable: false,
                timed_out_until: None,
            })
        });
        let pipeline = pipeline(platform, Arc::new(MemoryStore::in_memory()));
        let config = policy_with(|policy| {
            policy.swears.enabled = true;
            policy.escalation.max_violations = 1;
        });

        let report = pipeline.process(&config, &message("crap")).await;
        assert_eq!(report.escalation, Some(EscalationOutcome::NotModeratable));
        assert!(report.outcome(FilterKind::SwearMonitor, Step::TimeoutCase).is_none());
    }

    #[tokio::test]
    async fn test_case_store_down_does_not_block_escalation() {
        let mut platform = bot_platform();
        platform
            .expect_resolve_member()
            .returning(|_, _| Err(ModerationError::NotFound("member left".to_string())));
        let mut store = MockCaseStore::new();
        store
            .expect_next_case_number()
            .returning(|_| Err(ModerationError::StoreUnavailable("disk".to_string())));
        let pipeline = pipeline(platform, Arc::new(store));
        let config = policy_with(|policy| {
            policy.swears.enabled = true;
            policy.escalation.max_violations = 1;
        });

        let report = pipeline.process(&config, &message("crap")).await;
        assert_eq!(
            report.outcome(FilterKind::SwearMonitor, Step::RecordCase),
            Some(StepOutcome::Failed(ErrorKind::StoreUnavailable))
        );
        assert_eq!(
            report.escalation,
            Some(EscalationOutcome::MemberUnavailable(ErrorKind::NotFound))
        );
        assert!(report.cases.is_empty());
    }
}
