use crate::error::ModerationResult;
use crate::platform::Platform;
use crate::polls::Poll;
use crate::store::PollStore;
use crate::sweeper::{SweepKind, SweepReport, Sweeper};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Close a poll and redraw its message
///
/// Returns `None` when the poll was already closed by someone else, in which
/// case nothing is rendered. A render failure is logged and does not reopen
/// the poll.
pub async fn close_and_render(
    store: &dyn PollStore,
    platform: &dyn Platform,
    id: &str,
) -> ModerationResult<Option<Poll>> {
    let Some(poll) = store.close_poll(id).await? else {
        return Ok(None);
    };
    info!(poll_id = %poll.id, guild_id = poll.guild_id, votes = poll.total_votes(), "Poll closed");
    render_closed(platform, &poll).await;
    Ok(Some(poll))
}

/// Redraw a poll that has just been closed
pub async fn render_closed(platform: &dyn Platform, poll: &Poll) {
    match platform.render_poll(poll.clone()).await {
        Ok(()) => {}
        Err(e) if e.is_already_satisfied() => {
            info!(poll_id = %poll.id, "Poll message is gone, nothing to redraw");
        }
        Err(e) => {
            warn!(poll_id = %poll.id, error = %e, "Failed to redraw closed poll");
        }
    }
}

/// Closes polls whose end time has passed
pub struct PollSweeper {
    store: Arc<dyn PollStore>,
    platform: Arc<dyn Platform>,
    batch: usize,
}

impl PollSweeper {
    pub fn new(store: Arc<dyn PollStore>, platform: Arc<dyn Platform>, batch: usize) -> Self {
        Self {
            store,
            platform,
            batch,
        }
    }
}

#[async_trait]
impl Sweeper for PollSweeper {
    fn kind(&self) -> SweepKind {
        SweepKind::Polls
    }

    async fn sweep(&self, now: DateTime<Utc>) -> ModerationResult<SweepReport> {
        let due = self.store.due_polls(now, self.batch).await?;
        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };

        for poll in &due {
            match close_and_render(self.store.as_ref(), self.platform.as_ref(), &poll.id).await {
                Ok(Some(_)) => report.applied += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(poll_id = %poll.id, error = %e, "Failed to close poll");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModerationError;
    use crate::polls::VoteOutcome;
    use crate::store::MemoryStore;
    use crate::test_support::{bot_platform, unwritable_store};
    use chrono::Duration;

    fn poll(ends_at: DateTime<Utc>) -> Poll {
        Poll::new(
            1,
            2,
            3,
            4,
            "Lunch?",
            ["pizza".to_string(), "tacos".to_string()],
            Some(ends_at),
        )
    }

    #[tokio::test]
    async fn test_sweep_closes_due_polls_once() {
        let store = Arc::new(MemoryStore::in_memory());
        let now = Utc::now();
        let due = poll(now - Duration::minutes(1));
        let later = poll(now + Duration::hours(1));
        let due_id = due.id.clone();
        store.insert_poll(due).await.unwrap();
        store.insert_poll(later.clone()).await.unwrap();

        let mut platform = bot_platform();
        platform
            .expect_render_poll()
            .withf(move |poll| poll.id == due_id && poll.is_closed)
            .times(1)
            .returning(|_| Ok(()));
        let sweeper = PollSweeper::new(store.clone(), Arc::new(platform), 25);

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(sweeper.sweep(now).await.unwrap(), SweepReport::default());

        let untouched = store.get_poll(&later.id).await.unwrap().unwrap();
        assert!(!untouched.is_closed);
    }

    #[tokio::test]
    async fn test_manual_close_races_sweep() {
        let store = Arc::new(MemoryStore::in_memory());
        let now = Utc::now();
        let poll = poll(now + Duration::minutes(1));
        let id = poll.id.clone();
        store.insert_poll(poll).await.unwrap();
        let (outcome, _) = store
            .cast_vote(&id, 42, "2".to_string(), now)
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);

        let mut platform = bot_platform();
        platform.expect_render_poll().times(1).returning(|_| Ok(()));
        let platform: Arc<dyn Platform> = Arc::new(platform);
        let sweeper = PollSweeper::new(store.clone(), Arc::clone(&platform), 25);

        let later = now + Duration::minutes(2);
        let (manual, swept) = tokio::join!(
            close_and_render(&*store, platform.as_ref(), &id),
            sweeper.sweep(later)
        );
        let swept = swept.unwrap();
        assert_eq!(
            usize::from(manual.unwrap().is_some()) + swept.applied,
            1
        );

        let stored = store.get_poll(&id).await.unwrap().unwrap();
        assert!(stored.is_closed);
        assert!(stored.options[1].votes.contains(&42));
    }

    #[tokio::test]
    async fn test_unwritable_snapshot_still_redraws_poll() {
        let store = Arc::new(unwritable_store().await);
        let now = Utc::now();
        let poll = poll(now - Duration::minutes(1));
        let id = poll.id.clone();
        store.insert_poll(poll).await.unwrap();

        let mut platform = bot_platform();
        platform
            .expect_render_poll()
            .withf(move |poll| poll.id == id && poll.is_closed)
            .times(1)
            .returning(|_| Ok(()));
        let sweeper = PollSweeper::new(store.clone(), Arc::new(platform), 25);

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(sweeper.sweep(now).await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_render_failure_keeps_poll_closed() {
        let store = Arc::new(MemoryStore::in_memory());
        let now = Utc::now();
        let poll = poll(now - Duration::minutes(1));
        let id = poll.id.clone();
        store.insert_poll(poll).await.unwrap();

        let mut platform = bot_platform();
        platform
            .expect_render_poll()
            .times(1)
            .returning(|_| Err(ModerationError::PermissionDenied("edit".to_string())));
        let sweeper = PollSweeper::new(store.clone(), Arc::new(platform), 25);

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(store.get_poll(&id).await.unwrap().unwrap().is_closed);
        assert!(store.due_polls(now, 0).await.unwrap().is_empty());
    }
}
