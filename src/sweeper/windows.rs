use crate::error::ModerationResult;
use crate::moderation::EscalationTracker;
use crate::sweeper::{SweepKind, SweepReport, Sweeper};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Evicts violation windows that no longer hold any live entries
pub struct WindowSweeper {
    tracker: EscalationTracker,
}

impl WindowSweeper {
    pub fn new(tracker: EscalationTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Sweeper for WindowSweeper {
    fn kind(&self) -> SweepKind {
        SweepKind::ViolationWindows
    }

    async fn sweep(&self, now: DateTime<Utc>) -> ModerationResult<SweepReport> {
        let examined = self.tracker.len();
        let applied = self.tracker.evict_idle(now);
        Ok(SweepReport {
            examined,
            applied,
            ..SweepReport::default()
        })
    }
}
