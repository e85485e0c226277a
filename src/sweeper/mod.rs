//! Background expiry sweepers
//!
//! Each sweeper scans for records whose time has come and applies an
//! idempotent transition. Sweepers run on independent timers, never overlap
//! themselves, and can also be triggered through a [`SweepRequest`] channel.

mod polls;
mod temp_bans;
mod windows;

pub use polls::{PollSweeper, close_and_render, render_closed};
pub use temp_bans::{TEMPBAN_EXPIRED_REASON, TempBanSweeper};
pub use windows::WindowSweeper;

use crate::error::{ErrorKind, ModerationResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SweepKind {
    #[display("temp bans")]
    TempBans,
    #[display("polls")]
    Polls,
    #[display("violation windows")]
    ViolationWindows,
}

/// Requests accepted by the sweeper control task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    SweepAll,
    Sweep(SweepKind),
    Shutdown,
}

/// Counts from one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due records seen
    pub examined: usize,
    /// Transitions this pass performed
    pub applied: usize,
    /// Records already handled elsewhere or already satisfied
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The previous pass of this sweeper was still running
    Busy,
    Completed(SweepReport),
    Failed(ErrorKind),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sweeper: Send + Sync {
    fn kind(&self) -> SweepKind;

    /// One pass over everything due at `now`
    ///
    /// Per-record failures are counted in the report; an `Err` means the pass
    /// could not run at all.
    async fn sweep(&self, now: DateTime<Utc>) -> ModerationResult<SweepReport>;
}

/// A sweeper plus the lock that keeps its passes from overlapping
#[derive(Clone)]
pub struct SweeperSlot {
    sweeper: Arc<dyn Sweeper>,
    running: Arc<Mutex<()>>,
}

impl SweeperSlot {
    pub fn new(sweeper: Arc<dyn Sweeper>) -> Self {
        Self {
            sweeper,
            running: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SweepKind {
        self.sweeper.kind()
    }

    /// Run one pass unless one is already in progress
    pub async fn run(&self, now: DateTime<Utc>) -> SweepOutcome {
        let kind = self.kind();
        let Ok(_guard) = self.running.try_lock() else {
            debug!(%kind, "Previous sweep still running, skipping");
            return SweepOutcome::Busy;
        };

        match self.sweeper.sweep(now).await {
            Ok(report) => {
                if report.examined > 0 || report.applied > 0 {
                    info!(
                        %kind,
                        examined = report.examined,
                        applied = report.applied,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Sweep finished"
                    );
                }
                SweepOutcome::Completed(report)
            }
            Err(e) => {
                error!(%kind, error = %e, "Sweep failed");
                SweepOutcome::Failed(e.kind())
            }
        }
    }
}

/// Owns the sweepers and their timers
pub struct SweeperService {
    interval: Duration,
    slots: Vec<SweeperSlot>,
}

impl SweeperService {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, sweeper: impl Sweeper + 'static) -> Self {
        self.slots.push(SweeperSlot::new(Arc::new(sweeper)));
        self
    }

    /// Create the request channel for [`SweeperService::start`]
    #[must_use]
    pub fn channel() -> (Sender<SweepRequest>, Receiver<SweepRequest>) {
        mpsc::channel(16)
    }

    #[must_use]
    pub fn slots(&self) -> &[SweeperSlot] {
        &self.slots
    }

    /// Run every sweeper matching `kind` (all of them for `None`)
    pub async fn run_now(&self, kind: Option<SweepKind>) -> Vec<(SweepKind, SweepOutcome)> {
        let now = Utc::now();
        let mut outcomes = Vec::new();
        for slot in self
            .slots
            .iter()
            .filter(|slot| kind.is_none_or(|kind| slot.kind() == kind))
        {
            outcomes.push((slot.kind(), slot.run(now).await));
        }
        outcomes
    }

    /// Spawn one timer task per sweeper and a control task serving `rx`
    ///
    /// The control task stops the timers and exits on `Shutdown` or when
    /// every sender is dropped.
    pub fn start(self, mut rx: Receiver<SweepRequest>) -> JoinHandle<()> {
        info!(
            "Starting {} sweepers with {}s interval",
            self.slots.len(),
            self.interval.as_secs()
        );

        let timers: Vec<JoinHandle<()>> = self
            .slots
            .iter()
            .cloned()
            .map(|slot| {
                let period = self.interval;
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        interval.tick().await;
                        slot.run(Utc::now()).await;
                    }
                })
            })
            .collect();

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    SweepRequest::SweepAll => {
                        info!("Received request to run all sweepers");
                        self.run_now(None).await;
                    }
                    SweepRequest::Sweep(kind) => {
                        info!(%kind, "Received sweep request");
                        self.run_now(Some(kind)).await;
                    }
                    SweepRequest::Shutdown => {
                        info!("Received shutdown request for sweepers");
                        break;
                    }
                }
            }

            for timer in &timers {
                timer.abort();
            }
            info!("Sweepers shut down");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModerationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Blocks inside `sweep` until released
    struct SlowSweeper {
        started: Arc<Notify>,
        release: Arc<Notify>,
        passes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Sweeper for SlowSweeper {
        fn kind(&self) -> SweepKind {
            SweepKind::Polls
        }

        async fn sweep(&self, _now: DateTime<Utc>) -> ModerationResult<SweepReport> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(SweepReport::default())
        }
    }

    #[tokio::test]
    async fn test_slot_skips_overlapping_pass() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let passes = Arc::new(AtomicUsize::new(0));
        let slot = SweeperSlot::new(Arc::new(SlowSweeper {
            started: started.clone(),
            release: release.clone(),
            passes: passes.clone(),
        }));

        let first = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.run(Utc::now()).await })
        };
        started.notified().await;

        assert_eq!(slot.run(Utc::now()).await, SweepOutcome::Busy);
        release.notify_one();
        assert_eq!(
            first.await.unwrap(),
            SweepOutcome::Completed(SweepReport::default())
        );
        assert_eq!(passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_pass_is_reported() {
        let mut sweeper = MockSweeper::new();
        sweeper.expect_kind().return_const(SweepKind::TempBans);
        sweeper
            .expect_sweep()
            .times(1)
            .returning(|_| Err(ModerationError::StoreUnavailable("down".to_string())));

        let slot = SweeperSlot::new(Arc::new(sweeper));
        assert_eq!(
            slot.run(Utc::now()).await,
            SweepOutcome::Failed(ErrorKind::StoreUnavailable)
        );
    }

    #[tokio::test]
    async fn test_run_now_filters_by_kind() {
        let mut bans = MockSweeper::new();
        bans.expect_kind().return_const(SweepKind::TempBans);
        bans.expect_sweep().times(1).returning(|_| {
            Ok(SweepReport {
                examined: 1,
                applied: 1,
                ..SweepReport::default()
            })
        });
        let mut polls = MockSweeper::new();
        polls.expect_kind().return_const(SweepKind::Polls);
        polls.expect_sweep().never();

        let service = SweeperService::new(Duration::from_secs(60))
            .with(bans)
            .with(polls);
        let outcomes = service.run_now(Some(SweepKind::TempBans)).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, SweepKind::TempBans);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_tick_and_shutdown() {
        let mut sweeper = MockSweeper::new();
        sweeper.expect_kind().return_const(SweepKind::ViolationWindows);
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = passes.clone();
        sweeper.expect_sweep().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(SweepReport::default())
        });

        let (tx, rx) = SweeperService::channel();
        let handle = SweeperService::new(Duration::from_secs(60))
            .with(sweeper)
            .start(rx);

        // First tick fires immediately, the next after one interval
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(passes.load(Ordering::SeqCst) >= 2);

        tx.send(SweepRequest::SweepAll).await.unwrap();
        tx.send(SweepRequest::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
