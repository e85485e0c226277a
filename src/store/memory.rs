//! `DashMap`-backed store with an optional YAML snapshot

use crate::error::{ModerationError, ModerationResult};
use crate::ledger::ModerationCase;
use crate::polls::{Poll, VoteOutcome};
use crate::store::{CaseQuery, CaseStore, PollStore, TempBanStore};
use crate::temp_bans::TempBan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// On-disk layout of the snapshot file
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    cases: Vec<ModerationCase>,
    #[serde(default)]
    temp_bans: Vec<TempBan>,
    #[serde(default)]
    polls: Vec<Poll>,
}

/// In-process store for cases, temp bans and polls
///
/// Every mutation is applied to the maps first and then written out as a
/// whole-file snapshot. If the write fails the change still stands in memory
/// and the failure is logged; the next successful write catches the file up.
/// Only [`MemoryStore::persist`] itself returns `StoreUnavailable`.
#[derive(Default)]
pub struct MemoryStore {
    cases: DashMap<(u64, u64), ModerationCase>,
    /// Highest case number handed out per guild
    case_counters: DashMap<u64, u64>,
    temp_bans: DashMap<String, TempBan>,
    polls: DashMap<String, Poll>,
    snapshot_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("cases", &self.cases.len())
            .field("temp_bans", &self.temp_bans.len())
            .field("polls", &self.polls.len())
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// A store that never touches the filesystem
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path`, or start empty if it does not exist yet
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> ModerationResult<Self> {
        let path = path.into();
        let mut store = Self::default();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let snapshot: Snapshot = serde_yaml::from_str(&content)?;
                store.restore(snapshot);
                info!(
                    path = %path.display(),
                    cases = store.cases.len(),
                    temp_bans = store.temp_bans.len(),
                    polls = store.polls.len(),
                    "Loaded moderation snapshot"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No moderation snapshot yet, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        store.snapshot_path = Some(path);
        Ok(store)
    }

    fn restore(&mut self, snapshot: Snapshot) {
        for case in snapshot.cases {
            let mut counter = self.case_counters.entry(case.guild_id).or_insert(0);
            *counter = (*counter).max(case.case_number);
            drop(counter);
            self.cases.insert((case.guild_id, case.case_number), case);
        }
        for ban in snapshot.temp_bans {
            self.temp_bans.insert(ban.id.clone(), ban);
        }
        for poll in snapshot.polls {
            self.polls.insert(poll.id.clone(), poll);
        }
    }

    fn highest_case_number(&self, guild_id: u64) -> u64 {
        self.cases
            .iter()
            .filter(|entry| entry.key().0 == guild_id)
            .map(|entry| entry.key().1)
            .max()
            .unwrap_or(0)
    }

    fn snapshot(&self) -> Snapshot {
        let mut cases: Vec<ModerationCase> =
            self.cases.iter().map(|entry| entry.value().clone()).collect();
        cases.sort_by_key(|case| (case.guild_id, case.case_number));
        let mut temp_bans: Vec<TempBan> = self
            .temp_bans
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        temp_bans.sort_by_key(|ban| ban.expires_at);
        let mut polls: Vec<Poll> = self.polls.iter().map(|entry| entry.value().clone()).collect();
        polls.sort_by_key(|poll| poll.created_at);
        Snapshot {
            cases,
            temp_bans,
            polls,
        }
    }

    /// Write the current state to the snapshot file, if one is configured
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the snapshot cannot be serialized or written.
    pub async fn persist(&self) -> ModerationResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let yaml = serde_yaml::to_string(&self.snapshot())
            .map_err(|e| ModerationError::StoreUnavailable(format!("serialize snapshot: {e}")))?;
        write_atomically(path, &yaml)
            .await
            .map_err(|e| ModerationError::StoreUnavailable(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Wrote moderation snapshot");
        Ok(())
    }

    /// Snapshot after a change that already took effect in memory
    async fn flush(&self, change: &'static str) {
        if let Err(e) = self.persist().await {
            error!(change, error = %e, "Moderation snapshot is behind memory");
        }
    }
}

async fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("yaml.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}

fn take_limit<T>(items: Vec<T>, limit: usize) -> Vec<T> {
    if limit == 0 {
        return items;
    }
    items.into_iter().take(limit).collect()
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn next_case_number(&self, guild_id: u64) -> ModerationResult<u64> {
        let mut counter = self
            .case_counters
            .entry(guild_id)
            .or_insert_with(|| self.highest_case_number(guild_id));
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_case(&self, case: ModerationCase) -> ModerationResult<()> {
        let guild_id = case.guild_id;
        let case_number = case.case_number;
        match self.cases.entry((guild_id, case_number)) {
            Entry::Occupied(_) => {
                return Err(ModerationError::AllocationConflict {
                    guild_id,
                    case_number,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(case);
            }
        }

        // Keep the counter ahead of numbers inserted from elsewhere
        {
            let mut counter = self.case_counters.entry(guild_id).or_insert(0);
            *counter = (*counter).max(case_number);
        }

        self.flush("insert case").await;
        Ok(())
    }

    async fn get_case(
        &self,
        guild_id: u64,
        case_number: u64,
    ) -> ModerationResult<Option<ModerationCase>> {
        Ok(self
            .cases
            .get(&(guild_id, case_number))
            .map(|entry| entry.value().clone()))
    }

    async fn find_cases(&self, query: CaseQuery) -> ModerationResult<Vec<ModerationCase>> {
        let mut found: Vec<ModerationCase> = self
            .cases
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| b.case_number.cmp(&a.case_number));
        Ok(take_limit(found, query.limit))
    }

    async fn set_case_reason(
        &self,
        guild_id: u64,
        case_number: u64,
        reason: String,
    ) -> ModerationResult<Option<ModerationCase>> {
        let updated = self.cases.get_mut(&(guild_id, case_number)).map(|mut entry| {
            entry.reason = reason;
            entry.value().clone()
        });
        if updated.is_some() {
            self.flush("edit case reason").await;
        }
        Ok(updated)
    }

    async fn set_case_log_message(
        &self,
        guild_id: u64,
        case_number: u64,
        message_id: u64,
    ) -> ModerationResult<()> {
        let found = self
            .cases
            .get_mut(&(guild_id, case_number))
            .map(|mut entry| entry.log_message_id = Some(message_id))
            .is_some();
        if !found {
            return Err(ModerationError::NotFound(format!(
                "Case #{case_number} in guild {guild_id}"
            )));
        }
        self.flush("set case log message").await;
        Ok(())
    }
}

#[async_trait]
impl TempBanStore for MemoryStore {
    async fn insert_temp_ban(&self, ban: TempBan) -> ModerationResult<()> {
        self.temp_bans.insert(ban.id.clone(), ban);
        self.flush("insert temp ban").await;
        Ok(())
    }

    async fn due_temp_bans(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> ModerationResult<Vec<TempBan>> {
        let mut due: Vec<TempBan> = self
            .temp_bans
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|ban| ban.expires_at);
        Ok(take_limit(due, limit))
    }

    async fn claim_temp_ban(&self, id: &str) -> ModerationResult<bool> {
        if self.temp_bans.remove(id).is_none() {
            return Ok(false);
        }
        self.flush("claim temp ban").await;
        Ok(true)
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn insert_poll(&self, poll: Poll) -> ModerationResult<()> {
        self.polls.insert(poll.id.clone(), poll);
        self.flush("insert poll").await;
        Ok(())
    }

    async fn get_poll(&self, id: &str) -> ModerationResult<Option<Poll>> {
        Ok(self.polls.get(id).map(|entry| entry.value().clone()))
    }

    async fn due_polls(&self, now: DateTime<Utc>, limit: usize) -> ModerationResult<Vec<Poll>> {
        let mut due: Vec<Poll> = self
            .polls
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|poll| poll.ends_at);
        Ok(take_limit(due, limit))
    }

    async fn close_poll(&self, id: &str) -> ModerationResult<Option<Poll>> {
        let closed = self.polls.get_mut(id).and_then(|mut entry| {
            if entry.close() {
                Some(entry.value().clone())
            } else {
                None
            }
        });
        if closed.is_some() {
            self.flush("close poll").await;
        }
        Ok(closed)
    }

    async fn cast_vote(
        &self,
        id: &str,
        user_id: u64,
        option_id: String,
        now: DateTime<Utc>,
    ) -> ModerationResult<(VoteOutcome, Option<Poll>)> {
        let result = self.polls.get_mut(id).map(|mut entry| {
            let outcome = entry.cast_vote(user_id, &option_id, now);
            if outcome == VoteOutcome::Expired {
                entry.close();
            }
            (outcome, entry.value().clone())
        });

        match result {
            Some((outcome, poll)) => {
                if matches!(outcome, VoteOutcome::Recorded | VoteOutcome::Expired) {
                    self.flush("cast vote").await;
                }
                Ok((outcome, Some(poll)))
            }
            None => Ok((VoteOutcome::UnknownPoll, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CaseAction, CaseDraft};
    use crate::platform::Actor;
    use chrono::Duration;
    use std::sync::Arc;

    fn case(guild_id: u64, case_number: u64, target_id: u64, action: CaseAction) -> ModerationCase {
        CaseDraft::new(action, Actor::new(target_id, "target"), Actor::new(99, "mod"))
            .into_case(guild_id, case_number, Utc::now())
    }

    fn temp_snapshot_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("warden-test-{}", uuid::Uuid::new_v4()))
            .join("moderation.yaml")
    }

    #[tokio::test]
    async fn test_counters_are_per_guild() {
        let store = MemoryStore::in_memory();
        assert_eq!(store.next_case_number(1).await.unwrap(), 1);
        assert_eq!(store.next_case_number(1).await.unwrap(), 2);
        assert_eq!(store.next_case_number(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let store = MemoryStore::in_memory();
        store.insert_case(case(1, 1, 5, CaseAction::Warn)).await.unwrap();
        let err = store
            .insert_case(case(1, 1, 6, CaseAction::Warn))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ModerationError::AllocationConflict {
                guild_id: 1,
                case_number: 1
            }
        ));
        // The counter moved past the inserted number
        assert_eq!(store.next_case_number(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_cases_newest_first_with_filters() {
        let store = MemoryStore::in_memory();
        store.insert_case(case(1, 1, 5, CaseAction::Warn)).await.unwrap();
        store.insert_case(case(1, 2, 6, CaseAction::Ban)).await.unwrap();
        store.insert_case(case(1, 3, 5, CaseAction::Ban)).await.unwrap();
        store.insert_case(case(2, 1, 5, CaseAction::Ban)).await.unwrap();

        let mut query = CaseQuery::guild(1, 0);
        query.target_id = Some(5);
        let found = store.find_cases(query.clone()).await.unwrap();
        let numbers: Vec<u64> = found.iter().map(|c| c.case_number).collect();
        assert_eq!(numbers, vec![3, 1]);

        query.action = Some(CaseAction::Ban);
        query.limit = 1;
        let found = store.find_cases(query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].case_number, 3);
    }

    #[tokio::test]
    async fn test_reason_and_log_message_updates() {
        let store = MemoryStore::in_memory();
        store.insert_case(case(1, 1, 5, CaseAction::Warn)).await.unwrap();

        let updated = store
            .set_case_reason(1, 1, "edited".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.reason, "edited");
        assert!(store.set_case_reason(1, 9, "x".to_string()).await.unwrap().is_none());

        store.set_case_log_message(1, 1, 777).await.unwrap();
        let stored = store.get_case(1, 1).await.unwrap().unwrap();
        assert_eq!(stored.log_message_id, Some(777));
        assert!(store.set_case_log_message(1, 2, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_claim_temp_ban_once() {
        let store = MemoryStore::in_memory();
        let now = Utc::now();
        let ban = TempBan::new(1, &Actor::new(2, "a"), 3, "spam", now - Duration::minutes(1));
        let id = ban.id.clone();
        store.insert_temp_ban(ban).await.unwrap();
        store
            .insert_temp_ban(TempBan::new(1, &Actor::new(4, "b"), 3, "later", now + Duration::hours(1)))
            .await
            .unwrap();

        let due = store.due_temp_bans(now, 25).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(store.claim_temp_ban(&id).await.unwrap());
        assert!(!store.claim_temp_ban(&id).await.unwrap());
        assert!(store.due_temp_bans(now, 25).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_poll_close_has_one_winner() {
        let store = Arc::new(MemoryStore::in_memory());
        let poll = Poll::new(1, 2, 3, 4, "q", vec!["a".to_string()], Some(Utc::now()));
        let id = poll.id.clone();
        store.insert_poll(poll).await.unwrap();

        let (a, b) = tokio::join!(store.close_poll(&id), store.close_poll(&id));
        let winners = [a.unwrap(), b.unwrap()].iter().filter(|p| p.is_some()).count();
        assert_eq!(winners, 1);
        assert!(store.get_poll(&id).await.unwrap().unwrap().is_closed);
    }

    #[tokio::test]
    async fn test_vote_on_expired_poll_closes_it() {
        let store = MemoryStore::in_memory();
        let now = Utc::now();
        let mut poll = Poll::new(1, 2, 3, 4, "q", vec!["a".to_string()], Some(now + Duration::minutes(5)));
        poll.cast_vote(10, "1", now);
        let id = poll.id.clone();
        store.insert_poll(poll).await.unwrap();

        let later = now + Duration::minutes(10);
        let (outcome, poll) = store.cast_vote(&id, 11, "1".to_string(), later).await.unwrap();
        assert_eq!(outcome, VoteOutcome::Expired);
        let poll = poll.unwrap();
        assert!(poll.is_closed);
        assert_eq!(poll.options[0].votes.len(), 1);

        let (outcome, _) = store.cast_vote(&id, 11, "1".to_string(), later).await.unwrap();
        assert_eq!(outcome, VoteOutcome::Closed);
        let (outcome, poll) = store.cast_vote("missing", 11, "1".to_string(), later).await.unwrap();
        assert_eq!(outcome, VoteOutcome::UnknownPoll);
        assert!(poll.is_none());
    }

    #[tokio::test]
    async fn test_unwritable_snapshot_still_reports_changes() {
        let store = crate::test_support::unwritable_store().await;
        let now = Utc::now();

        store.insert_case(case(1, 1, 5, CaseAction::Warn)).await.unwrap();
        assert!(store.get_case(1, 1).await.unwrap().is_some());

        let ban = TempBan::new(1, &Actor::new(2, "a"), 3, "spam", now);
        let ban_id = ban.id.clone();
        store.insert_temp_ban(ban).await.unwrap();
        assert!(store.claim_temp_ban(&ban_id).await.unwrap());
        assert!(!store.claim_temp_ban(&ban_id).await.unwrap());

        let poll = Poll::new(1, 2, 3, 4, "q", vec!["a".to_string()], Some(now));
        let poll_id = poll.id.clone();
        store.insert_poll(poll).await.unwrap();
        assert!(store.close_poll(&poll_id).await.unwrap().is_some());
        assert!(store.close_poll(&poll_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_seeds_counters() {
        let path = temp_snapshot_path();
        let store = MemoryStore::open(&path).await.unwrap();
        store.insert_case(case(1, 1, 5, CaseAction::Warn)).await.unwrap();
        store.insert_case(case(1, 2, 5, CaseAction::Warn)).await.unwrap();
        store
            .insert_temp_ban(TempBan::new(1, &Actor::new(2, "a"), 3, "spam", Utc::now()))
            .await
            .unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert!(reopened.get_case(1, 2).await.unwrap().is_some());
        assert_eq!(reopened.next_case_number(1).await.unwrap(), 3);
        assert_eq!(reopened.due_temp_bans(Utc::now(), 0).await.unwrap().len(), 1);

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}
