//! Feeding schedule execution.
//!
//! Due schedules are claimed one at a time with a per-document transaction
//! (`pending -> in-progress`), fed, and then completed in a single batch
//! together with their feeding log.

use tracing::{info, warn};

use aquasense_core::DocPath;
use aquasense_core::model::{FeedingLog, Schedule, ScheduleStatus};
use aquasense_core::paths::{self, Collection};
use aquasense_store::{Direction, FilterOp, Query, SecuredStore, StoreError, TxOutcome, Write, encode};

use crate::error::RuntimeError;
use crate::feeder::{FeedRequest, Feeder};

/// Recorded on schedules the runtime abandoned mid-feed.
pub const INTERRUPTED: &str = "interrupted";

/// Outcome of one pass over an owner's schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub fed: u32,
    /// Failed and returned to pending for another attempt.
    pub retried: u32,
    /// Failed for the last time and completed with the error.
    pub abandoned: u32,
    /// Stale in-progress schedules closed as interrupted.
    pub recovered: u32,
    /// Already claimed, no longer due, malformed, or filed under another
    /// owner when we got to them.
    pub skipped: u32,
}

impl FeedSummary {
    pub(crate) const fn add(&mut self, other: Self) {
        self.fed += other.fed;
        self.retried += other.retried;
        self.abandoned += other.abandoned;
        self.recovered += other.recovered;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedingPolicy {
    pub max_attempts: u32,
    pub stale_after_secs: i64,
    pub batch_size: u32,
}

impl Default for FeedingPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stale_after_secs: 15 * 60,
            batch_size: 200,
        }
    }
}

/// Executes due feeding schedules.
pub struct FeedingExecutor<F> {
    store: SecuredStore,
    feeder: F,
    policy: FeedingPolicy,
}

impl<F: Feeder> FeedingExecutor<F> {
    pub const fn new(store: SecuredStore, feeder: F, policy: FeedingPolicy) -> Self {
        Self {
            store,
            feeder,
            policy,
        }
    }

    /// Recover stale claims, then feed every schedule of `uid` due at `now`.
    pub async fn run_due(&self, uid: &str, now: i64) -> Result<FeedSummary, RuntimeError> {
        let mut summary = FeedSummary {
            recovered: self.recover_stale(uid, now).await?,
            ..FeedSummary::default()
        };

        let due = Query::new(paths::collection(uid, Collection::Schedules)?)
            .eq("status", ScheduleStatus::Pending.as_str())
            .filter("scheduled_at", FilterOp::Le, now)
            .order_by("scheduled_at", Direction::Asc)
            .limit(self.policy.batch_size);

        for doc in self.store.query(&due).await? {
            let Some(schedule) = self.claim(uid, &doc.path, now).await? else {
                summary.skipped += 1;
                continue;
            };
            match self.execute(uid, &doc.path, schedule, now).await? {
                Executed::Fed => summary.fed += 1,
                Executed::Retry => summary.retried += 1,
                Executed::Abandoned => summary.abandoned += 1,
            }
        }

        Ok(summary)
    }

    /// Move a due schedule of `uid` to in-progress. `None` if it is no
    /// longer due, cannot be decoded, or names a different owner.
    async fn claim(&self, uid: &str, path: &DocPath, now: i64) -> Result<Option<Schedule>, RuntimeError> {
        let claimed = self
            .store
            .transact(path, |doc| {
                let Some(doc) = doc else {
                    return Ok(TxOutcome::Keep(None));
                };
                let mut schedule: Schedule = match doc.decode() {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        warn!(path = %doc.path, error = %e, "Skipping malformed schedule");
                        return Ok(TxOutcome::Keep(None));
                    }
                };
                if schedule.uid != uid {
                    warn!(
                        path = %doc.path,
                        owner = uid,
                        claimed_uid = %schedule.uid,
                        "Skipping schedule filed under another owner"
                    );
                    return Ok(TxOutcome::Keep(None));
                }
                if !schedule.is_due(now) {
                    return Ok(TxOutcome::Keep(None));
                }
                schedule
                    .transition(ScheduleStatus::InProgress)
                    .map_err(|e| StoreError::Aborted(e.to_string()))?;
                schedule.attempts += 1;
                schedule.started_at = Some(now);
                Ok(TxOutcome::Set(encode(&schedule)?, Some(schedule)))
            })
            .await?;
        Ok(claimed)
    }

    async fn execute(
        &self,
        uid: &str,
        path: &DocPath,
        mut schedule: Schedule,
        now: i64,
    ) -> Result<Executed, RuntimeError> {
        let request = FeedRequest {
            uid,
            schedule_id: &schedule.id,
            amount: schedule.feed_amount,
        };

        match self.feeder.feed(&request).await {
            Ok(()) => {
                self.complete(uid, path, schedule, now).await?;
                Ok(Executed::Fed)
            }
            Err(e) => {
                let exhausted = schedule.attempts >= self.policy.max_attempts;
                warn!(
                    uid,
                    schedule_id = %schedule.id,
                    attempt = schedule.attempts,
                    exhausted,
                    error = %e,
                    "Feeding failed"
                );
                let next = if exhausted {
                    schedule.completed_at = Some(now);
                    ScheduleStatus::Completed
                } else {
                    ScheduleStatus::Pending
                };
                schedule.transition(next)?;
                schedule.last_error = Some(e.to_string());
                self.store
                    .commit(vec![Write::set(path.clone(), &schedule)?])
                    .await?;
                Ok(if exhausted {
                    Executed::Abandoned
                } else {
                    Executed::Retry
                })
            }
        }
    }

    /// Write the feeding log, the completed schedule and, for repeating
    /// schedules, the next occurrence in one batch.
    async fn complete(
        &self,
        uid: &str,
        path: &DocPath,
        mut schedule: Schedule,
        now: i64,
    ) -> Result<(), RuntimeError> {
        let log_path = paths::collection(uid, Collection::FeedingLogs)?.new_doc();
        let log = FeedingLog {
            id: log_path.id().to_string(),
            uid: uid.to_string(),
            schedule_id: Some(schedule.id.clone()),
            fed_at: now,
            feed_amount: schedule.feed_amount,
            notes: schedule.notes.clone(),
        };

        schedule.transition(ScheduleStatus::Completed)?;
        schedule.completed_at = Some(now);
        schedule.last_error = None;

        let mut writes = vec![Write::create(log_path, &log)?, Write::set(path.clone(), &schedule)?];
        let next_path = path.parent().new_doc();
        if let Some(next) = schedule.next_occurrence(next_path.id(), now) {
            info!(
                uid,
                schedule_id = %next.id,
                scheduled_at = next.scheduled_at,
                "Scheduled next occurrence"
            );
            writes.push(Write::create(next_path, &next)?);
        }
        self.store.commit(writes).await?;

        info!(
            uid,
            schedule_id = %schedule.id,
            amount = schedule.feed_amount,
            "Feeding completed"
        );
        Ok(())
    }

    /// Close in-progress schedules whose claim is older than the stale
    /// threshold. They are completed as interrupted, never fed again.
    async fn recover_stale(&self, uid: &str, now: i64) -> Result<u32, RuntimeError> {
        let cutoff = now - self.policy.stale_after_secs;
        let stale = Query::new(paths::collection(uid, Collection::Schedules)?)
            .eq("status", ScheduleStatus::InProgress.as_str())
            .filter("started_at", FilterOp::Le, cutoff)
            .limit(self.policy.batch_size);

        let mut recovered = 0;
        for doc in self.store.query(&stale).await? {
            let closed = self
                .store
                .transact(&doc.path, |current| {
                    let Some(current) = current else {
                        return Ok(TxOutcome::Keep(false));
                    };
                    let mut schedule: Schedule = match current.decode() {
                        Ok(schedule) => schedule,
                        Err(e) => {
                            warn!(path = %current.path, error = %e, "Skipping malformed schedule");
                            return Ok(TxOutcome::Keep(false));
                        }
                    };
                    let still_stale = schedule.status == ScheduleStatus::InProgress
                        && schedule.started_at.is_some_and(|at| at <= cutoff);
                    if !still_stale {
                        return Ok(TxOutcome::Keep(false));
                    }
                    schedule
                        .transition(ScheduleStatus::Completed)
                        .map_err(|e| StoreError::Aborted(e.to_string()))?;
                    schedule.completed_at = Some(now);
                    schedule.last_error = Some(INTERRUPTED.to_string());
                    Ok(TxOutcome::Set(encode(&schedule)?, true))
                })
                .await?;
            if closed {
                warn!(uid, schedule_id = %doc.id(), "Closed interrupted feeding");
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

enum Executed {
    Fed,
    Retry,
    Abandoned,
}
