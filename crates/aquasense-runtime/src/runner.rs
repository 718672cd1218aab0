//! The tick loop.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use aquasense_core::config::RuntimeConfig;
use aquasense_core::db::unix_timestamp;
use aquasense_store::SecuredStore;

use crate::aggregation::{AggregationSummary, Aggregator};
use crate::error::RuntimeError;
use crate::feeder::{Feeder, FeederKind};
use crate::feeding::{FeedSummary, FeedingExecutor, FeedingPolicy};

/// Totals of one tick across all owners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub owners: u32,
    pub feeding: FeedSummary,
    pub aggregation: AggregationSummary,
    /// Owners whose pass failed; retried next tick.
    pub failures: u32,
}

/// Background runtime serving a fixed set of device owners.
pub struct Runtime<F> {
    owners: Vec<String>,
    feeding: FeedingExecutor<F>,
    aggregator: Aggregator,
    tick_interval: Duration,
}

impl Runtime<FeederKind> {
    /// Runtime using the feeder selected in configuration.
    pub fn from_config(store: SecuredStore, config: &RuntimeConfig) -> Self {
        Self::new(store, FeederKind::from(&config.feeder), config)
    }
}

impl<F: Feeder> Runtime<F> {
    pub fn new(store: SecuredStore, feeder: F, config: &RuntimeConfig) -> Self {
        let policy = FeedingPolicy {
            max_attempts: config.max_feed_attempts.max(1),
            stale_after_secs: config.stale_in_progress_secs,
            batch_size: config.batch_size.max(1),
        };
        Self {
            owners: config.owners.clone(),
            feeding: FeedingExecutor::new(store.clone(), feeder, policy),
            aggregator: Aggregator::new(store, config.utc_offset_secs(), policy.batch_size),
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
        }
    }

    pub fn owners(&self) -> &[String] {
        &self.owners
    }

    /// Run feeding and aggregation once for every owner.
    ///
    /// A failing owner is logged and skipped; the others still run. A
    /// failed feeding pass does not hold back that owner's aggregation.
    pub async fn tick(&self, now: i64) -> TickReport {
        let mut report = TickReport::default();
        for uid in &self.owners {
            report.owners += 1;
            let mut failed = false;
            match self.feeding.run_due(uid, now).await {
                Ok(feeding) => report.feeding.add(feeding),
                Err(e) => {
                    log_failure(uid, "feeding", &e);
                    failed = true;
                }
            }
            // Aggregate after feeding so this tick's feeding logs are included.
            match self.aggregator.aggregate(uid, now).await {
                Ok(aggregation) => report.aggregation.add(aggregation),
                Err(e) => {
                    log_failure(uid, "aggregation", &e);
                    failed = true;
                }
            }
            if failed {
                report.failures += 1;
            }
        }
        report
    }

    /// Tick on the configured interval until `shutdown` changes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.owners.is_empty() {
            warn!("No owners configured; ticks will do nothing");
        }
        info!(
            owners = self.owners.len(),
            interval_secs = self.tick_interval.as_secs(),
            "Runtime started"
        );

        let mut timer = tokio::time::interval(self.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let report = self.tick(unix_timestamp()).await;
                    if report.feeding.fed > 0 || report.failures > 0 {
                        info!(
                            fed = report.feeding.fed,
                            retried = report.feeding.retried,
                            abandoned = report.feeding.abandoned,
                            failures = report.failures,
                            "Tick finished"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("Runtime shutting down");
                    return;
                }
            }
        }
    }
}

fn log_failure(uid: &str, pass: &str, e: &RuntimeError) {
    if e.is_transient() {
        warn!(uid, pass, error = %e, "Transient failure, retrying next tick");
    } else {
        error!(uid, pass, error = %e, "Tick failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aquasense_core::RuleEngine;
    use aquasense_core::model::{Schedule, ScheduleStatus};
    use aquasense_core::paths::{self, Collection};
    use aquasense_store::{Database, encode};

    use super::*;
    use crate::feeder::LoggingFeeder;

    fn config(owners: &[&str]) -> RuntimeConfig {
        RuntimeConfig {
            owners: owners.iter().map(ToString::to_string).collect(),
            ..RuntimeConfig::default()
        }
    }

    async fn schedule_due(db: &Database, uid: &str, at: i64) -> aquasense_core::DocPath {
        let path = paths::doc(uid, Collection::Schedules, "s1").unwrap();
        db.create(&path, encode(&Schedule::new(uid, "s1", at, 10.0, "")).unwrap())
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn tick_serves_only_configured_owners() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SecuredStore::runtime(db.clone(), Arc::new(RuleEngine::new()));
        let served = schedule_due(&db, "pond-a", 100).await;
        let ignored = schedule_due(&db, "pond-b", 100).await;

        let runtime = Runtime::new(store, LoggingFeeder, &config(&["pond-a"]));
        let report = runtime.tick(200).await;
        assert_eq!(report.owners, 1);
        assert_eq!(report.feeding.fed, 1);
        assert_eq!(report.aggregation.feedings, 1);

        let done: Schedule = db.get(&served).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(done.status, ScheduleStatus::Completed);
        let untouched: Schedule = db.get(&ignored).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(untouched.status, ScheduleStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_owner_is_reported_not_fatal() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SecuredStore::runtime(db.clone(), Arc::new(RuleEngine::new()));
        schedule_due(&db, "pond-a", 100).await;

        let runtime = Runtime::new(store, LoggingFeeder, &config(&["bad/uid", "pond-a"]));
        let report = runtime.tick(200).await;
        assert_eq!(report.failures, 1);
        assert_eq!(report.feeding.fed, 1);
    }

    #[tokio::test]
    async fn malformed_schedule_leaves_feeding_and_reports_running() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SecuredStore::runtime(db.clone(), Arc::new(RuleEngine::new()));
        let broken = paths::doc("pond-a", Collection::Schedules, "broken").unwrap();
        db.set(&broken, serde_json::json!({"status": "pending", "scheduled_at": 0}))
            .await
            .unwrap();
        schedule_due(&db, "pond-a", 100).await;
        let sample = crate::ingest::Sample {
            temperature: Some(27.5),
            ..crate::ingest::Sample::default()
        };
        crate::ingest::ingest_reading(&store, "pond-a", sample, 150)
            .await
            .unwrap();

        let runtime = Runtime::new(store, LoggingFeeder, &config(&["pond-a"]));
        let mut total = TickReport::default();
        for tick in 0..3 {
            let report = runtime.tick(200 + tick * 60).await;
            assert_eq!(report.failures, 0);
            total.feeding.add(report.feeding);
            total.aggregation.add(report.aggregation);
        }
        assert_eq!(total.feeding.fed, 1);
        assert_eq!(total.aggregation.readings, 1);
        assert_eq!(total.aggregation.feedings, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SecuredStore::runtime(db.clone(), Arc::new(RuleEngine::new()));
        let path = schedule_due(&db, "pond-a", 100).await;

        let runtime = Runtime::new(store, LoggingFeeder, &config(&["pond-a"]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { runtime.run(shutdown_rx).await });

        // The first tick fires immediately.
        let mut done = false;
        for _ in 0..50 {
            let schedule: Schedule = db.get(&path).await.unwrap().unwrap().decode().unwrap();
            if schedule.status == ScheduleStatus::Completed {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(done);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
