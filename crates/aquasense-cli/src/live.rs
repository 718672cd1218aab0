//! Live view of the most recent sensor readings.
//!
//! Snapshots come from a store listener when one is available and from a
//! periodic refresh otherwise. The refresh also picks up readings written
//! by other processes, which the in-process change feed never sees.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use aquasense_core::model::SensorReading;
use aquasense_store::{Document, Listener, StoreError};

use crate::dashboard::{DashboardError, UserDashboard};

enum Event {
    /// Carries whether the sender is gone.
    Shutdown(bool),
    Refresh,
    Changed(Result<Vec<Document>, StoreError>),
}

/// Pushes a fresh snapshot whenever the watched collection changes.
trait ChangeFeed {
    async fn next_snapshot(&mut self) -> Result<Vec<Document>, StoreError>;
}

impl ChangeFeed for Listener {
    async fn next_snapshot(&mut self) -> Result<Vec<Document>, StoreError> {
        self.next().await
    }
}

async fn next_change<C: ChangeFeed>(feed: &mut Option<C>) -> Result<Vec<Document>, StoreError> {
    match feed {
        Some(feed) => feed.next_snapshot().await,
        None => std::future::pending().await,
    }
}

fn decode(docs: &[Document]) -> Result<Vec<SensorReading>, DashboardError> {
    docs.iter()
        .map(|doc| doc.decode().map_err(DashboardError::from))
        .collect()
}

pub struct LiveReadings {
    dashboard: UserDashboard,
    limit: u32,
    refresh: Duration,
}

impl LiveReadings {
    pub const fn new(dashboard: UserDashboard, limit: u32, refresh: Duration) -> Self {
        Self {
            dashboard,
            limit,
            refresh,
        }
    }

    /// Deliver snapshots to `on_snapshot` until `shutdown` flips to true.
    ///
    /// Transient failures of the listener or of a refresh are logged and the
    /// view carries on with periodic refreshes; anything else ends it.
    pub async fn run<F>(
        &self,
        shutdown: watch::Receiver<bool>,
        mut on_snapshot: F,
    ) -> Result<(), DashboardError>
    where
        F: FnMut(&[SensorReading]) -> Result<(), DashboardError>,
    {
        let query = self.dashboard.latest_readings_query(Some(self.limit))?;
        let (initial, listener) = self.dashboard.store().listen(query).await?;
        on_snapshot(&decode(&initial)?)?;
        self.follow(Some(listener), shutdown, on_snapshot).await
    }

    async fn follow<C, F>(
        &self,
        mut feed: Option<C>,
        mut shutdown: watch::Receiver<bool>,
        mut on_snapshot: F,
    ) -> Result<(), DashboardError>
    where
        C: ChangeFeed,
        F: FnMut(&[SensorReading]) -> Result<(), DashboardError>,
    {
        let mut ticker = interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the initial snapshot is
        // already out.
        ticker.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                changed = shutdown.changed() => Event::Shutdown(changed.is_err()),
                _ = ticker.tick() => Event::Refresh,
                result = next_change(&mut feed) => Event::Changed(result),
            };
            match event {
                Event::Shutdown(closed) => {
                    if closed || *shutdown.borrow() {
                        break;
                    }
                }
                Event::Refresh => {
                    debug!(uid = self.dashboard.uid(), "Periodic refresh");
                    match self.dashboard.latest_readings(Some(self.limit)).await {
                        Ok(readings) => on_snapshot(&readings)?,
                        Err(e) if e.is_transient() => {
                            warn!(error = %e, "Refresh failed, retrying on the next tick");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Event::Changed(Ok(docs)) => on_snapshot(&decode(&docs)?)?,
                Event::Changed(Err(e)) if e.is_transient() => {
                    warn!(error = %e, "Listener stopped, falling back to periodic refresh");
                    feed = None;
                }
                Event::Changed(Err(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
