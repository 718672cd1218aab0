//! Report aggregation.
//!
//! Sensor readings, feeding logs and mortality logs are folded into hourly,
//! daily, weekly and monthly buckets keyed by each record's own timestamp.
//! Per owner, a cursor in `runtime_state` remembers the last store sequence
//! folded from each collection. The updated buckets and the advanced cursor
//! are committed in one batch, so a record is folded exactly once even if
//! the runtime stops between ticks.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use aquasense_core::model::{
    AGGREGATION_CURSOR_ID, AggregationCursor, FeedingLog, MortalityLog, PeriodReport, SensorReading,
};
use aquasense_core::paths::{self, Collection};
use aquasense_core::{DocPath, Period};
use aquasense_store::{Document, Query, SecuredStore, Write};

use crate::error::RuntimeError;

/// Records folded during one call to [`Aggregator::aggregate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub readings: u32,
    pub feedings: u32,
    pub mortality: u32,
    /// Bucket documents written.
    pub buckets: u32,
}

impl AggregationSummary {
    pub const fn is_empty(&self) -> bool {
        self.readings == 0 && self.feedings == 0 && self.mortality == 0
    }

    pub(crate) const fn add(&mut self, other: Self) {
        self.readings += other.readings;
        self.feedings += other.feedings;
        self.mortality += other.mortality;
        self.buckets += other.buckets;
    }
}

enum Record {
    Reading(SensorReading),
    Feeding(FeedingLog),
    Mortality(MortalityLog),
}

impl Record {
    const fn at(&self) -> i64 {
        match self {
            Self::Reading(r) => r.recorded_at,
            Self::Feeding(f) => f.fed_at,
            Self::Mortality(m) => m.recorded_at,
        }
    }

    fn fold_into(&self, report: &mut PeriodReport) {
        match self {
            Self::Reading(r) => report.readings.fold(r),
            Self::Feeding(f) => report.feeding.fold(f),
            Self::Mortality(m) => report.mortality.fold(m),
        }
    }
}

pub struct Aggregator {
    store: SecuredStore,
    offset_secs: i32,
    batch_size: u32,
}

impl Aggregator {
    pub const fn new(store: SecuredStore, offset_secs: i32, batch_size: u32) -> Self {
        Self {
            store,
            offset_secs,
            batch_size,
        }
    }

    /// Fold everything recorded for `uid` since the last run.
    pub async fn aggregate(&self, uid: &str, now: i64) -> Result<AggregationSummary, RuntimeError> {
        let mut total = AggregationSummary::default();
        loop {
            let (pass, more) = self.aggregate_batch(uid, now).await?;
            total.add(pass);
            if !more {
                break;
            }
        }
        if !total.is_empty() {
            info!(
                uid,
                readings = total.readings,
                feedings = total.feedings,
                mortality = total.mortality,
                buckets = total.buckets,
                "Reports aggregated"
            );
        }
        Ok(total)
    }

    async fn aggregate_batch(
        &self,
        uid: &str,
        now: i64,
    ) -> Result<(AggregationSummary, bool), RuntimeError> {
        let cursor_path = paths::doc(uid, Collection::RuntimeState, AGGREGATION_CURSOR_ID)?;
        let mut cursor: AggregationCursor =
            self.store.get_as(&cursor_path).await?.unwrap_or_default();

        let readings = self
            .fetch(uid, Collection::SensorReadings, cursor.readings_seq)
            .await?;
        let feedings = self
            .fetch(uid, Collection::FeedingLogs, cursor.feedings_seq)
            .await?;
        let mortality = self
            .fetch(uid, Collection::MortalityLogs, cursor.mortality_seq)
            .await?;

        let limit = self.batch_size as usize;
        let more = readings.len() >= limit || feedings.len() >= limit || mortality.len() >= limit;
        let summary = AggregationSummary {
            readings: count(&readings),
            feedings: count(&feedings),
            mortality: count(&mortality),
            buckets: 0,
        };
        if summary.is_empty() {
            return Ok((summary, false));
        }

        let mut records = Vec::with_capacity(readings.len() + feedings.len() + mortality.len());
        advance(&mut cursor.readings_seq, &readings);
        advance(&mut cursor.feedings_seq, &feedings);
        advance(&mut cursor.mortality_seq, &mortality);
        records.extend(decode_all(&readings).map(Record::Reading));
        records.extend(decode_all(&feedings).map(Record::Feeding));
        records.extend(decode_all(&mortality).map(Record::Mortality));

        let mut reports: HashMap<DocPath, PeriodReport> = HashMap::new();
        for record in &records {
            let periods = match Period::all_containing(record.at(), self.offset_secs) {
                Ok(periods) => periods,
                Err(e) => {
                    warn!(uid, error = %e, "Skipping record with unusable timestamp");
                    continue;
                }
            };
            for period in periods {
                let path = paths::doc(uid, period.kind.collection(), &period.key)?;
                if !reports.contains_key(&path) {
                    let stored: Option<PeriodReport> = self.store.get_as(&path).await?;
                    let report = stored.unwrap_or_else(|| PeriodReport::empty(uid, &period));
                    reports.insert(path.clone(), report);
                }
                if let Some(report) = reports.get_mut(&path) {
                    record.fold_into(report);
                }
            }
        }

        let summary = AggregationSummary {
            buckets: u32::try_from(reports.len()).unwrap_or(u32::MAX),
            ..summary
        };
        cursor.updated_at = now;
        let mut writes = Vec::with_capacity(reports.len() + 1);
        for (path, mut report) in reports {
            report.updated_at = now;
            writes.push(Write::set(path, &report)?);
        }
        writes.push(Write::set(cursor_path, &cursor)?);
        self.store.commit(writes).await?;

        debug!(uid, buckets = summary.buckets, more, "Aggregation batch committed");
        Ok((summary, more))
    }

    async fn fetch(
        &self,
        uid: &str,
        collection: Collection,
        after_seq: i64,
    ) -> Result<Vec<Document>, RuntimeError> {
        let query = Query::new(paths::collection(uid, collection)?)
            .after_seq(after_seq)
            .limit(self.batch_size);
        Ok(self.store.query(&query).await?)
    }
}

fn count(docs: &[Document]) -> u32 {
    u32::try_from(docs.len()).unwrap_or(u32::MAX)
}

fn advance(seq: &mut i64, docs: &[Document]) {
    if let Some(last) = docs.iter().map(|d| d.seq).max() {
        *seq = (*seq).max(last);
    }
}

/// Decode documents, skipping (and logging) malformed ones. The cursor
/// still moves past them.
fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> impl Iterator<Item = T> + '_ {
    docs.iter().filter_map(|doc| match doc.decode() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %doc.path, error = %e, "Skipping malformed record");
            None
        }
    })
}
