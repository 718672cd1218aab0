//! Sensor ingestion.

use tracing::info;

use aquasense_core::DocPath;
use aquasense_core::model::SensorReading;
use aquasense_core::paths::{self, Collection};
use aquasense_store::SecuredStore;

use crate::error::RuntimeError;

/// Measured values of one sample. Missing metrics stay unset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    pub temperature: Option<f64>,
    pub ph: Option<f64>,
    pub dissolved_oxygen: Option<f64>,
    pub ammonia: Option<f64>,
}

impl Sample {
    pub const fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.ph.is_none()
            && self.dissolved_oxygen.is_none()
            && self.ammonia.is_none()
    }
}

/// Store a sensor reading for `uid`, recorded at `recorded_at`.
pub async fn ingest_reading(
    store: &SecuredStore,
    uid: &str,
    sample: Sample,
    recorded_at: i64,
) -> Result<DocPath, RuntimeError> {
    let path = paths::collection(uid, Collection::SensorReadings)?.new_doc();
    let reading = SensorReading {
        id: path.id().to_string(),
        uid: uid.to_string(),
        recorded_at,
        temperature: sample.temperature,
        ph: sample.ph,
        dissolved_oxygen: sample.dissolved_oxygen,
        ammonia: sample.ammonia,
    };
    store.create(&path, &reading).await?;
    info!(uid, reading_id = %path.id(), recorded_at, "Sensor reading stored");
    Ok(path)
}
