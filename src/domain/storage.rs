//! Persistence contract for sensor readings.

use crate::domain::models::SensorReading;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Row written by a [`ReadingStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub air_temperature: f64,
    pub humidity: f64,
    pub substrate_temperature: f64,
    pub substrate_moisture: u16,
    /// Unix milliseconds when the row was written
    pub recorded_at: i64,
}

impl StoredReading {
    pub fn new(reading: &SensorReading, recorded_at: i64) -> Self {
        Self {
            air_temperature: reading.air_temperature,
            humidity: reading.humidity,
            substrate_temperature: reading.substrate_temperature,
            substrate_moisture: reading.substrate_moisture,
            recorded_at,
        }
    }
}

/// Storage collaborator.
///
/// `save_reading` may leave a partial write behind when it fails; callers
/// follow a failed save with `rollback`.
pub trait ReadingStore: Send + Sync {
    fn save_reading(&self, reading: &StoredReading) -> Result<(), StorageError>;

    fn rollback(&self) -> Result<(), StorageError>;
}
