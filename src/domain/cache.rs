//! Shared state cache
//!
//! Holds the most recent sensor reading and actuator position. Written by
//! the connection supervisor, read by any caller thread through copies.

use crate::domain::models::{now_millis, ActuatorPosition, SensorReading};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct CacheState {
    sensor: SensorReading,
    actuator: ActuatorPosition,
}

/// Thread-safe latest-value cache. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct SharedStateCache {
    inner: Arc<Mutex<CacheState>>,
}

impl SharedStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current sensor reading
    pub fn read_sensor(&self) -> SensorReading {
        self.lock().sensor
    }

    /// Copy of the current actuator position
    pub fn read_actuator(&self) -> ActuatorPosition {
        self.lock().actuator
    }

    /// Store a freshly decoded reading and return the stored copy.
    pub(crate) fn update_sensor(&self, reading: SensorReading) -> SensorReading {
        let now = now_millis();
        let mut state = self.lock();
        let last_update = now.max(state.sensor.last_update);
        state.sensor = SensorReading {
            last_update,
            ..reading
        };
        state.sensor
    }

    /// Store an actuator position (already clamped) and return the stored copy.
    pub(crate) fn update_actuator(&self, pan: u8, tilt: u8) -> ActuatorPosition {
        let now = now_millis();
        let mut state = self.lock();
        let last_update = now.max(state.actuator.last_update);
        state.actuator = ActuatorPosition {
            pan,
            tilt,
            last_update,
        };
        state.actuator
    }

    // Writes are single assignments, so a poisoned lock is still consistent
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_defaults_are_zeroed() {
        let cache = SharedStateCache::new();
        assert_eq!(cache.read_sensor(), SensorReading::default());
        assert_eq!(cache.read_actuator(), ActuatorPosition::default());
        assert!(!cache.read_sensor().has_data());
    }

    #[test]
    fn test_update_stamps_time() {
        let cache = SharedStateCache::new();
        let stored = cache.update_sensor(SensorReading {
            air_temperature: 21.5,
            humidity: 80.0,
            substrate_temperature: 19.25,
            substrate_moisture: 512,
            last_update: 0,
        });
        assert!(stored.last_update > 0);
        assert_eq!(cache.read_sensor(), stored);

        let pos = cache.update_actuator(90, 120);
        assert_eq!((pos.pan, pos.tilt), (90, 120));
        assert!(pos.last_update > 0);
    }

    #[test]
    fn test_last_update_never_goes_backwards() {
        let cache = SharedStateCache::new();
        let mut previous = 0;
        for i in 0..100 {
            let stored = cache.update_actuator(i, 100);
            assert!(stored.last_update >= previous);
            previous = stored.last_update;
        }
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_records() {
        let cache = SharedStateCache::new();
        let writer_cache = cache.clone();

        // Every written record has all four values derived from the same n
        let writer = thread::spawn(move || {
            for n in 1..=2000u16 {
                let v = n as f64;
                writer_cache.update_sensor(SensorReading {
                    air_temperature: v,
                    humidity: v,
                    substrate_temperature: v,
                    substrate_moisture: n,
                    last_update: 0,
                });
            }
        });

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let r = cache.read_sensor();
                        let v = r.substrate_moisture as f64;
                        assert_eq!(r.air_temperature, v);
                        assert_eq!(r.humidity, v);
                        assert_eq!(r.substrate_temperature, v);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
