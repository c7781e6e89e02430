//! Periodic sensor logger
//!
//! Persists the cached reading at a fixed interval on its own thread.

use crate::facade::SensorBridge;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SensorLogger {
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SensorLogger {
    /// Start logging every `interval`. Readings that were never updated
    /// are skipped.
    pub fn spawn(bridge: Arc<SensorBridge>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("fungiforge-logger".to_string())
            .spawn(move || {
                info!("Sensor logger running every {:?}", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let reading = bridge.read_sensors();
                    if !reading.has_data() {
                        debug!("No sensor data yet, skipping log");
                        continue;
                    }
                    if !bridge.persist_reading(Some(reading)) {
                        warn!("Sensor logger could not store reading");
                    }
                }
                info!("Sensor logger stopped");
            })?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Signal the thread and wait a bounded time for it to exit.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        let Some(thread) = self.thread.take() else {
            return;
        };

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if thread.is_finished() {
            let _ = thread.join();
        } else {
            warn!("Sensor logger did not stop within {:?}; detaching", STOP_TIMEOUT);
        }
    }
}

impl Drop for SensorLogger {
    fn drop(&mut self) {
        self.stop();
    }
}
