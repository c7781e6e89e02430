//! Public synchronous façade
//!
//! The only surface route handlers and other collaborators use. Every
//! operation returns plain data and never fails outright: callers see stale
//! cached values or a rejected [`MoveOutcome`] instead of an error.

use crate::domain::cache::SharedStateCache;
use crate::domain::models::{
    now_millis, ActuatorCommand, ActuatorPosition, BridgeStatus, MoveOutcome, MoveStatus,
    SensorReading,
};
use crate::domain::settings::Settings;
use crate::domain::storage::{ReadingStore, StoredReading};
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::bridge::CommandBridge;
use crate::infrastructure::bluetooth::supervisor::{ConnectionSupervisor, SupervisorConfig};
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct SensorBridge {
    cache: SharedStateCache,
    supervisor: ConnectionSupervisor,
    bridge: CommandBridge,
    store: Arc<dyn ReadingStore>,
    command_timeout: Duration,
}

impl SensorBridge {
    /// Build a bridge from user settings. Fails only on invalid UUIDs.
    pub fn new(
        transport: Arc<dyn BleTransport>,
        store: Arc<dyn ReadingStore>,
        settings: &Settings,
    ) -> anyhow::Result<Self> {
        let config = SupervisorConfig::from_settings(settings)?;
        Ok(Self::with_config(
            transport,
            store,
            config,
            settings.command_timeout(),
        ))
    }

    pub fn with_config(
        transport: Arc<dyn BleTransport>,
        store: Arc<dyn ReadingStore>,
        config: SupervisorConfig,
        command_timeout: Duration,
    ) -> Self {
        let cache = SharedStateCache::new();
        let supervisor = ConnectionSupervisor::new(transport, config, cache.clone());
        let bridge = supervisor.bridge();
        Self {
            cache,
            supervisor,
            bridge,
            store,
            command_timeout,
        }
    }

    /// Start the background connection. Idempotent while running.
    pub fn start(&self) -> BridgeResult<()> {
        self.supervisor.start()
    }

    /// Stop the background connection with a bounded wait.
    pub fn stop(&self) {
        self.supervisor.stop();
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            state: self.supervisor.state(),
            ready: self.supervisor.is_connected(),
        }
    }

    pub fn read_sensors(&self) -> SensorReading {
        self.cache.read_sensor()
    }

    pub fn read_actuator(&self) -> ActuatorPosition {
        self.cache.read_actuator()
    }

    /// Clamp and send a servo move, waiting up to the command timeout.
    pub fn move_actuator(&self, pan: i64, tilt: i64) -> MoveOutcome {
        let commanded = ActuatorPosition::clamped(pan, tilt);
        let command = ActuatorCommand::SetPosition {
            pan: commanded.pan,
            tilt: commanded.tilt,
        };

        match self.bridge.submit(command, self.command_timeout) {
            Ok(position) => MoveOutcome::applied(position),
            Err(e) => {
                let status = match e {
                    BridgeError::NotConnected => MoveStatus::NotConnected,
                    BridgeError::CommandTimeout(_) => MoveStatus::TimedOut,
                    _ => MoveStatus::Failed,
                };
                warn!("Pan/tilt move to {},{} not applied: {}", commanded.pan, commanded.tilt, e);
                MoveOutcome::rejected(status, commanded)
            }
        }
    }

    /// Persist `reading`, or the current cached reading when `None`.
    ///
    /// Returns `false` if the store failed; the store is rolled back first.
    pub fn persist_reading(&self, reading: Option<SensorReading>) -> bool {
        let reading = reading.unwrap_or_else(|| self.read_sensors());
        let row = StoredReading::new(&reading, now_millis());

        match self.store.save_reading(&row) {
            Ok(()) => {
                debug!("Persisted reading {:?}", row);
                true
            }
            Err(e) => {
                let failure = BridgeError::PersistenceFailure(e.to_string());
                error!("[DB ERROR] {}", failure);
                if let Err(e) = self.store.rollback() {
                    warn!("Rollback after failed save also failed: {}", e);
                }
                false
            }
        }
    }
}
