//! Cross-context command bridge
//!
//! Lets any thread run a command on the supervisor's runtime and wait for
//! the outcome with a bounded timeout. The link handle itself never leaves
//! the supervisor; only the request and its reply cross threads.

use crate::domain::models::{ActuatorCommand, ActuatorPosition};
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::supervisor::SupervisorShared;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

/// A command waiting to run on the supervisor
#[derive(Debug)]
pub(crate) struct CommandRequest {
    pub command: ActuatorCommand,
    /// Past this instant the caller has given up
    pub deadline: Instant,
    pub reply: std_mpsc::SyncSender<BridgeResult<ActuatorPosition>>,
}

/// Sending side of the bridge. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandBridge {
    commands: mpsc::UnboundedSender<CommandRequest>,
    shared: Arc<SupervisorShared>,
}

impl CommandBridge {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<CommandRequest>,
        shared: Arc<SupervisorShared>,
    ) -> Self {
        Self { commands, shared }
    }

    /// Run `command` on the supervisor and block for at most `timeout`.
    ///
    /// Fails immediately with [`BridgeError::NotConnected`] when the link is
    /// not ready. Must not be called from the supervisor's own runtime.
    pub fn submit(
        &self,
        command: ActuatorCommand,
        timeout: Duration,
    ) -> BridgeResult<ActuatorPosition> {
        if !self.shared.is_ready() {
            warn!("BLE client not connected - cannot run {:?}", command);
            return Err(BridgeError::NotConnected);
        }

        let (reply, response) = std_mpsc::sync_channel(1);
        let request = CommandRequest {
            command,
            deadline: Instant::now() + timeout,
            reply,
        };
        self.commands
            .send(request)
            .map_err(|_| BridgeError::SupervisorGone)?;

        match response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::CommandTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::SupervisorGone),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::SharedStateCache;
    use crate::infrastructure::bluetooth::protocol;
    use crate::infrastructure::bluetooth::simulated::SimulatedTransport;
    use crate::infrastructure::bluetooth::supervisor::{ConnectionSupervisor, SupervisorConfig};
    use std::thread;

    const ADDRESS: &str = "24:0A:C4:00:00:01";

    fn start_connected(sim: &SimulatedTransport, cache: &SharedStateCache) -> ConnectionSupervisor {
        let config = SupervisorConfig {
            device_name: "FungiForge-ESP32".to_string(),
            device_address: Some(ADDRESS.to_string()),
            sensor_char: protocol::parse_uuid(protocol::SENSOR_CHAR_UUID).unwrap(),
            actuator_char: protocol::parse_uuid(protocol::ACTUATOR_CHAR_UUID).unwrap(),
            scan_timeout: Duration::from_millis(10),
            reconnect_interval: Duration::from_millis(20),
            health_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(2),
        };
        let supervisor = ConnectionSupervisor::new(Arc::new(sim.clone()), config, cache.clone());
        supervisor.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !supervisor.is_connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(supervisor.is_connected());
        supervisor
    }

    #[test]
    fn test_submit_fails_fast_when_not_connected() {
        let sim = SimulatedTransport::new();
        let supervisor = ConnectionSupervisor::new(
            Arc::new(sim.clone()),
            SupervisorConfig {
                device_name: "FungiForge-ESP32".to_string(),
                device_address: None,
                sensor_char: protocol::parse_uuid(protocol::SENSOR_CHAR_UUID).unwrap(),
                actuator_char: protocol::parse_uuid(protocol::ACTUATOR_CHAR_UUID).unwrap(),
                scan_timeout: Duration::from_millis(10),
                reconnect_interval: Duration::from_secs(10),
                health_interval: Duration::from_secs(1),
                shutdown_timeout: Duration::from_secs(1),
            },
            SharedStateCache::new(),
        );

        let started = Instant::now();
        let result = supervisor
            .bridge()
            .submit(ActuatorCommand::SetPosition { pan: 90, tilt: 120 }, Duration::from_secs(5));
        assert!(matches!(result, Err(BridgeError::NotConnected)));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_submit_writes_and_updates_cache() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let cache = SharedStateCache::new();
        let supervisor = start_connected(&sim, &cache);

        let position = supervisor
            .bridge()
            .submit(ActuatorCommand::SetPosition { pan: 45, tilt: 150 }, Duration::from_secs(2))
            .unwrap();
        assert_eq!((position.pan, position.tilt), (45, 150));
        assert_eq!(cache.read_actuator(), position);

        let actuator_char = protocol::parse_uuid(protocol::ACTUATOR_CHAR_UUID).unwrap();
        assert_eq!(sim.writes(), vec![(actuator_char, vec![45, 150])]);
        supervisor.stop();
    }

    #[test]
    fn test_submit_times_out_on_slow_ack() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let cache = SharedStateCache::new();
        let supervisor = start_connected(&sim, &cache);
        sim.set_write_delay(Duration::from_millis(500));

        let started = Instant::now();
        let result = supervisor
            .bridge()
            .submit(ActuatorCommand::SetPosition { pan: 10, tilt: 100 }, Duration::from_millis(100));
        assert!(matches!(result, Err(BridgeError::CommandTimeout(_))));
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(cache.read_actuator().last_update, 0);
        supervisor.stop();
    }

    #[test]
    fn test_submit_reports_write_failure() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let cache = SharedStateCache::new();
        let supervisor = start_connected(&sim, &cache);
        sim.set_fail_writes(true);

        let result = supervisor
            .bridge()
            .submit(ActuatorCommand::SetPosition { pan: 10, tilt: 100 }, Duration::from_secs(1));
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert_eq!(cache.read_actuator().last_update, 0);
        supervisor.stop();
    }

    #[test]
    fn test_concurrent_callers() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let cache = SharedStateCache::new();
        let supervisor = start_connected(&sim, &cache);

        let callers: Vec<_> = (0..4u8)
            .map(|i| {
                let bridge = supervisor.bridge();
                thread::spawn(move || {
                    bridge.submit(
                        ActuatorCommand::SetPosition {
                            pan: i * 10,
                            tilt: 100 + i,
                        },
                        Duration::from_secs(2),
                    )
                })
            })
            .collect();

        for caller in callers {
            assert!(caller.join().unwrap().is_ok());
        }
        assert_eq!(sim.writes().len(), 4);
        supervisor.stop();
    }
}
