//! Connection supervisor
//!
//! Owns the BLE link for the lifetime of the process. Runs on its own
//! thread with a single-threaded tokio runtime; every transport call and
//! every notification is handled there.
//!
//! ```text
//!   Idle ──start()──▶ Discovering ──▶ Connecting ──▶ Subscribing ──▶ Connected
//!                         │   ▲            │                            │
//!                         │   │            │                     probe failed
//!                         ▼   │            ▼                            ▼
//!                        Backoff ◀──────────────────────────── Disconnecting
//! ```
//!
//! `Backoff` is the only recovery state. The loop retries until `stop()`.

use crate::domain::cache::SharedStateCache;
use crate::domain::models::{ActuatorCommand, ActuatorPosition, SupervisorState};
use crate::domain::settings::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::bridge::{CommandBridge, CommandRequest};
use crate::infrastructure::bluetooth::connection::{BleConnection, ConnectionConfig};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use crate::infrastructure::bluetooth::transport::{
    BleTransport, LinkHandle, Notification, NotificationSink,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound for the best-effort disconnect during teardown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Supervisor tuning, usually built from [`Settings`]
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub device_name: String,
    pub device_address: Option<String>,
    pub sensor_char: Uuid,
    pub actuator_char: Uuid,
    pub scan_timeout: Duration,
    pub reconnect_interval: Duration,
    pub health_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            device_name: settings.device_name.clone(),
            device_address: settings
                .device_address
                .clone()
                .filter(|a| !a.trim().is_empty()),
            sensor_char: protocol::parse_uuid(&settings.sensor_char_uuid)?,
            actuator_char: protocol::parse_uuid(&settings.actuator_char_uuid)?,
            scan_timeout: settings.scan_timeout(),
            reconnect_interval: settings.reconnect_interval(),
            health_interval: settings.health_interval(),
            shutdown_timeout: settings.shutdown_timeout(),
        })
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            sensor_char: self.sensor_char,
            actuator_char: self.actuator_char,
        }
    }
}

/// State visible from both sides of the thread boundary
#[derive(Debug)]
pub(crate) struct SupervisorShared {
    state: AtomicU8,
    ready: AtomicBool,
    stop: AtomicBool,
}

impl SupervisorShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SupervisorState::Idle.as_u8()),
            ready: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Connection-ready signal
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

enum Worker {
    Pending(Box<SupervisorTask>),
    Running(JoinHandle<()>),
    Finished,
}

/// Handle to the background connection supervisor.
///
/// Dropping the handle stops the supervisor.
pub struct ConnectionSupervisor {
    shared: Arc<SupervisorShared>,
    commands: mpsc::UnboundedSender<CommandRequest>,
    stop_tx: watch::Sender<bool>,
    worker: Mutex<Worker>,
    shutdown_timeout: Duration,
}

impl ConnectionSupervisor {
    /// Create a supervisor in the `Idle` state. Nothing runs until `start()`.
    pub fn new(
        transport: Arc<dyn BleTransport>,
        config: SupervisorConfig,
        cache: SharedStateCache,
    ) -> Self {
        let shared = Arc::new(SupervisorShared::new());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let shutdown_timeout = config.shutdown_timeout;

        let task = SupervisorTask {
            transport,
            config,
            cache,
            shared: shared.clone(),
            commands: commands_rx,
            stop_rx,
            notify_tx,
            notify_rx,
            handle: None,
            address: None,
        };

        Self {
            shared,
            commands: commands_tx,
            stop_tx,
            worker: Mutex::new(Worker::Pending(Box::new(task))),
            shutdown_timeout,
        }
    }

    /// Spawn the background thread. Calling it again while running is a no-op.
    pub fn start(&self) -> BridgeResult<()> {
        let mut worker = self.lock_worker();
        match std::mem::replace(&mut *worker, Worker::Finished) {
            Worker::Pending(task) => {
                let spawned = thread::Builder::new()
                    .name("fungiforge-ble".to_string())
                    .spawn(move || task.run_thread());
                match spawned {
                    Ok(handle) => {
                        info!("BLE supervisor thread started");
                        *worker = Worker::Running(handle);
                        Ok(())
                    }
                    Err(e) => {
                        error!("Failed to spawn BLE supervisor thread: {}", e);
                        self.shared.set_state(SupervisorState::Stopped);
                        Err(BridgeError::SupervisorGone)
                    }
                }
            }
            running @ Worker::Running(_) => {
                *worker = running;
                Ok(())
            }
            Worker::Finished => Err(BridgeError::SupervisorGone),
        }
    }

    /// Stop the supervisor and wait up to the shutdown timeout for the
    /// thread to exit. The thread is detached if it does not finish in time.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.set_ready(false);
        let _ = self.stop_tx.send(true);

        let previous = std::mem::replace(&mut *self.lock_worker(), Worker::Finished);
        match previous {
            Worker::Running(handle) => {
                let deadline = Instant::now() + self.shutdown_timeout;
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                if handle.is_finished() {
                    let _ = handle.join();
                    info!("BLE supervisor stopped");
                } else {
                    warn!(
                        "BLE supervisor did not stop within {:?}; detaching",
                        self.shutdown_timeout
                    );
                }
            }
            Worker::Pending(_) | Worker::Finished => {}
        }
        self.shared.set_state(SupervisorState::Stopped);
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_ready()
    }

    /// Bridge for posting commands to this supervisor from other threads
    pub fn bridge(&self) -> CommandBridge {
        CommandBridge::new(self.commands.clone(), self.shared.clone())
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Worker> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if matches!(*self.lock_worker(), Worker::Running(_)) {
            self.stop();
        }
    }
}

/// How the connected phase ended
enum LinkEnd {
    Stopped,
    Lost(String),
}

/// The part of the supervisor that lives on the background thread
struct SupervisorTask {
    transport: Arc<dyn BleTransport>,
    config: SupervisorConfig,
    cache: SharedStateCache,
    shared: Arc<SupervisorShared>,
    commands: mpsc::UnboundedReceiver<CommandRequest>,
    stop_rx: watch::Receiver<bool>,
    notify_tx: NotificationSink,
    notify_rx: mpsc::UnboundedReceiver<Notification>,
    handle: Option<LinkHandle>,
    address: Option<String>,
}

impl SupervisorTask {
    fn run_thread(self) {
        let shared = self.shared.clone();
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create tokio runtime for Bluetooth: {}", e);
                shared.set_state(SupervisorState::Stopped);
                return;
            }
        };

        rt.block_on(self.run());
        shared.set_state(SupervisorState::Stopped);
        info!("BLE supervisor loop closed");
    }

    async fn run(mut self) {
        let mut state = SupervisorState::Discovering;

        while !self.shared.stop_requested() {
            self.shared.set_state(state);
            let next = match state {
                SupervisorState::Discovering => self.discover().await,
                SupervisorState::Connecting => self.connect().await,
                SupervisorState::Subscribing => self.subscribe().await,
                SupervisorState::Connected => match self.monitor().await {
                    LinkEnd::Stopped => None,
                    LinkEnd::Lost(reason) => {
                        warn!("BLE client disconnected / error: {}", reason);
                        Some(SupervisorState::Disconnecting)
                    }
                },
                SupervisorState::Disconnecting => {
                    self.teardown().await;
                    Some(SupervisorState::Backoff)
                }
                SupervisorState::Backoff => {
                    let delay = self.config.reconnect_interval;
                    debug!("Retrying in {:?}", delay);
                    self.until_stopped(tokio::time::sleep(delay))
                        .await
                        .map(|_| SupervisorState::Discovering)
                }
                SupervisorState::Idle | SupervisorState::Stopped => {
                    Some(SupervisorState::Discovering)
                }
            };

            match next {
                Some(next) => state = next,
                None => break,
            }
        }

        self.shared.set_state(SupervisorState::Disconnecting);
        self.teardown().await;
    }

    async fn discover(&mut self) -> Option<SupervisorState> {
        if let Some(address) = self.config.device_address.clone() {
            self.address = Some(address);
            return Some(SupervisorState::Connecting);
        }

        let scanner = BleScanner::new(self.transport.clone(), self.config.scan_timeout);
        let name = self.config.device_name.clone();
        match self.until_stopped(scanner.find_by_name(&name)).await? {
            Ok(address) => {
                self.address = Some(address);
                Some(SupervisorState::Connecting)
            }
            Err(e) => {
                warn!("Discovery failed: {}", e);
                Some(SupervisorState::Backoff)
            }
        }
    }

    async fn connect(&mut self) -> Option<SupervisorState> {
        let Some(address) = self.address.clone() else {
            return Some(SupervisorState::Discovering);
        };

        let connection = BleConnection::new(self.transport.clone(), self.config.connection_config());
        match self.until_stopped(connection.connect(&address)).await? {
            Ok(handle) => {
                self.handle = Some(handle);
                Some(SupervisorState::Subscribing)
            }
            Err(e) => {
                warn!("{}", e);
                Some(SupervisorState::Backoff)
            }
        }
    }

    async fn subscribe(&mut self) -> Option<SupervisorState> {
        let Some(handle) = self.handle else {
            return Some(SupervisorState::Backoff);
        };

        let connection = BleConnection::new(self.transport.clone(), self.config.connection_config());
        let sink = self.notify_tx.clone();
        self.until_stopped(connection.subscribe_all(handle, &sink))
            .await?;

        self.shared.set_ready(true);
        info!("BLE link ready");
        Some(SupervisorState::Connected)
    }

    /// Serve commands and notifications until the link fails or stop is requested.
    async fn monitor(&mut self) -> LinkEnd {
        let Some(handle) = self.handle else {
            return LinkEnd::Lost("no link handle".to_string());
        };

        let mut probe = tokio::time::interval(self.config.health_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        probe.tick().await;

        loop {
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        return LinkEnd::Stopped;
                    }
                }
                _ = probe.tick() => {
                    if let Err(reason) = self.probe(handle).await {
                        self.shared.set_ready(false);
                        return LinkEnd::Lost(reason);
                    }
                }
                Some(request) = self.commands.recv() => {
                    if !self.execute(handle, request).await {
                        return LinkEnd::Stopped;
                    }
                }
                Some(notification) = self.notify_rx.recv() => {
                    self.handle_notification(notification);
                }
            }
        }
    }

    async fn probe(&self, handle: LinkHandle) -> Result<(), String> {
        let limit = self.config.health_interval.max(Duration::from_secs(1));
        match tokio::time::timeout(limit, self.transport.is_connected(handle)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err("peripheral reports not connected".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("health probe timed out after {:?}", limit)),
        }
    }

    /// Run one bridged command against the live link and reply to the caller.
    /// Returns `false` if stop was requested while the write was pending.
    async fn execute(&mut self, handle: LinkHandle, request: CommandRequest) -> bool {
        let remaining = request.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("Dropping expired command {:?}", request.command);
            return true;
        }

        let ActuatorCommand::SetPosition { pan, tilt } = request.command;
        let write = write_position(
            self.transport.as_ref(),
            self.config.actuator_char,
            &self.cache,
            handle,
            (pan, tilt),
            remaining,
        );
        tokio::pin!(write);

        loop {
            tokio::select! {
                result = &mut write => {
                    let _ = request.reply.try_send(result);
                    return true;
                }
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        debug!("Abandoning pan/tilt write {},{}: stopping", pan, tilt);
                        let _ = request.reply.try_send(Err(BridgeError::SupervisorGone));
                        return false;
                    }
                }
            }
        }
    }

    fn handle_notification(&self, notification: Notification) {
        let Notification {
            characteristic,
            payload,
        } = notification;

        if characteristic == self.config.sensor_char {
            match protocol::decode_sensor_frame(&payload) {
                Ok(reading) => {
                    let stored = self.cache.update_sensor(reading);
                    debug!("Sensor updated: {:?}", stored);
                }
                Err(e) => warn!("Discarding sensor notification: {}", e),
            }
        } else if characteristic == self.config.actuator_char {
            match protocol::decode_actuator_frame(&payload) {
                Ok(position) => {
                    let stored = self.cache.update_actuator(position.pan, position.tilt);
                    debug!("Pan/Tilt updated: {:?}", stored);
                }
                Err(e) => warn!("Discarding actuator notification: {}", e),
            }
        } else {
            debug!("Ignoring notification from {}", characteristic);
        }
    }

    fn reject(&self, request: CommandRequest) {
        debug!("Rejecting {:?}: link not ready", request.command);
        let _ = request.reply.try_send(Err(BridgeError::NotConnected));
    }

    /// Clear the ready signal and drop the link. Errors are swallowed.
    async fn teardown(&mut self) {
        self.shared.set_ready(false);
        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(DISCONNECT_TIMEOUT, self.transport.disconnect(handle)).await
            {
                Ok(Ok(())) => debug!("Link {} closed", handle),
                Ok(Err(e)) => debug!("Ignoring disconnect error on link {}: {}", handle, e),
                Err(_) => debug!("Disconnect of link {} timed out", handle),
            }
        }
    }

    /// Drive `fut` while still answering stop, commands and notifications.
    /// Returns `None` if stop was requested first.
    async fn until_stopped<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Some(output),
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        return None;
                    }
                }
                Some(request) = self.commands.recv() => self.reject(request),
                Some(notification) = self.notify_rx.recv() => self.handle_notification(notification),
            }
        }
    }
}

/// Write a servo move and, once acknowledged, record it in the cache.
async fn write_position(
    transport: &dyn BleTransport,
    actuator_char: Uuid,
    cache: &SharedStateCache,
    handle: LinkHandle,
    (pan, tilt): (u8, u8),
    limit: Duration,
) -> BridgeResult<ActuatorPosition> {
    let payload = protocol::encode_actuator_command(pan, tilt);
    let write = transport.write(handle, actuator_char, &payload, true);

    match tokio::time::timeout(limit, write).await {
        Ok(Ok(())) => {
            debug!("Wrote pan/tilt {},{}", pan, tilt);
            Ok(cache.update_actuator(pan, tilt))
        }
        Ok(Err(e)) => {
            error!("Failed to write pan/tilt: {}", e);
            Err(e.into())
        }
        Err(_) => {
            warn!("Pan/tilt write did not complete within {:?}", limit);
            Err(BridgeError::CommandTimeout(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::encode_sensor_frame;
    use crate::infrastructure::bluetooth::simulated::SimulatedTransport;

    const ADDRESS: &str = "24:0A:C4:00:00:01";

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            device_name: "FungiForge-ESP32".to_string(),
            device_address: None,
            sensor_char: protocol::parse_uuid(protocol::SENSOR_CHAR_UUID).unwrap(),
            actuator_char: protocol::parse_uuid(protocol::ACTUATOR_CHAR_UUID).unwrap(),
            scan_timeout: Duration::from_millis(10),
            reconnect_interval: Duration::from_millis(20),
            health_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_idle_until_started() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let supervisor =
            ConnectionSupervisor::new(Arc::new(sim.clone()), config(), SharedStateCache::new());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert_eq!(sim.scans(), 0);

        supervisor.stop();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.start().is_err());
    }

    #[test]
    fn test_connects_and_decodes_notifications() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let cache = SharedStateCache::new();
        let cfg = config();
        let supervisor = ConnectionSupervisor::new(Arc::new(sim.clone()), cfg.clone(), cache.clone());
        supervisor.start().unwrap();
        supervisor.start().unwrap();

        assert!(wait_until(Duration::from_secs(2), || supervisor.is_connected()));
        assert_eq!(supervisor.state(), SupervisorState::Connected);

        // Short frame first: must not touch the cache
        assert_eq!(sim.push_notification(cfg.sensor_char, &[1, 2, 3]), 1);
        sim.push_notification(cfg.sensor_char, &encode_sensor_frame(24.127, 88.5, 20.0, 640));
        assert!(wait_until(Duration::from_secs(2), || cache.read_sensor().has_data()));

        let reading = cache.read_sensor();
        assert_eq!(reading.air_temperature, 24.13);
        assert_eq!(reading.humidity, 88.5);
        assert_eq!(reading.substrate_moisture, 640);

        sim.push_notification(cfg.actuator_char, &[250, 100]);
        assert!(wait_until(Duration::from_secs(2), || cache.read_actuator().pan == 180));
        assert_eq!(cache.read_actuator().tilt, 100);

        supervisor.stop();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(sim.active_links(), 0);
    }

    #[test]
    fn test_bad_frames_leave_cache_unchanged() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let cache = SharedStateCache::new();
        let cfg = config();
        let supervisor = ConnectionSupervisor::new(Arc::new(sim.clone()), cfg.clone(), cache.clone());
        supervisor.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || supervisor.is_connected()));

        sim.push_notification(cfg.sensor_char, &encode_sensor_frame(22.5, 85.0, 19.0, 700));
        sim.push_notification(cfg.actuator_char, &[90, 120]);
        assert!(wait_until(Duration::from_secs(2), || cache.read_sensor().has_data()
            && cache.read_actuator().last_update > 0));
        let sensor = cache.read_sensor();

        // Notifications are handled in order, so a valid frame on the other
        // characteristic marks everything before it as processed.
        let full = encode_sensor_frame(22.5, 85.0, 19.0, 700);
        let nan = encode_sensor_frame(f32::NAN, 85.0, 19.0, 700);
        sim.push_notification(cfg.sensor_char, &full[..13]);
        sim.push_notification(cfg.sensor_char, &nan);
        sim.push_notification(cfg.sensor_char, &[]);
        sim.push_notification(cfg.actuator_char, &[45, 130]);
        assert!(wait_until(Duration::from_secs(2), || cache.read_actuator().pan == 45));
        assert_eq!(cache.read_sensor(), sensor);

        let actuator = cache.read_actuator();
        assert_eq!((actuator.pan, actuator.tilt), (45, 130));

        sim.push_notification(cfg.actuator_char, &[170]);
        sim.push_notification(cfg.actuator_char, &[]);
        sim.push_notification(cfg.sensor_char, &encode_sensor_frame(23.0, 80.0, 18.0, 650));
        assert!(wait_until(Duration::from_secs(2), || cache.read_sensor().substrate_moisture
            == 650));
        assert_eq!(cache.read_actuator(), actuator);

        supervisor.stop();
    }

    #[test]
    fn test_stop_interrupts_pending_write() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let mut cfg = config();
        cfg.device_address = Some(ADDRESS.to_string());
        let supervisor = ConnectionSupervisor::new(Arc::new(sim.clone()), cfg, SharedStateCache::new());
        supervisor.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || supervisor.is_connected()));

        sim.set_write_delay(Duration::from_secs(5));
        let bridge = supervisor.bridge();
        let caller = thread::spawn(move || {
            let started = Instant::now();
            let result = bridge.submit(
                ActuatorCommand::SetPosition { pan: 90, tilt: 120 },
                Duration::from_secs(5),
            );
            (result, started.elapsed())
        });
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        supervisor.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        let (result, waited) = caller.join().unwrap();
        assert!(matches!(result, Err(BridgeError::SupervisorGone)));
        assert!(waited < Duration::from_secs(2));
        assert!(sim.writes().is_empty());
        assert_eq!(sim.active_links(), 0);
    }

    #[test]
    fn test_fixed_address_skips_scan() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let mut cfg = config();
        cfg.device_address = Some(ADDRESS.to_string());
        let supervisor = ConnectionSupervisor::new(Arc::new(sim.clone()), cfg, SharedStateCache::new());
        supervisor.start().unwrap();

        assert!(wait_until(Duration::from_secs(2), || supervisor.is_connected()));
        assert_eq!(sim.scans(), 0);
        supervisor.stop();
    }

    #[test]
    fn test_reconnects_after_link_loss() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        let supervisor =
            ConnectionSupervisor::new(Arc::new(sim.clone()), config(), SharedStateCache::new());
        supervisor.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || supervisor.is_connected()));
        assert_eq!(sim.connect_attempts(), 1);

        sim.drop_links();
        assert!(wait_until(Duration::from_secs(2), || sim.connect_attempts() >= 2
            && supervisor.is_connected()));
        assert_eq!(sim.active_links(), 1);

        supervisor.stop();
    }

    #[test]
    fn test_repeated_failures_back_off_until_stopped() {
        let sim = SimulatedTransport::new().with_device(Some("FungiForge-ESP32"), ADDRESS);
        sim.set_refuse_connections(true);
        let supervisor =
            ConnectionSupervisor::new(Arc::new(sim.clone()), config(), SharedStateCache::new());
        supervisor.start().unwrap();

        assert!(wait_until(Duration::from_secs(3), || sim.connect_attempts() >= 5));
        assert!(!supervisor.is_connected());

        let started = Instant::now();
        supervisor.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_missing_device_keeps_scanning() {
        let sim = SimulatedTransport::new().with_device(Some("Other"), ADDRESS);
        let supervisor =
            ConnectionSupervisor::new(Arc::new(sim.clone()), config(), SharedStateCache::new());
        supervisor.start().unwrap();

        assert!(wait_until(Duration::from_secs(3), || sim.scans() >= 3));
        assert_eq!(sim.connect_attempts(), 0);
        supervisor.stop();
    }

    #[test]
    fn test_stop_interrupts_long_backoff() {
        let sim = SimulatedTransport::new();
        let mut cfg = config();
        cfg.reconnect_interval = Duration::from_secs(60);
        let supervisor = ConnectionSupervisor::new(Arc::new(sim.clone()), cfg, SharedStateCache::new());
        supervisor.start().unwrap();

        assert!(wait_until(Duration::from_secs(2), || supervisor.state()
            == SupervisorState::Backoff));
        let started = Instant::now();
        supervisor.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
