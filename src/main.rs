use anyhow::Context;
use fungiforge_bridge::domain::settings::{
    parse_log_interval, Settings, SettingsService, TransportKind,
};
use fungiforge_bridge::infrastructure::bluetooth::protocol::{self, encode_sensor_frame};
use fungiforge_bridge::infrastructure::bluetooth::transport::BleTransport;
use fungiforge_bridge::infrastructure::bluetooth::SimulatedTransport;
use fungiforge_bridge::infrastructure::logging::init_logger;
use fungiforge_bridge::infrastructure::storage::JsonlReadingStore;
use fungiforge_bridge::recorder::SensorLogger;
use fungiforge_bridge::SensorBridge;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const SIMULATED_ADDRESS: &str = "24:0A:C4:00:00:01";
const SIMULATED_FRAME_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    let settings_service = match config_path_from_args() {
        Some(path) => SettingsService::load_from(path),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = match init_logger(&settings.log_settings) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    info!("Starting FungiForge bridge");
    info!("Settings loaded from {}", settings_service.path().display());

    let (transport, simulated) = build_transport(&settings)?;
    let store = Arc::new(JsonlReadingStore::new(&settings.storage_path));
    let bridge = Arc::new(SensorBridge::new(transport, store, &settings)?);
    bridge.start()?;

    let mut feeder = match simulated {
        Some(sim) => Some(SimulatedFeeder::spawn(sim, &settings)?),
        None => None,
    };

    let mut logger = if settings.sensor_logger.enabled {
        let interval = parse_log_interval(&settings.sensor_logger.interval)
            .context("Invalid sensor logger interval")?;
        Some(SensorLogger::spawn(bridge.clone(), interval)?)
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let status = bridge.status();
                    let reading = bridge.read_sensors();
                    info!(
                        "Bridge {:?} (ready: {}), air {:.2}°C {:.2}%RH, substrate {:.2}°C moisture {}",
                        status.state,
                        status.ready,
                        reading.air_temperature,
                        reading.humidity,
                        reading.substrate_temperature,
                        reading.substrate_moisture,
                    );
                }
            }
        }
    });

    info!("Shutting down");
    if let Some(logger) = logger.as_mut() {
        logger.stop();
    }
    if let Some(feeder) = feeder.as_mut() {
        feeder.stop();
    }
    bridge.stop();
    Ok(())
}

/// `--config <path>` overrides the default settings location.
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

fn build_transport(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn BleTransport>, Option<SimulatedTransport>)> {
    match settings.transport {
        #[cfg(windows)]
        TransportKind::WinRt => {
            use fungiforge_bridge::infrastructure::bluetooth::WinRtTransport;
            info!("Using WinRT Bluetooth transport");
            Ok((Arc::new(WinRtTransport::new()), None))
        }
        #[cfg(not(windows))]
        TransportKind::WinRt => {
            warn!("WinRT transport is only available on Windows, using simulated device");
            Ok(simulated_transport(settings))
        }
        TransportKind::Simulated => {
            info!("Using simulated Bluetooth transport");
            Ok(simulated_transport(settings))
        }
    }
}

fn simulated_transport(settings: &Settings) -> (Arc<dyn BleTransport>, Option<SimulatedTransport>) {
    let address = settings
        .device_address
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or(SIMULATED_ADDRESS);
    let sim = SimulatedTransport::new().with_device(Some(&settings.device_name), address);
    (Arc::new(sim.clone()), Some(sim))
}

/// Pushes synthetic sensor frames into a simulated device.
struct SimulatedFeeder {
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedFeeder {
    fn spawn(sim: SimulatedTransport, settings: &Settings) -> anyhow::Result<Self> {
        let sensor_char = protocol::parse_uuid(&settings.sensor_char_uuid)?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("fungiforge-sim".to_string())
            .spawn(move || {
                let mut tick: u32 = 0;
                loop {
                    match stop_rx.recv_timeout(SIMULATED_FRAME_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    tick = tick.wrapping_add(1);
                    let drift = (tick % 20) as f32 / 10.0;
                    let frame = encode_sensor_frame(
                        22.0 + drift,
                        85.0 - drift,
                        19.5 + drift / 2.0,
                        600 + (tick % 50) as u16,
                    );
                    sim.push_notification(sensor_char, &frame);
                }
            })?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
