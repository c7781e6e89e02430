use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "fungiforge_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Which BLE backend the binary builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Native Windows Bluetooth LE stack
    WinRt,
    /// In-process fake peripheral
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorLoggerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_logger_interval")]
    pub interval: String, // "10s", "30s", "1m", "5m", "1h"
}

impl Default for SensorLoggerSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval: default_logger_interval(),
        }
    }
}

fn default_logger_interval() -> String {
    "1m".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Peripheral
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Skips the name scan when set
    #[serde(default)]
    pub device_address: Option<String>,
    #[serde(default = "default_sensor_uuid")]
    pub sensor_char_uuid: String,
    #[serde(default = "default_actuator_uuid")]
    pub actuator_char_uuid: String,

    // Timing
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    // Persistence
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    #[serde(default)]
    pub sensor_logger: SensorLoggerSettings,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            device_address: None,
            sensor_char_uuid: default_sensor_uuid(),
            actuator_char_uuid: default_actuator_uuid(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
            health_interval_ms: default_health_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            transport: default_transport(),
            storage_path: default_storage_path(),
            sensor_logger: SensorLoggerSettings::default(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_device_name() -> String {
    "FungiForge-ESP32".to_string()
}
fn default_sensor_uuid() -> String {
    "0000aaaa-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_actuator_uuid() -> String {
    "0000bbbb-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_reconnect_interval_ms() -> u64 {
    5000
}
fn default_scan_timeout_ms() -> u64 {
    5000
}
fn default_health_interval_ms() -> u64 {
    1000
}
fn default_command_timeout_ms() -> u64 {
    5000
}
fn default_shutdown_timeout_ms() -> u64 {
    2000
}
fn default_transport() -> TransportKind {
    if cfg!(windows) {
        TransportKind::WinRt
    } else {
        TransportKind::Simulated
    }
}
fn default_storage_path() -> String {
    "sensor_readings.jsonl".to_string()
}

/// Parse a logger interval such as `"30s"`, `"5m"` or `"1h"`.
pub fn parse_log_interval(value: &str) -> anyhow::Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("Missing unit in interval '{}'", value))?;
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid interval '{}'", value))?;
    if amount == 0 {
        anyhow::bail!("Interval must be positive: '{}'", value);
    }

    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        _ => anyhow::bail!("Unknown interval unit '{}'", unit),
    };
    Ok(Duration::from_secs(seconds))
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load settings from an explicit path, falling back to defaults when
    /// the file is missing or unreadable.
    pub fn load_from(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("FungiForge");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
