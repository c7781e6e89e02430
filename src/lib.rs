//! FungiForge BLE bridge
//!
//! Keeps a persistent Bluetooth LE link to the FungiForge ESP32, caches the
//! telemetry it pushes, and moves its pan/tilt servos on request. Everything
//! outside the crate goes through [`SensorBridge`].

pub mod domain;
pub mod error;
pub mod facade;
pub mod infrastructure;
pub mod recorder;

pub use domain::models::{
    ActuatorPosition, BridgeStatus, MoveOutcome, MoveStatus, SensorReading, SupervisorState,
};
pub use error::{BridgeError, BridgeResult};
pub use facade::SensorBridge;
