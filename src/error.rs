//! Error types shared by the bridge components.

use std::time::Duration;
use thiserror::Error;

use crate::infrastructure::bluetooth::transport::TransportError;

/// Which frame layout a payload was decoded as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Sensor,
    Actuator,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sensor => write!(f, "sensor"),
            Self::Actuator => write!(f, "actuator"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{kind} frame too short: {actual} bytes (expected {expected})")]
    ShortFrame {
        kind: FrameKind,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} frame malformed: {reason}")]
    MalformedFrame { kind: FrameKind, reason: String },

    #[error("device '{0}' not found by BLE scan")]
    DeviceNotFound(String),

    #[error("could not connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("BLE link is not connected")]
    NotConnected,

    #[error("command did not complete within {0:?}")]
    CommandTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to persist reading: {0}")]
    PersistenceFailure(String),

    #[error("connection supervisor is not running")]
    SupervisorGone,
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
