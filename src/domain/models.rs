use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Valid pan range in degrees
pub const PAN_RANGE: (u8, u8) = (0, 180);
/// Valid tilt range in degrees
pub const TILT_RANGE: (u8, u8) = (90, 160);

/// Latest environmental reading pushed by the peripheral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub air_temperature: f64,
    pub humidity: f64,
    pub substrate_temperature: f64,
    pub substrate_moisture: u16,

    // Unix milliseconds, 0 until the first frame arrives
    #[serde(default)]
    pub last_update: i64,
}

impl SensorReading {
    pub fn has_data(&self) -> bool {
        self.last_update > 0
    }
}

/// Pan/tilt servo position.
///
/// The default 0/0 with `last_update == 0` means "unknown": nothing has been
/// reported or written yet. Every stored position after that is clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorPosition {
    pub pan: u8,
    pub tilt: u8,
    #[serde(default)]
    pub last_update: i64,
}

impl ActuatorPosition {
    /// Build a position with both axes clamped into their valid ranges.
    pub fn clamped(pan: i64, tilt: i64) -> Self {
        Self {
            pan: clamp_axis(pan, PAN_RANGE),
            tilt: clamp_axis(tilt, TILT_RANGE),
            last_update: 0,
        }
    }
}

fn clamp_axis(value: i64, (min, max): (u8, u8)) -> u8 {
    value.clamp(min as i64, max as i64) as u8
}

/// Commands the bridge can run on the supervisor context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    /// Move both servos; values must already be clamped
    SetPosition { pan: u8, tilt: u8 },
}

/// How a move request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    Applied,
    NotConnected,
    TimedOut,
    Failed,
}

/// Result of a move request.
///
/// `pan`/`tilt` carry the acknowledged position, or zero when the move did
/// not happen. `status` says which of the two it was, and `commanded` always
/// holds the clamped request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub pan: u8,
    pub tilt: u8,
    pub status: MoveStatus,
    pub commanded: ActuatorPosition,
}

impl MoveOutcome {
    pub fn applied(position: ActuatorPosition) -> Self {
        Self {
            pan: position.pan,
            tilt: position.tilt,
            status: MoveStatus::Applied,
            commanded: position,
        }
    }

    pub fn rejected(status: MoveStatus, commanded: ActuatorPosition) -> Self {
        Self {
            pan: 0,
            tilt: 0,
            status,
            commanded,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == MoveStatus::Applied
    }
}

/// Lifecycle of the connection supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    Idle,
    Discovering,
    Connecting,
    Subscribing,
    Connected,
    Disconnecting,
    Backoff,
    Stopped,
}

impl SupervisorState {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Discovering,
            2 => Self::Connecting,
            3 => Self::Subscribing,
            4 => Self::Connected,
            5 => Self::Disconnecting,
            6 => Self::Backoff,
            _ => Self::Stopped,
        }
    }
}

/// Snapshot of the bridge for status endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub state: SupervisorState,
    pub ready: bool,
}

/// Current wall-clock time as Unix milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_out_of_range() {
        let pos = ActuatorPosition::clamped(300, 10);
        assert_eq!((pos.pan, pos.tilt), (180, 90));

        let pos = ActuatorPosition::clamped(-20, 500);
        assert_eq!((pos.pan, pos.tilt), (0, 160));
    }

    #[test]
    fn test_default_position_is_unknown() {
        let pos = ActuatorPosition::default();
        assert_eq!((pos.pan, pos.tilt, pos.last_update), (0, 0, 0));
        assert!(pos.tilt < TILT_RANGE.0);
    }

    #[test]
    fn test_clamp_in_range_untouched() {
        let pos = ActuatorPosition::clamped(42, 120);
        assert_eq!((pos.pan, pos.tilt), (42, 120));
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            SupervisorState::Idle,
            SupervisorState::Discovering,
            SupervisorState::Connecting,
            SupervisorState::Subscribing,
            SupervisorState::Connected,
            SupervisorState::Disconnecting,
            SupervisorState::Backoff,
            SupervisorState::Stopped,
        ] {
            assert_eq!(SupervisorState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_rejected_outcome_is_zeroed() {
        let outcome =
            MoveOutcome::rejected(MoveStatus::NotConnected, ActuatorPosition::clamped(300, 10));
        assert_eq!((outcome.pan, outcome.tilt), (0, 0));
        assert_eq!((outcome.commanded.pan, outcome.commanded.tilt), (180, 90));
        assert!(!outcome.is_applied());
    }
}
