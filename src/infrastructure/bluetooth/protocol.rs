//! FungiForge peripheral protocol
//!
//! Frame layouts pushed by the ESP32 firmware and the command frame written
//! back to it.

use crate::domain::models::{ActuatorPosition, SensorReading};
use crate::error::{BridgeError, BridgeResult, FrameKind};
use tracing::trace;
use uuid::Uuid;

/// Sensor notify characteristic
pub const SENSOR_CHAR_UUID: &str = "0000aaaa-0000-1000-8000-00805f9b34fb";

/// Servo notify/write characteristic
pub const ACTUATOR_CHAR_UUID: &str = "0000bbbb-0000-1000-8000-00805f9b34fb";

/// Sensor frame length in bytes
pub const SENSOR_FRAME_LEN: usize = 14;

/// Actuator frame length in bytes
pub const ACTUATOR_FRAME_LEN: usize = 2;

/// Parse a sensor frame
///
/// # Sensor Frame Structure (14 bytes, little-endian)
///
/// ```text
/// [0-3]   : Air temperature (f32, °C)
/// [4-7]   : Air humidity (f32, %RH)
/// [8-11]  : Substrate temperature (f32, °C)
/// [12-13] : Substrate moisture (u16, raw ADC)
/// ```
///
/// Trailing bytes are ignored. Temperatures and humidity are rounded to two
/// decimals. The returned reading has `last_update == 0`; the cache stamps it.
pub fn decode_sensor_frame(bytes: &[u8]) -> BridgeResult<SensorReading> {
    check_len(FrameKind::Sensor, bytes, SENSOR_FRAME_LEN)?;
    trace!("Raw sensor frame: {:02X?}", &bytes[..SENSOR_FRAME_LEN]);

    let air_temperature = read_f32(bytes, 0)?;
    let humidity = read_f32(bytes, 4)?;
    let substrate_temperature = read_f32(bytes, 8)?;
    let substrate_moisture = u16::from_le_bytes([bytes[12], bytes[13]]);

    Ok(SensorReading {
        air_temperature: round2(air_temperature),
        humidity: round2(humidity),
        substrate_temperature: round2(substrate_temperature),
        substrate_moisture,
        last_update: 0,
    })
}

/// Parse an actuator frame: `[pan, tilt]` as unsigned bytes.
///
/// The firmware is trusted for neither axis, so both are clamped.
pub fn decode_actuator_frame(bytes: &[u8]) -> BridgeResult<ActuatorPosition> {
    check_len(FrameKind::Actuator, bytes, ACTUATOR_FRAME_LEN)?;
    Ok(ActuatorPosition::clamped(bytes[0] as i64, bytes[1] as i64))
}

/// Build the write payload for a servo move.
pub fn encode_actuator_command(pan: u8, tilt: u8) -> [u8; ACTUATOR_FRAME_LEN] {
    [pan, tilt]
}

/// Parse a characteristic UUID string
pub fn parse_uuid(uuid_str: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid UUID '{}': {}", uuid_str, e))
}

fn check_len(kind: FrameKind, bytes: &[u8], expected: usize) -> BridgeResult<()> {
    if bytes.len() < expected {
        return Err(BridgeError::ShortFrame {
            kind,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_f32(bytes: &[u8], offset: usize) -> BridgeResult<f64> {
    let value = f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]);
    if !value.is_finite() {
        return Err(BridgeError::MalformedFrame {
            kind: FrameKind::Sensor,
            reason: format!("non-finite value at offset {}", offset),
        });
    }
    Ok(value as f64)
}

// Values come from f32, so the scaled product is exact and halves are real
// ties. DS18B20 readings land on them (1/16 °C steps); they go to even.
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Build a sensor frame, as the firmware would send it.
pub fn encode_sensor_frame(
    air_temperature: f32,
    humidity: f32,
    substrate_temperature: f32,
    substrate_moisture: u16,
) -> [u8; SENSOR_FRAME_LEN] {
    let mut frame = [0u8; SENSOR_FRAME_LEN];
    frame[0..4].copy_from_slice(&air_temperature.to_le_bytes());
    frame[4..8].copy_from_slice(&humidity.to_le_bytes());
    frame[8..12].copy_from_slice(&substrate_temperature.to_le_bytes());
    frame[12..14].copy_from_slice(&substrate_moisture.to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sensor_frame_rounds() {
        let frame = encode_sensor_frame(23.456, 81.999, 19.004, 734);
        let reading = decode_sensor_frame(&frame).unwrap();
        assert_eq!(reading.air_temperature, 23.46);
        assert_eq!(reading.humidity, 82.0);
        assert_eq!(reading.substrate_temperature, 19.0);
        assert_eq!(reading.substrate_moisture, 734);
        assert_eq!(reading.last_update, 0);
    }

    #[test]
    fn test_decode_sensor_frame_ties_round_to_even() {
        let frame = encode_sensor_frame(21.125, 50.375, 19.625, 1);
        let reading = decode_sensor_frame(&frame).unwrap();
        assert_eq!(reading.air_temperature, 21.12);
        assert_eq!(reading.humidity, 50.38);
        assert_eq!(reading.substrate_temperature, 19.62);

        let reading = decode_sensor_frame(&encode_sensor_frame(-0.125, 0.0, 0.0, 0)).unwrap();
        assert_eq!(reading.air_temperature, -0.12);
    }

    #[test]
    fn test_decode_sensor_ignores_trailing_bytes() {
        let mut frame = encode_sensor_frame(-4.5, 50.0, 10.0, 1).to_vec();
        frame.extend_from_slice(&[0xFF, 0xFF]);
        let reading = decode_sensor_frame(&frame).unwrap();
        assert_eq!(reading.air_temperature, -4.5);
        assert_eq!(reading.substrate_moisture, 1);
    }

    #[test]
    fn test_short_frames_rejected() {
        let frame = encode_sensor_frame(1.0, 2.0, 3.0, 4);
        for len in 0..SENSOR_FRAME_LEN {
            match decode_sensor_frame(&frame[..len]) {
                Err(BridgeError::ShortFrame {
                    kind: FrameKind::Sensor,
                    expected: 14,
                    actual,
                }) => assert_eq!(actual, len),
                other => panic!("unexpected result for {} bytes: {:?}", len, other),
            }
        }

        assert!(matches!(
            decode_actuator_frame(&[90]),
            Err(BridgeError::ShortFrame { kind: FrameKind::Actuator, .. })
        ));
        assert!(decode_actuator_frame(&[]).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let frame = encode_sensor_frame(f32::NAN, 2.0, 3.0, 4);
        assert!(matches!(
            decode_sensor_frame(&frame),
            Err(BridgeError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_decode_actuator_frame_clamps() {
        let pos = decode_actuator_frame(&[200, 30]).unwrap();
        assert_eq!((pos.pan, pos.tilt), (180, 90));

        let pos = decode_actuator_frame(&[45, 130, 0]).unwrap();
        assert_eq!((pos.pan, pos.tilt), (45, 130));
    }

    #[test]
    fn test_encode_actuator_command() {
        assert_eq!(encode_actuator_command(180, 90), [180, 90]);
    }

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid(SENSOR_CHAR_UUID).unwrap();
        assert_eq!(uuid.as_fields().0, 0x0000aaaa);
        assert!(parse_uuid("not-a-uuid").is_err());
    }
}
