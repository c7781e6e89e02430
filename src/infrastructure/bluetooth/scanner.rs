//! BLE Scanner Module
//!
//! Resolves the peripheral's address from its advertised name.

use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Name-based scanner for the FungiForge peripheral
pub struct BleScanner {
    transport: Arc<dyn BleTransport>,
    timeout: Duration,
}

impl BleScanner {
    pub fn new(transport: Arc<dyn BleTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Scan once and return the address of the first device advertising
    /// exactly `name`.
    pub async fn find_by_name(&self, name: &str) -> BridgeResult<String> {
        info!("Scanning for BLE device named '{}'...", name);
        let devices = self.transport.scan(self.timeout).await?;
        debug!("Scan returned {} devices", devices.len());

        devices
            .into_iter()
            .find(|d| d.name.as_deref() == Some(name))
            .map(|d| {
                info!("Found {} @ {}", name, d.address);
                d.address
            })
            .ok_or_else(|| BridgeError::DeviceNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::simulated::SimulatedTransport;

    #[tokio::test]
    async fn test_find_by_name() {
        let sim = SimulatedTransport::new()
            .with_device(None, "00:00:00:00:00:01")
            .with_device(Some("Other"), "00:00:00:00:00:02")
            .with_device(Some("FungiForge-ESP32"), "00:00:00:00:00:03");
        let scanner = BleScanner::new(Arc::new(sim), Duration::from_millis(10));

        let address = scanner.find_by_name("FungiForge-ESP32").await.unwrap();
        assert_eq!(address, "00:00:00:00:00:03");
    }

    #[tokio::test]
    async fn test_missing_device() {
        let sim = SimulatedTransport::new().with_device(Some("Other"), "00:00:00:00:00:02");
        let scanner = BleScanner::new(Arc::new(sim), Duration::from_millis(10));

        match scanner.find_by_name("FungiForge-ESP32").await {
            Err(BridgeError::DeviceNotFound(name)) => assert_eq!(name, "FungiForge-ESP32"),
            other => panic!("expected DeviceNotFound, got {:?}", other),
        }
    }
}
