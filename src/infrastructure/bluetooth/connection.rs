//! BLE Connection Module
//!
//! Opens the link to the peripheral and enables notifications.

use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::transport::{BleTransport, LinkHandle, NotificationSink};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Characteristics to subscribe after connecting
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub sensor_char: Uuid,
    pub actuator_char: Uuid,
}

/// Connection handler for one connect attempt
pub struct BleConnection {
    transport: Arc<dyn BleTransport>,
    config: ConnectionConfig,
}

impl BleConnection {
    pub fn new(transport: Arc<dyn BleTransport>, config: ConnectionConfig) -> Self {
        Self { transport, config }
    }

    /// Open the link to `address`
    pub async fn connect(&self, address: &str) -> BridgeResult<LinkHandle> {
        info!("Connecting to {} ...", address);
        let handle = self
            .transport
            .connect(address)
            .await
            .map_err(|e| BridgeError::ConnectFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        // Some stacks hand out a handle before the link settles
        match self.transport.is_connected(handle).await {
            Ok(true) => {
                info!("Connected to {} (link {})", address, handle);
                Ok(handle)
            }
            Ok(false) | Err(_) => {
                let _ = self.transport.disconnect(handle).await;
                Err(BridgeError::ConnectFailed {
                    address: address.to_string(),
                    reason: "link dropped right after connect".to_string(),
                })
            }
        }
    }

    /// Subscribe every configured characteristic.
    ///
    /// Each subscription is independent: a failure is logged and the next
    /// one is still attempted. Returns how many succeeded.
    pub async fn subscribe_all(&self, handle: LinkHandle, sink: &NotificationSink) -> usize {
        let targets = [
            ("sensor", self.config.sensor_char),
            ("actuator", self.config.actuator_char),
        ];

        let mut subscribed = 0;
        for (label, characteristic) in targets {
            match self
                .transport
                .subscribe(handle, characteristic, sink.clone())
                .await
            {
                Ok(()) => {
                    info!("Subscribed to {} notifications {}", label, characteristic);
                    subscribed += 1;
                }
                Err(e) => warn!(
                    "Failed to subscribe to {} notifications {}: {}",
                    label, characteristic, e
                ),
            }
        }

        if subscribed == 0 {
            warn!("No notifications enabled; cached values will only change on writes");
        }
        subscribed
    }
}
