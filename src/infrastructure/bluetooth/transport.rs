//! BLE transport abstraction
//!
//! The connection supervisor talks to the radio only through
//! [`BleTransport`]. Every method is called from the supervisor's runtime.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectRefused(String),

    #[error("unknown link handle {0}")]
    UnknownHandle(LinkHandle),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("link lost")]
    LinkLost,

    #[error("GATT operation failed: {0}")]
    Gatt(String),

    #[error("adapter error: {0}")]
    Adapter(String),
}

/// A device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    pub address: String,
}

/// Opaque id of an established link. Only valid until disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(pub u64);

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value pushed by the peripheral on a subscribed characteristic
#[derive(Debug, Clone)]
pub struct Notification {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

/// Where a transport delivers notifications for a subscription
pub type NotificationSink = mpsc::UnboundedSender<Notification>;

#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Collect advertising devices for up to `timeout`.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, TransportError>;

    async fn connect(&self, address: &str) -> Result<LinkHandle, TransportError>;

    /// Enable notifications on `characteristic`, delivering values to `sink`.
    async fn subscribe(
        &self,
        handle: LinkHandle,
        characteristic: Uuid,
        sink: NotificationSink,
    ) -> Result<(), TransportError>;

    async fn write(
        &self,
        handle: LinkHandle,
        characteristic: Uuid,
        payload: &[u8],
        require_ack: bool,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self, handle: LinkHandle) -> Result<(), TransportError>;

    async fn is_connected(&self, handle: LinkHandle) -> Result<bool, TransportError>;
}
