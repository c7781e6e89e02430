//! In-process fake peripheral
//!
//! Implements [`BleTransport`] without a radio. Used by the test suite and
//! by the binary when `transport` is set to `"simulated"`.

use crate::infrastructure::bluetooth::transport::{
    BleTransport, DiscoveredDevice, LinkHandle, Notification, NotificationSink, TransportError,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct SimLink {
    address: String,
    connected: bool,
    subscriptions: HashMap<Uuid, NotificationSink>,
}

#[derive(Debug, Default)]
struct SimState {
    devices: Vec<DiscoveredDevice>,
    // None accepts every characteristic
    characteristics: Option<HashSet<Uuid>>,
    refuse_connections: bool,
    fail_writes: bool,
    write_delay: Duration,
    next_handle: u64,
    links: HashMap<u64, SimLink>,
    scans: usize,
    connect_attempts: usize,
    writes: Vec<(Uuid, Vec<u8>)>,
}

/// Simulated BLE stack. Clones share the same peripheral.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an advertising device
    pub fn with_device(self, name: Option<&str>, address: &str) -> Self {
        self.lock().devices.push(DiscoveredDevice {
            name: name.map(str::to_string),
            address: address.to_string(),
        });
        self
    }

    /// Restrict the peripheral to the given characteristics
    pub fn with_characteristic(self, characteristic: Uuid) -> Self {
        self.lock()
            .characteristics
            .get_or_insert_with(HashSet::new)
            .insert(characteristic);
        self
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Delay before a write is acknowledged
    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    /// Push a value on every live subscription for `characteristic`.
    /// Returns the number of subscribers reached.
    pub fn push_notification(&self, characteristic: Uuid, payload: &[u8]) -> usize {
        let state = self.lock();
        state
            .links
            .values()
            .filter(|link| link.connected)
            .filter_map(|link| link.subscriptions.get(&characteristic))
            .filter(|sink| {
                sink.send(Notification {
                    characteristic,
                    payload: payload.to_vec(),
                })
                .is_ok()
            })
            .count()
    }

    /// Silently drop every open link, as if the peripheral went out of range
    pub fn drop_links(&self) {
        for link in self.lock().links.values_mut() {
            link.connected = false;
            link.subscriptions.clear();
        }
    }

    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn active_links(&self) -> usize {
        self.lock().links.values().filter(|l| l.connected).count()
    }

    /// Every acknowledged write, oldest first
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_characteristic(state: &SimState, characteristic: Uuid) -> Result<(), TransportError> {
        match &state.characteristics {
            Some(known) if !known.contains(&characteristic) => {
                Err(TransportError::CharacteristicNotFound(characteristic))
            }
            _ => Ok(()),
        }
    }

    fn live_link<'a>(
        state: &'a mut SimState,
        handle: LinkHandle,
    ) -> Result<&'a mut SimLink, TransportError> {
        let link = state
            .links
            .get_mut(&handle.0)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if !link.connected {
            return Err(TransportError::LinkLost);
        }
        Ok(link)
    }
}

#[async_trait]
impl BleTransport for SimulatedTransport {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let mut state = self.lock();
        state.scans += 1;
        Ok(state.devices.clone())
    }

    async fn connect(&self, address: &str) -> Result<LinkHandle, TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.refuse_connections {
            return Err(TransportError::ConnectRefused(address.to_string()));
        }
        if !state.devices.iter().any(|d| d.address == address) {
            return Err(TransportError::ConnectRefused(format!(
                "no device at {}",
                address
            )));
        }

        state.next_handle += 1;
        let handle = LinkHandle(state.next_handle);
        state.links.insert(
            handle.0,
            SimLink {
                address: address.to_string(),
                connected: true,
                subscriptions: HashMap::new(),
            },
        );
        debug!("Simulated link {} opened to {}", handle, address);
        Ok(handle)
    }

    async fn subscribe(
        &self,
        handle: LinkHandle,
        characteristic: Uuid,
        sink: NotificationSink,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::check_characteristic(&state, characteristic)?;
        let link = Self::live_link(&mut state, handle)?;
        link.subscriptions.insert(characteristic, sink);
        Ok(())
    }

    async fn write(
        &self,
        handle: LinkHandle,
        characteristic: Uuid,
        payload: &[u8],
        require_ack: bool,
    ) -> Result<(), TransportError> {
        let delay = self.lock().write_delay;
        if require_ack && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        Self::check_characteristic(&state, characteristic)?;
        Self::live_link(&mut state, handle)?;
        if state.fail_writes {
            return Err(TransportError::Gatt("write rejected by peripheral".to_string()));
        }
        state.writes.push((characteristic, payload.to_vec()));
        Ok(())
    }

    async fn disconnect(&self, handle: LinkHandle) -> Result<(), TransportError> {
        let link = self
            .lock()
            .links
            .remove(&handle.0)
            .ok_or(TransportError::UnknownHandle(handle))?;
        debug!("Simulated link {} to {} closed", handle, link.address);
        Ok(())
    }

    async fn is_connected(&self, handle: LinkHandle) -> Result<bool, TransportError> {
        let state = self.lock();
        let link = state
            .links
            .get(&handle.0)
            .ok_or(TransportError::UnknownHandle(handle))?;
        Ok(link.connected)
    }
}
