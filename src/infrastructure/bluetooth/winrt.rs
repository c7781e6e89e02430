//! Windows BLE backend
//!
//! [`BleTransport`] over the WinRT Bluetooth LE APIs.

use crate::infrastructure::bluetooth::transport::{
    BleTransport, DiscoveredDevice, LinkHandle, Notification, NotificationSink, TransportError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

struct WinRtLink {
    device: BluetoothLEDevice,
    characteristics: HashMap<Uuid, GattCharacteristic>,
}

/// WinRT-backed transport
#[derive(Default)]
pub struct WinRtTransport {
    links: Mutex<HashMap<u64, WinRtLink>>,
    next_handle: AtomicU64,
}

impl WinRtTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn links(&self) -> MutexGuard<'_, HashMap<u64, WinRtLink>> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn device(&self, handle: LinkHandle) -> Result<BluetoothLEDevice, TransportError> {
        self.links()
            .get(&handle.0)
            .map(|link| link.device.clone())
            .ok_or(TransportError::UnknownHandle(handle))
    }

    fn characteristic(
        &self,
        handle: LinkHandle,
        characteristic: Uuid,
    ) -> Result<GattCharacteristic, TransportError> {
        let links = self.links();
        let link = links
            .get(&handle.0)
            .ok_or(TransportError::UnknownHandle(handle))?;
        link.characteristics
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }

    /// Enumerate every characteristic of every GATT service on the device
    async fn discover_characteristics(
        device: &BluetoothLEDevice,
    ) -> Result<HashMap<Uuid, GattCharacteristic>, TransportError> {
        let services_result = device.GetGattServicesAsync().map_err(gatt)?.await.map_err(gatt)?;
        if services_result.Status().map_err(gatt)? != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt("failed to get GATT services".to_string()));
        }

        // Views are not Send; copy the services out before the next await
        let services: Vec<_> = {
            let view = services_result.Services().map_err(gatt)?;
            let mut services = Vec::new();
            for i in 0..view.Size().map_err(gatt)? {
                services.push(view.GetAt(i).map_err(gatt)?);
            }
            services
        };

        let mut found = HashMap::new();
        for service in services {
            let chars_result = service
                .GetCharacteristicsAsync()
                .map_err(gatt)?
                .await
                .map_err(gatt)?;
            if chars_result.Status().map_err(gatt)? != GattCommunicationStatus::Success {
                debug!("Skipping service {:?}: characteristics unavailable", service.Uuid());
                continue;
            }

            let characteristics = chars_result.Characteristics().map_err(gatt)?;
            for j in 0..characteristics.Size().map_err(gatt)? {
                let c = characteristics.GetAt(j).map_err(gatt)?;
                found.insert(from_guid(c.Uuid().map_err(gatt)?), c);
            }
        }

        info!("Found {} characteristics", found.len());
        Ok(found)
    }
}

#[async_trait]
impl BleTransport for WinRtTransport {
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let seen: Arc<Mutex<HashMap<u64, DiscoveredDevice>>> = Arc::default();

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(adapter)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(adapter)?;

        register_advertisement_handler(&watcher, seen.clone()).map_err(adapter)?;
        watcher.Start().map_err(adapter)?;
        tokio::time::sleep(timeout).await;
        watcher.Stop().map_err(adapter)?;

        let devices: Vec<DiscoveredDevice> = seen
            .lock()
            .map(|seen| seen.values().cloned().collect())
            .unwrap_or_default();
        Ok(devices)
    }

    async fn connect(&self, address: &str) -> Result<LinkHandle, TransportError> {
        let raw = parse_address(address)
            .ok_or_else(|| TransportError::ConnectRefused(format!("bad address {}", address)))?;

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw)
            .map_err(refused)?
            .await
            .map_err(refused)?;
        info!("Device connected: {:?}", device.Name());

        let characteristics = Self::discover_characteristics(&device).await?;
        let handle = LinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.links().insert(
            handle.0,
            WinRtLink {
                device,
                characteristics,
            },
        );
        Ok(handle)
    }

    async fn subscribe(
        &self,
        handle: LinkHandle,
        characteristic: Uuid,
        sink: NotificationSink,
    ) -> Result<(), TransportError> {
        let gatt_char = self.characteristic(handle, characteristic)?;

        register_value_handler(&gatt_char, characteristic, sink).map_err(gatt)?;

        let status = gatt_char
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )
            .map_err(gatt)?
            .await
            .map_err(gatt)?;
        if status != GattCommunicationStatus::Success {
            warn!("Notification subscription returned status: {:?}", status);
            return Err(TransportError::Gatt(format!(
                "notify on {} returned {:?}",
                characteristic, status
            )));
        }
        Ok(())
    }

    async fn write(
        &self,
        handle: LinkHandle,
        characteristic: Uuid,
        payload: &[u8],
        require_ack: bool,
    ) -> Result<(), TransportError> {
        let gatt_char = self.characteristic(handle, characteristic)?;

        let option = if require_ack {
            GattWriteOption::WriteWithResponse
        } else {
            GattWriteOption::WriteWithoutResponse
        };
        let operation = {
            let writer = DataWriter::new().map_err(gatt)?;
            writer.WriteBytes(payload).map_err(gatt)?;
            let buffer = writer.DetachBuffer().map_err(gatt)?;
            gatt_char
                .WriteValueWithOptionAsync(&buffer, option)
                .map_err(gatt)?
        };
        let status = operation.await.map_err(gatt)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!("write returned {:?}", status)));
        }
        Ok(())
    }

    async fn disconnect(&self, handle: LinkHandle) -> Result<(), TransportError> {
        let link = self
            .links()
            .remove(&handle.0)
            .ok_or(TransportError::UnknownHandle(handle))?;
        link.device.Close().map_err(adapter)?;
        info!("Disconnected from device");
        Ok(())
    }

    async fn is_connected(&self, handle: LinkHandle) -> Result<bool, TransportError> {
        let device = self.device(handle)?;
        let status = device.ConnectionStatus().map_err(adapter)?;
        Ok(status == BluetoothConnectionStatus::Connected)
    }
}

/// Collect advertisements into `seen`, keyed by raw address
fn register_advertisement_handler(
    watcher: &BluetoothLEAdvertisementWatcher,
    seen: Arc<Mutex<HashMap<u64, DiscoveredDevice>>>,
) -> windows::core::Result<()> {
    let handler = TypedEventHandler::new(
        move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
              args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let name = args.Advertisement()?.LocalName()?.to_string();
                let address = args.BluetoothAddress()?;
                if let Ok(mut seen) = seen.lock() {
                    let entry = seen.entry(address).or_insert_with(|| DiscoveredDevice {
                        name: None,
                        address: format_address(address),
                    });
                    // Names often only arrive in the scan response
                    if !name.is_empty() {
                        entry.name = Some(name);
                    }
                }
            }
            Ok(())
        },
    );
    watcher.Received(&handler)?;
    Ok(())
}

/// Forward value changes of `gatt_char` into `sink`
fn register_value_handler(
    gatt_char: &GattCharacteristic,
    characteristic: Uuid,
    sink: NotificationSink,
) -> windows::core::Result<()> {
    let handler = TypedEventHandler::new(
        move |_: windows::core::Ref<GattCharacteristic>,
              args: windows::core::Ref<GattValueChangedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let value = args.CharacteristicValue()?;
                let reader = DataReader::FromBuffer(&value)?;
                let mut payload = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                reader.ReadBytes(&mut payload)?;
                let _ = sink.send(Notification {
                    characteristic,
                    payload,
                });
            }
            Ok(())
        },
    );
    gatt_char.ValueChanged(&handler)?;
    Ok(())
}

fn gatt(e: windows::core::Error) -> TransportError {
    TransportError::Gatt(e.to_string())
}

fn adapter(e: windows::core::Error) -> TransportError {
    TransportError::Adapter(e.to_string())
}

fn refused(e: windows::core::Error) -> TransportError {
    TransportError::ConnectRefused(e.to_string())
}

fn from_guid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

/// `0x240AC4000001` -> `"24:0A:C4:00:00:01"`
fn format_address(raw: u64) -> String {
    let bytes = raw.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn parse_address(address: &str) -> Option<u64> {
    let hex: String = address.chars().filter(|c| *c != ':' && *c != '-').collect();
    if hex.len() != 12 {
        return None;
    }
    u64::from_str_radix(&hex, 16).ok()
}
