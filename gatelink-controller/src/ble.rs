//! btleplug-backed Transport Port
//!
//! Scans for gates, connects, and maps each [`Slot`] to the characteristic
//! with the matching 16-bit id inside the gate service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{CharPropFlags, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use gatelink_proto::{Slot, SlotCapabilities};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{SlotTransport, WriteMode};

/// Gate service UUID, see [`gatelink_proto::SERVICE_UUID`]
pub const SERVICE: Uuid = Uuid::from_u128(0x6a7e6a7e_4929_42d0_0000_fcc5a35e13f1);

/// A device seen while scanning
#[derive(Debug, Clone)]
pub struct DiscoveredGate {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Advertises the gate service
    pub is_gate: bool,
}

fn link_error(e: btleplug::Error) -> TransportError {
    match e {
        btleplug::Error::NotConnected => TransportError::Disconnected,
        btleplug::Error::TimedOut(_) => TransportError::Timeout,
        e => TransportError::Link(e.to_string()),
    }
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await.map_err(link_error)?;
    let adapters = manager.adapters().await.map_err(link_error)?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Link("no Bluetooth adapter found".into()))
}

async fn describe(peripheral: &Peripheral) -> Result<Option<DiscoveredGate>, TransportError> {
    let Some(props) = peripheral.properties().await.map_err(link_error)? else {
        return Ok(None);
    };
    Ok(Some(DiscoveredGate {
        name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
        address: peripheral.address().to_string(),
        rssi: props.rssi,
        is_gate: props.services.contains(&SERVICE),
    }))
}

/// Scan for BLE devices
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<DiscoveredGate>, TransportError> {
    adapter.start_scan(ScanFilter::default()).await.map_err(link_error)?;
    tokio::time::sleep(duration).await;

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await.map_err(link_error)? {
        if let Some(device) = describe(&peripheral).await? {
            devices.push(device);
        }
    }

    adapter.stop_scan().await.map_err(link_error)?;
    Ok(devices)
}

/// Find a gate by name/address pattern, or the first device advertising the
/// gate service
pub async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
    duration: Duration,
) -> Result<(Peripheral, DiscoveredGate), TransportError> {
    adapter.start_scan(ScanFilter::default()).await.map_err(link_error)?;
    tokio::time::sleep(duration).await;

    for peripheral in adapter.peripherals().await.map_err(link_error)? {
        let Some(device) = describe(&peripheral).await? else { continue };
        let matches = match target {
            Some(t) => device.name.contains(t) || device.address.contains(t),
            None => device.is_gate,
        };
        if matches {
            adapter.stop_scan().await.map_err(link_error)?;
            return Ok((peripheral, device));
        }
    }

    adapter.stop_scan().await.map_err(link_error)?;
    Err(TransportError::Link("no gate found".into()))
}

/// A connected gate
pub struct BleGate {
    peripheral: Peripheral,
    characteristics: HashMap<Slot, Characteristic>,
}

impl BleGate {
    /// Connect if needed and discover the gate's characteristics
    pub async fn attach(peripheral: Peripheral) -> Result<Self, TransportError> {
        if !peripheral.is_connected().await.map_err(link_error)? {
            peripheral.connect().await.map_err(link_error)?;
        }
        peripheral.discover_services().await.map_err(link_error)?;

        let by_uuid: HashMap<Uuid, Characteristic> = peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.service_uuid == SERVICE)
            .map(|c| (c.uuid, c))
            .collect();
        let characteristics: HashMap<Slot, Characteristic> = Slot::ALL
            .into_iter()
            .filter_map(|slot| by_uuid.get(&uuid_from_u16(slot.short_id())).map(|c| (slot, c.clone())))
            .collect();

        log::debug!(
            "{}: {} of {} slots present",
            peripheral.address(),
            characteristics.len(),
            Slot::ALL.len()
        );
        Ok(Self { peripheral, characteristics })
    }

    pub fn address(&self) -> String {
        self.peripheral.address().to_string()
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await.map_err(link_error)
    }
}

#[async_trait]
impl SlotTransport for BleGate {
    type Handle = Characteristic;

    fn resolve(&self, slot: Slot) -> Result<Characteristic, TransportError> {
        self.characteristics
            .get(&slot)
            .cloned()
            .ok_or(TransportError::SlotNotFound(slot))
    }

    fn capabilities(&self, handle: &Characteristic) -> SlotCapabilities {
        let props = handle.properties;
        SlotCapabilities {
            read: props.contains(CharPropFlags::READ),
            write: props.contains(CharPropFlags::WRITE),
            write_without_response: props.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: props.contains(CharPropFlags::NOTIFY),
        }
    }

    async fn write(&self, handle: &Characteristic, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral.write(handle, data, write_type).await.map_err(link_error)
    }

    async fn read(&self, handle: &Characteristic) -> Result<Vec<u8>, TransportError> {
        self.peripheral.read(handle).await.map_err(link_error)
    }
}
