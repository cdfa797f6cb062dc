//! BLE scanning functionality.
//!
//! Provides the [`ProbeScanner`] that discovers probes over the radio.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::ble::advertising::ProbeAdvertisement;
use crate::ble::connection::BleTransportFactory;
use crate::data::DeviceDescriptor;
use crate::discovery::ProbeScanner;
use crate::error::{Error, Result};

/// Peripheral handles by serial number.
pub(crate) type PeripheralMap = Arc<RwLock<HashMap<String, Peripheral>>>;

/// BLE scanner for discovering probes.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Last seen peripheral for each serial number.
    peripherals: PeripheralMap,
}

impl BleScanner {
    /// Create a new BLE scanner on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// A transport factory for the devices this scanner sees.
    pub fn transport_factory(&self) -> BleTransportFactory {
        BleTransportFactory::new(self.peripherals.clone())
    }

    /// Serial numbers of every probe seen since the scanner was created.
    pub fn known_serials(&self) -> Vec<String> {
        let mut serials: Vec<_> = self.peripherals.read().keys().cloned().collect();
        serials.sort();
        serials
    }

    /// Resolve a central event to a probe advertisement.
    async fn process_event(
        adapter: &Adapter,
        event: CentralEvent,
        peripherals: &PeripheralMap,
    ) -> Option<DeviceDescriptor> {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => return None,
        };

        let (advertisement, peripheral) = Self::process_peripheral(adapter, id).await?;
        trace!(
            "Probe advertisement {} from {} (rssi {:?})",
            advertisement.descriptor,
            advertisement.identifier,
            advertisement.rssi
        );

        peripherals
            .write()
            .insert(advertisement.serial_number().to_string(), peripheral);

        Some(advertisement.descriptor)
    }

    /// Process a discovered peripheral.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
    ) -> Option<(ProbeAdvertisement, Peripheral)> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let advertisement = ProbeAdvertisement::from_properties(id.to_string(), &properties)?;
        Some((advertisement, peripheral))
    }
}

/// Stops the radio scan when dropped.
struct ScanGuard {
    adapter: Adapter,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let adapter = self.adapter.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match adapter.stop_scan().await {
                        Ok(()) => debug!("BLE scan stopped"),
                        Err(e) => warn!("Failed to stop BLE scan: {}", e),
                    }
                });
            }
            Err(_) => warn!("No runtime to stop BLE scan on"),
        }
    }
}

#[async_trait]
impl ProbeScanner for BleScanner {
    async fn start_scan(&self) -> Result<BoxStream<'static, DeviceDescriptor>> {
        let events = self.adapter.events().await.map_err(|e| {
            warn!("Failed to get adapter events: {}", e);
            Error::BluetoothUnavailable
        })?;

        info!("Starting BLE scan for probes");

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| {
                warn!("Failed to start BLE scan: {}", e);
                Error::BluetoothUnavailable
            })?;

        let guard = ScanGuard {
            adapter: self.adapter.clone(),
        };
        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();

        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                let peripherals = peripherals.clone();
                async move { Self::process_event(&adapter, event, &peripherals).await }
            })
            .map(move |descriptor| {
                let _scan = &guard;
                descriptor
            })
            .boxed())
    }
}
