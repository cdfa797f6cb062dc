//! BLE connection to a single probe.
//!
//! [`BleProbeTransport`] implements [`ProbeTransport`] over a `btleplug`
//! peripheral. [`BleTransportFactory`] builds one for any device a
//! [`BleScanner`](crate::ble::BleScanner) has seen.

use async_trait::async_trait;
use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::scanner::PeripheralMap;
use crate::ble::uuids::MEASUREMENT_CHARACTERISTIC_UUID;
use crate::data::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::transport::{ProbeTransport, RawNotificationStream, TransportFactory};

/// A probe connection over Bluetooth Low Energy.
pub struct BleProbeTransport {
    /// The peripheral to manage.
    peripheral: Peripheral,
    /// GATT access.
    handler: CharacteristicHandler,
    opened: AtomicBool,
    closed: AtomicBool,
    notifications_taken: AtomicBool,
    /// Flipped to `true` on close; ends the notification stream.
    close_tx: watch::Sender<bool>,
}

impl BleProbeTransport {
    /// Create an unopened transport for a peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        let (close_tx, _) = watch::channel(false);

        Self {
            handler: CharacteristicHandler::new(peripheral.clone()),
            peripheral,
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            notifications_taken: AtomicBool::new(false),
            close_tx,
        }
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Get the characteristic handler.
    pub fn characteristics(&self) -> &CharacteristicHandler {
        &self.handler
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn establish(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
        } else {
            self.peripheral
                .connect()
                .await
                .map_err(|e| Error::connection_failed(e.to_string()))?;
        }

        self.peripheral
            .discover_services()
            .await
            .map_err(|e| Error::connection_failed(format!("Service discovery failed: {}", e)))?;

        self.handler.discover_characteristics();

        if !self.handler.has_characteristic(&MEASUREMENT_CHARACTERISTIC_UUID) {
            return Err(Error::connection_failed(
                "Device does not expose the measurement characteristic",
            ));
        }

        self.handler
            .subscribe_measurements()
            .await
            .map_err(|e| Error::connection_failed(format!("Subscribe failed: {}", e)))
    }
}

/// Resolves once `rx` observes `true` or its sender is gone.
fn closed_signal(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

#[async_trait]
impl ProbeTransport for BleProbeTransport {
    async fn open(&self) -> Result<()> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState {
                operation: "open",
                state: "already opened".to_string(),
            });
        }

        match self.establish().await {
            Ok(()) => {
                info!("Successfully connected to probe");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open probe connection: {}", e);
                self.closed.store(true, Ordering::SeqCst);
                if let Err(e) = self.peripheral.disconnect().await {
                    debug!("Disconnect after failed open: {}", e);
                }
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.close_tx.send_replace(true);

        if !self.opened.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.handler.unsubscribe(&MEASUREMENT_CHARACTERISTIC_UUID).await {
            debug!("Unsubscribe on close: {}", e);
        }

        self.peripheral.disconnect().await.map_err(Error::Bluetooth)?;
        info!("Successfully disconnected from probe");
        Ok(())
    }

    async fn read_battery(&self) -> Result<u8> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        self.handler.read_battery_level().await
    }

    async fn is_available(&self) -> bool {
        self.is_open() && self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn raw_notifications(&self) -> Result<RawNotificationStream> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        if self.notifications_taken.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState {
                operation: "raw_notifications",
                state: "stream already taken".to_string(),
            });
        }

        let notifications = self
            .handler
            .notifications_for(MEASUREMENT_CHARACTERISTIC_UUID)
            .await?;

        Ok(notifications
            .take_until(closed_signal(self.close_tx.subscribe()))
            .boxed())
    }
}

/// Builds [`BleProbeTransport`]s for devices a scanner has seen.
#[derive(Clone)]
pub struct BleTransportFactory {
    peripherals: PeripheralMap,
}

impl BleTransportFactory {
    pub(crate) fn new(peripherals: PeripheralMap) -> Self {
        Self { peripherals }
    }
}

impl TransportFactory for BleTransportFactory {
    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn ProbeTransport>> {
        let peripheral = self
            .peripherals
            .read()
            .get(descriptor.serial_number())
            .cloned()
            .ok_or_else(|| {
                Error::connection_failed(format!(
                    "Device {} has not been seen by a scan",
                    descriptor.serial_number()
                ))
            })?;

        Ok(Arc::new(BleProbeTransport::new(peripheral)))
    }
}
