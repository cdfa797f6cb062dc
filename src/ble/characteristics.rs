//! GATT characteristic handling.
//!
//! Provides reading and subscribing to the characteristics a probe
//! exposes.

use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// Handler for GATT characteristics on a probe.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: Arc<RwLock<HashMap<Uuid, Characteristic>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Discover and cache the characteristics of the battery and
    /// measurement services. Returns how many were found.
    ///
    /// This should be called after connecting and discovering services.
    pub fn discover_characteristics(&self) -> usize {
        let services = self.peripheral.services();

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in services.into_iter().filter(|s| is_probe_service(&s.uuid)) {
            for characteristic in service.characteristics {
                trace!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid,
                    service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());
        chars.len()
    }

    /// Check if a characteristic exists.
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.read().contains_key(uuid)
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Read a characteristic value.
    pub async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(uuid)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Read {} bytes from characteristic {}", data.len(), uuid);

        Ok(data)
    }

    /// Subscribe to notifications from a characteristic.
    pub async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;

        debug!(
            "Subscribing to {}, properties: {:?}",
            uuid, characteristic.properties
        );

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        Ok(())
    }

    /// Unsubscribe from notifications from a characteristic.
    pub async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;

        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Unsubscribed from notifications from {}", uuid);

        Ok(())
    }

    /// Notifications from a single characteristic, as raw frames.
    pub async fn notifications_for(&self, uuid: Uuid) -> Result<BoxStream<'static, Bytes>> {
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        Ok(notifications
            .filter(move |n| future::ready(n.uuid == uuid))
            .map(|n| {
                trace!("Notification: {} bytes, data: {:02X?}", n.value.len(), n.value);
                Bytes::from(n.value)
            })
            .boxed())
    }

    /// Read the battery level in percent.
    pub async fn read_battery_level(&self) -> Result<u8> {
        let data = self.read(&BATTERY_LEVEL_UUID).await?;
        parse_battery_level(&data)
    }

    /// Subscribe to measurement notifications.
    pub async fn subscribe_measurements(&self) -> Result<()> {
        self.subscribe(&MEASUREMENT_CHARACTERISTIC_UUID).await
    }
}

/// Decode a Battery Level characteristic value.
pub(crate) fn parse_battery_level(data: &[u8]) -> Result<u8> {
    data.first()
        .map(|level| (*level).min(100))
        .ok_or_else(|| Error::transport("Empty battery level value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_battery_level() {
        assert_eq!(parse_battery_level(&[85]).unwrap(), 85);
        assert_eq!(parse_battery_level(&[100, 0]).unwrap(), 100);
        assert_eq!(parse_battery_level(&[0xFF]).unwrap(), 100);
        assert!(parse_battery_level(&[]).unwrap_err().is_transport_error());
    }
}
