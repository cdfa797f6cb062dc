//! Probe discovery.
//!
//! [`DiscoveryService`] runs scans on a [`ProbeScanner`], deduplicates the
//! advertisements by serial number and keeps a snapshot of what the last
//! scan saw.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::data::DeviceDescriptor;
use crate::error::Result;
use crate::session::CallbackHandle;

/// Source of probe advertisements.
#[async_trait]
pub trait ProbeScanner: Send + Sync {
    /// Start a radio scan and return every probe advertisement seen, in
    /// arrival order and possibly repeated. Dropping the stream stops the
    /// scan.
    ///
    /// # Errors
    ///
    /// [`Error::BluetoothUnavailable`](crate::Error::BluetoothUnavailable)
    /// when the radio is off or permission was denied.
    async fn start_scan(&self) -> Result<BoxStream<'static, DeviceDescriptor>>;
}

/// Scans for probes and tracks which ones are visible.
pub struct DiscoveryService {
    scanner: Arc<dyn ProbeScanner>,
    /// Devices seen by the most recent scan, in discovery order.
    visible: Arc<RwLock<Vec<DeviceDescriptor>>>,
    /// Newly seen devices.
    discovered_tx: broadcast::Sender<DeviceDescriptor>,
    config: DiscoveryConfig,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl DiscoveryService {
    /// Create a discovery service on top of `scanner`.
    pub fn new(scanner: Arc<dyn ProbeScanner>, config: DiscoveryConfig) -> Self {
        let (discovered_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            scanner,
            visible: Arc::new(RwLock::new(Vec::new())),
            discovered_tx,
            config,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Scan for `duration` and yield each probe once.
    ///
    /// The scan is lazy: the radio is not touched until the stream is first
    /// polled. Every call starts a new scan session with its own
    /// deduplication, and the first poll resets the visible-device
    /// snapshot. If the radio is unavailable the stream is empty.
    pub fn scan(&self, duration: Duration) -> BoxStream<'static, DeviceDescriptor> {
        let scanner = self.scanner.clone();
        let visible = self.visible.clone();
        let discovered_tx = self.discovered_tx.clone();

        stream::once(async move {
            // The scan window starts on first poll.
            let deadline = tokio::time::sleep(duration);
            visible.write().clear();

            let advertisements = match scanner.start_scan().await {
                Ok(advertisements) => {
                    info!("Scanning for probes for {:?}", duration);
                    advertisements
                }
                Err(e) => {
                    warn!("Probe scan unavailable: {}", e);
                    stream::empty().boxed()
                }
            };

            let mut seen = HashSet::new();
            advertisements
                .filter(move |descriptor| {
                    future::ready(seen.insert(descriptor.serial_number().to_string()))
                })
                .inspect(move |descriptor| {
                    debug!("Discovered probe {}", descriptor);
                    visible.write().push(descriptor.clone());
                    let _ = discovered_tx.send(descriptor.clone());
                })
                .take_until(deadline)
        })
        .flatten()
        .boxed()
    }

    /// Scan for the configured default duration.
    pub fn scan_default(&self) -> BoxStream<'static, DeviceDescriptor> {
        self.scan(self.config.default_scan_duration)
    }

    /// Run a scan to completion and return what it found.
    pub async fn collect_scan(&self, duration: Duration) -> Vec<DeviceDescriptor> {
        self.scan(duration).collect().await
    }

    /// Snapshot of the devices the last scan saw, in discovery order.
    pub fn list_visible(&self) -> Vec<DeviceDescriptor> {
        self.visible.read().clone()
    }

    /// Look up a visible device by serial number.
    pub fn find_visible(&self, serial_number: &str) -> Option<DeviceDescriptor> {
        self.visible
            .read()
            .iter()
            .find(|d| d.serial_number() == serial_number)
            .cloned()
    }

    /// Subscribe to newly discovered devices.
    pub fn subscribe_discovered(&self) -> broadcast::Receiver<DeviceDescriptor> {
        self.discovered_tx.subscribe()
    }

    /// Register a callback for newly discovered devices.
    pub fn on_probe_discovered<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DeviceDescriptor) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.discovered_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(descriptor) = rx.recv().await {
                callback(&descriptor);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}
