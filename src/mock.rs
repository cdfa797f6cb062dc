//! Mock transport and scanner for testing.
//!
//! These implement [`ProbeTransport`], [`TransportFactory`] and
//! [`ProbeScanner`] entirely in memory so sessions, the registry and
//! discovery can be exercised without Bluetooth hardware.
//!
//! # Features
//!
//! - **Failure injection**: make `open`, `close` or battery reads fail
//! - **Latency simulation**: delay `open` to exercise concurrent connects
//! - **Scripted notifications**: push raw frames with [`MockTransport::emit`]
//! - **Link loss**: end the notification stream with [`MockTransport::drop_link`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};

use crate::data::{DeviceDescriptor, MeasurementKind};
use crate::discovery::ProbeScanner;
use crate::error::{Error, Result};
use crate::protocol::measurement_frame;
use crate::transport::{ProbeTransport, RawNotificationStream, TransportFactory};

/// An in-memory probe connection.
///
/// # Example
///
/// ```
/// use probe_link_ble::mock::MockTransport;
/// use probe_link_ble::transport::ProbeTransport;
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     transport.set_battery(64);
///     transport.open().await.unwrap();
///     assert_eq!(transport.read_battery().await.unwrap(), 64);
///     transport.close().await.unwrap();
/// }
/// ```
pub struct MockTransport {
    opened: AtomicBool,
    closed: AtomicBool,
    battery: AtomicU8,
    available: AtomicBool,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
    fail_battery: AtomicBool,
    /// Simulated open latency in milliseconds (0 = no delay).
    open_latency_ms: AtomicU64,
    open_count: AtomicU32,
    close_count: AtomicU32,
    sender: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("opened", &self.is_open())
            .field("closed", &self.is_closed())
            .field("battery", &self.battery.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a closed mock transport with an 85% battery.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded();

        Self {
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            battery: AtomicU8::new(85),
            available: AtomicBool::new(true),
            fail_open: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            fail_battery: AtomicBool::new(false),
            open_latency_ms: AtomicU64::new(0),
            open_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Set the battery level reported by `read_battery`.
    pub fn set_battery(&self, level: u8) {
        self.battery.store(level, Ordering::Relaxed);
    }

    /// Set whether the probe reports itself reachable while open.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Make `open` fail with `ConnectionFailed`.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Relaxed);
    }

    /// Make `close` fail with a transport error. The transport still ends
    /// up closed.
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    /// Make `read_battery` fail with a transport error.
    pub fn set_fail_battery(&self, fail: bool) {
        self.fail_battery.store(fail, Ordering::Relaxed);
    }

    /// Delay every `open` call.
    pub fn set_open_latency(&self, latency: Duration) {
        self.open_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Push a raw frame onto the notification stream.
    ///
    /// Returns `false` if the transport is not open or the link is gone.
    pub fn emit(&self, frame: impl Into<Bytes>) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.sender.lock().as_ref() {
            Some(tx) => tx.unbounded_send(frame.into()).is_ok(),
            None => false,
        }
    }

    /// Push an encoded measurement frame.
    pub fn emit_measurement(&self, kind: MeasurementKind, raw_value: f32, precision: u8) -> bool {
        self.emit(measurement_frame(kind, raw_value, precision))
    }

    /// End the notification stream without closing, as if the probe went
    /// out of range.
    pub fn drop_link(&self) {
        self.available.store(false, Ordering::Relaxed);
        self.sender.lock().take();
    }

    /// Check if `open` succeeded and `close` has not been called.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Check if `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Number of `close` calls that actually closed the transport.
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeTransport for MockTransport {
    async fn open(&self) -> Result<()> {
        self.open_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.open_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.opened.load(Ordering::SeqCst) {
            return Err(Error::InvalidState {
                operation: "open",
                state: "already opened".to_string(),
            });
        }

        if self.fail_open.load(Ordering::Relaxed) {
            return Err(Error::connection_failed("mock open failure"));
        }

        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().take();

        if self.fail_close.load(Ordering::Relaxed) {
            return Err(Error::transport("mock close failure"));
        }
        Ok(())
    }

    async fn read_battery(&self) -> Result<u8> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        if self.fail_battery.load(Ordering::Relaxed) {
            return Err(Error::transport("mock battery read failure"));
        }
        Ok(self.battery.load(Ordering::Relaxed).min(100))
    }

    async fn is_available(&self) -> bool {
        self.is_open() && self.available.load(Ordering::Relaxed)
    }

    async fn raw_notifications(&self) -> Result<RawNotificationStream> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        self.receiver
            .lock()
            .take()
            .map(|rx| rx.boxed())
            .ok_or(Error::InvalidState {
                operation: "raw_notifications",
                state: "stream already taken".to_string(),
            })
    }
}

/// Hands out [`MockTransport`]s keyed by serial number.
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    prepared: Mutex<HashMap<String, Arc<MockTransport>>>,
    created: Mutex<HashMap<String, Vec<Arc<MockTransport>>>>,
    unreachable: RwLock<Vec<String>>,
}

impl MockTransportFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-configure the transport the next `create` for `serial` returns.
    pub fn prepare(&self, serial: &str) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        self.prepared
            .lock()
            .insert(serial.to_string(), transport.clone());
        transport
    }

    /// Make `create` fail for `serial`, as if the device disappeared.
    pub fn set_unreachable(&self, serial: &str) {
        self.unreachable.write().push(serial.to_string());
    }

    /// The most recently created transport for `serial`.
    pub fn transport(&self, serial: &str) -> Option<Arc<MockTransport>> {
        self.created
            .lock()
            .get(serial)
            .and_then(|transports| transports.last().cloned())
    }

    /// Number of transports created for `serial`.
    pub fn created_count(&self, serial: &str) -> usize {
        self.created.lock().get(serial).map(Vec::len).unwrap_or(0)
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn ProbeTransport>> {
        let serial = descriptor.serial_number();

        if self.unreachable.read().iter().any(|s| s == serial) {
            return Err(Error::connection_failed(format!(
                "device {serial} is no longer visible"
            )));
        }

        let transport = self
            .prepared
            .lock()
            .remove(serial)
            .unwrap_or_else(|| Arc::new(MockTransport::new()));

        self.created
            .lock()
            .entry(serial.to_string())
            .or_default()
            .push(transport.clone());

        Ok(transport)
    }
}

/// A scanner that reports a fixed set of advertisements.
///
/// Advertisements are yielded in order, duplicates included, so discovery
/// deduplication can be tested.
#[derive(Debug, Default)]
pub struct MockScanner {
    advertisements: RwLock<Vec<DeviceDescriptor>>,
    unavailable: AtomicBool,
    interval_ms: AtomicU64,
    scan_count: AtomicU32,
}

impl MockScanner {
    /// Create a scanner that will report `advertisements`.
    pub fn new(advertisements: Vec<DeviceDescriptor>) -> Self {
        Self {
            advertisements: RwLock::new(advertisements),
            ..Default::default()
        }
    }

    /// Replace the advertisements reported by future scans.
    pub fn set_advertisements(&self, advertisements: Vec<DeviceDescriptor>) {
        *self.advertisements.write() = advertisements;
    }

    /// Simulate the radio being off or permission being denied.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Delay between advertisements.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of scans started.
    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeScanner for MockScanner {
    async fn start_scan(&self) -> Result<BoxStream<'static, DeviceDescriptor>> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::BluetoothUnavailable);
        }

        self.scan_count.fetch_add(1, Ordering::SeqCst);

        let interval = Duration::from_millis(self.interval_ms.load(Ordering::Relaxed));
        let advertisements = self.advertisements.read().clone();

        Ok(stream::iter(advertisements)
            .then(move |descriptor| async move {
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
                descriptor
            })
            .boxed())
    }
}
