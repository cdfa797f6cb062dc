//! Transport abstraction for a single probe connection.
//!
//! A [`ProbeTransport`] is the capability a session drives: open, close,
//! battery, availability and the raw notification stream. The BLE
//! implementation lives in [`crate::ble`], the in-memory one in
//! [`crate::mock`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::data::DeviceDescriptor;
use crate::error::Result;

/// Stream of raw notification frames from an open transport.
///
/// Ends when the transport is closed, or early if the link is lost.
pub type RawNotificationStream = BoxStream<'static, Bytes>;

/// One physical probe connection.
///
/// Implementations must allow exactly one successful `open` per instance
/// and hand out the notification stream at most once.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Open the connection.
    ///
    /// Fails with [`Error::ConnectionFailed`](crate::Error::ConnectionFailed)
    /// when the probe cannot be reached, or
    /// [`Error::InvalidState`](crate::Error::InvalidState) if `open` has
    /// already succeeded once.
    async fn open(&self) -> Result<()>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    /// Read the battery level in percent (0-100).
    async fn read_battery(&self) -> Result<u8>;

    /// Check whether the probe is reachable. Returns `false` once closed.
    async fn is_available(&self) -> bool;

    /// Take the raw notification stream. Only valid after `open`, and only
    /// once.
    async fn raw_notifications(&self) -> Result<RawNotificationStream>;
}

/// Builds a transport for a descriptor.
///
/// This is where a stale descriptor is caught: factories return
/// [`Error::ConnectionFailed`](crate::Error::ConnectionFailed) for devices
/// they can no longer reach.
#[cfg_attr(test, mockall::automock)]
pub trait TransportFactory: Send + Sync {
    /// Create a fresh, unopened transport for `descriptor`.
    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn ProbeTransport>>;
}
