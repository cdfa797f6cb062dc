//! Probe session.
//!
//! A [`ProbeSession`] owns one connected probe: it drives the transport,
//! runs a single worker that decodes the raw notification stream, and fans
//! decoded samples out to the callbacks subscribed for each measurement
//! kind.

pub mod state;
pub mod subscriptions;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::data::{BatteryReading, DeviceDescriptor, MeasurementKind, MeasurementSample};
use crate::error::{Error, Result};
use crate::protocol::decode;
use crate::transport::{ProbeTransport, RawNotificationStream};

pub use state::ConnectionState;
pub use subscriptions::{MeasurementCallback, SubscriptionId};

use subscriptions::SubscriptionTable;

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Why a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CloseReason {
    /// `disconnect` was called, or the session was dropped.
    Requested,
    /// The notification stream ended without the session closing it.
    LinkLost,
}

/// What happened to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionEventKind {
    /// The session reached `Connected`.
    Connected,
    /// The session reached `Disconnected`.
    Closed(CloseReason),
}

/// Out-of-band lifecycle event emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionEvent {
    /// Serial number of the probe.
    pub serial_number: String,
    /// What happened.
    pub kind: SessionEventKind,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl SessionEvent {
    /// Check if this event reports the session closing.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, SessionEventKind::Closed(_))
    }
}

/// State shared between a session and its worker.
struct Shared {
    descriptor: DeviceDescriptor,
    transport: Arc<dyn ProbeTransport>,
    state: RwLock<ConnectionState>,
    subscriptions: RwLock<SubscriptionTable>,
    battery: RwLock<Option<BatteryReading>>,
    /// Cleared as soon as teardown starts; checked before every callback.
    delivering: AtomicBool,
    /// Set when `disconnect` is called from inside a callback.
    close_after_dispatch: AtomicBool,
    /// Thread currently running callbacks.
    dispatch_thread: Mutex<Option<ThreadId>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn serial(&self) -> &str {
        self.descriptor.serial_number()
    }

    /// Apply a state transition if it is legal. Returns whether it was applied.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write();
        let current = *state;

        if !current.can_transition_to(next) {
            trace!(
                "Ignoring {} -> {} for probe {}",
                current,
                next,
                self.serial()
            );
            return false;
        }

        *state = next;
        debug!(
            "Probe {} state changed: {} -> {}",
            self.serial(),
            current,
            next
        );
        true
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.event_tx.send(SessionEvent {
            serial_number: self.serial().to_string(),
            kind,
            at: Utc::now(),
        });
    }

    /// Decode one raw frame and deliver it to the subscribed callbacks.
    fn dispatch(&self, raw: &[u8]) {
        let Some(sample) = decode(self.descriptor.probe_type(), raw) else {
            return;
        };

        let callbacks = self.subscriptions.read().callbacks_for(sample.kind);
        if callbacks.is_empty() {
            trace!("No subscribers for {} on probe {}", sample.kind, self.serial());
            return;
        }

        *self.dispatch_thread.lock() = Some(std::thread::current().id());

        for (id, callback) in callbacks {
            if !self.delivering.load(Ordering::SeqCst) {
                break;
            }
            // A previous callback may have unsubscribed this one.
            if !self.subscriptions.read().contains(sample.kind, id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(&sample))).is_err() {
                error!(
                    "Subscriber {} for {} on probe {} panicked",
                    id.id(),
                    sample.kind,
                    self.serial()
                );
            }
        }

        *self.dispatch_thread.lock() = None;
    }

    fn is_dispatching_on_current_thread(&self) -> bool {
        *self.dispatch_thread.lock() == Some(std::thread::current().id())
    }

    /// Tear down from the worker side. Does nothing if another caller
    /// already moved the session out of `Connected`.
    async fn close_from_worker(&self, reason: CloseReason) {
        if !self.transition(ConnectionState::Disconnecting) {
            return;
        }

        match reason {
            CloseReason::LinkLost => warn!("Lost link to probe {}", self.serial()),
            CloseReason::Requested => info!("Closing probe {}", self.serial()),
        }

        self.delivering.store(false, Ordering::SeqCst);

        if let Err(e) = self.transport.close().await {
            warn!("Error closing transport for probe {}: {}", self.serial(), e);
        }

        self.finish(reason);
    }

    fn finish(&self, reason: CloseReason) {
        self.subscriptions.write().clear();
        self.transition(ConnectionState::Disconnected);
        self.emit(SessionEventKind::Closed(reason));
    }
}

/// A live connection to one probe.
pub struct ProbeSession {
    shared: Arc<Shared>,
    /// Signals the worker to stop.
    shutdown_tx: watch::Sender<bool>,
    /// Notification worker, present while connected.
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Serializes `connect` and `disconnect`.
    lifecycle: tokio::sync::Mutex<()>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl ProbeSession {
    /// Create a session in the `Connecting` state. Nothing is opened until
    /// [`connect`](Self::connect) is called.
    pub fn new(
        descriptor: DeviceDescriptor,
        transport: Arc<dyn ProbeTransport>,
        config: &SessionConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                descriptor,
                transport,
                state: RwLock::new(ConnectionState::Connecting),
                subscriptions: RwLock::new(SubscriptionTable::default()),
                battery: RwLock::new(None),
                delivering: AtomicBool::new(false),
                close_after_dispatch: AtomicBool::new(false),
                dispatch_thread: Mutex::new(None),
                event_tx,
            }),
            shutdown_tx,
            worker: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            callback_counter: AtomicU64::new(0),
        }
    }

    // === Identification ===

    /// Get the descriptor this session was created for.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.shared.descriptor
    }

    /// Get the serial number.
    pub fn serial_number(&self) -> &str {
        self.shared.serial()
    }

    // === Connection ===

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Open the transport and start delivering notifications.
    ///
    /// On failure the session moves to `Disconnected` and cannot be reused.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionFailed`] if the transport cannot be opened, or
    /// [`Error::InvalidState`] if the session is not `Connecting`.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let state = self.connection_state();
        if state != ConnectionState::Connecting {
            return Err(Error::invalid_state("connect", state));
        }

        info!("Connecting to probe {}", self.shared.descriptor);

        if let Err(e) = self.shared.transport.open().await {
            warn!("Failed to connect to probe {}: {}", self.serial_number(), e);
            self.shared.transition(ConnectionState::Disconnected);
            return Err(if e.is_connection_error() {
                e
            } else {
                Error::connection_failed(e.to_string())
            });
        }

        let stream = match self.shared.transport.raw_notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "No notification stream for probe {}: {}",
                    self.serial_number(),
                    e
                );
                if let Err(e) = self.shared.transport.close().await {
                    debug!("Error closing transport after failed connect: {}", e);
                }
                self.shared.transition(ConnectionState::Disconnected);
                return Err(Error::connection_failed(format!(
                    "notification stream unavailable: {e}"
                )));
            }
        };

        self.shared.delivering.store(true, Ordering::SeqCst);
        self.shared.transition(ConnectionState::Connected);

        let handle = tokio::spawn(Self::run_worker(
            self.shared.clone(),
            stream,
            self.shutdown_tx.subscribe(),
        ));
        *self.worker.lock() = Some(handle);

        info!("Connected to probe {}", self.serial_number());
        self.shared.emit(SessionEventKind::Connected);

        Ok(())
    }

    /// Consume the notification stream until shutdown or link loss.
    async fn run_worker(
        shared: Arc<Shared>,
        mut stream: RawNotificationStream,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!("Notification worker started for probe {}", shared.serial());

        let mut close_reason = None;

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // The session was dropped without disconnecting.
                        close_reason = Some(CloseReason::Requested);
                    }
                    break;
                }
                frame = stream.next() => match frame {
                    Some(raw) => {
                        trace!("Frame from probe {}: {:02X?}", shared.serial(), &raw[..]);
                        shared.dispatch(&raw);
                        if shared.close_after_dispatch.load(Ordering::SeqCst) {
                            close_reason = Some(CloseReason::Requested);
                            break;
                        }
                    }
                    None => {
                        if shared.delivering.load(Ordering::SeqCst) {
                            close_reason = Some(CloseReason::LinkLost);
                        }
                        break;
                    }
                },
            }
        }

        if let Some(reason) = close_reason {
            shared.close_from_worker(reason).await;
        }

        debug!("Notification worker stopped for probe {}", shared.serial());
    }

    /// Stop delivery, close the transport and move to `Disconnected`.
    ///
    /// Idempotent. When this returns, no callback is running and none will
    /// run again. The session ends `Disconnected` even if closing the
    /// transport fails; the error is still returned.
    ///
    /// Called from inside a subscriber callback, delivery stops immediately
    /// and the transport is closed as soon as the callback returns.
    ///
    /// # Errors
    ///
    /// The transport's error if closing it failed, or
    /// [`Error::InvalidState`] while a connect is in progress.
    pub async fn disconnect(&self) -> Result<()> {
        if self.shared.is_dispatching_on_current_thread() {
            debug!(
                "Disconnect requested from a callback on probe {}",
                self.serial_number()
            );
            self.shared.delivering.store(false, Ordering::SeqCst);
            self.shared.close_after_dispatch.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let _lifecycle = self.lifecycle.lock().await;

        let requested = match self.connection_state() {
            ConnectionState::Disconnected => return Ok(()),
            ConnectionState::Connecting => {
                return Err(Error::invalid_state("disconnect", ConnectionState::Connecting))
            }
            // Teardown already started by the worker.
            ConnectionState::Disconnecting => false,
            ConnectionState::Connected => self.shared.transition(ConnectionState::Disconnecting),
        };

        if requested {
            info!("Disconnecting from probe {}", self.serial_number());
        }

        self.shared.delivering.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                error!(
                    "Notification worker for probe {} failed: {}",
                    self.serial_number(),
                    e
                );
            }
        }

        if !requested {
            return Ok(());
        }

        let result = self.shared.transport.close().await;
        if let Err(ref e) = result {
            warn!(
                "Error closing transport for probe {}: {}",
                self.serial_number(),
                e
            );
        }

        self.shared.finish(CloseReason::Requested);
        info!("Disconnected from probe {}", self.serial_number());

        result
    }

    /// Check if the probe is reachable. Always `false` unless connected.
    pub async fn is_available(&self) -> bool {
        if !self.connection_state().is_connected() {
            return false;
        }
        self.shared.transport.is_available().await
    }

    // === Battery ===

    /// Read the battery level in percent.
    ///
    /// While connected this reads from the probe and caches the value.
    /// Otherwise the last successfully read value is returned.
    ///
    /// # Errors
    ///
    /// The transport's error if a live read fails, or
    /// [`Error::NotConnected`] when not connected and nothing was ever read.
    pub async fn battery_level(&self) -> Result<u8> {
        if self.connection_state().is_connected() {
            let level = self.shared.transport.read_battery().await?;
            let reading = BatteryReading::now(level);
            *self.shared.battery.write() = Some(reading);
            debug!("Probe {} battery: {}%", self.serial_number(), reading.level);
            return Ok(reading.level);
        }

        self.last_battery_reading()
            .map(|reading| reading.level)
            .ok_or(Error::NotConnected)
    }

    /// Get the last battery level successfully read, if any.
    pub fn last_battery_reading(&self) -> Option<BatteryReading> {
        *self.shared.battery.read()
    }

    // === Measurements ===

    /// Register `callback` for every future sample of `kind`.
    ///
    /// Callbacks for one kind run in registration order on the session's
    /// worker and must not block. They stay registered until
    /// [`unsubscribe`](Self::unsubscribe) or disconnect.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] unless the session is `Connected`.
    pub fn subscribe<F>(&self, kind: MeasurementKind, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&MeasurementSample) + Send + Sync + 'static,
    {
        let state = self.shared.state.read();
        if !state.is_connected() {
            return Err(Error::invalid_state("subscribe", *state));
        }

        if !self.shared.descriptor.probe_type().supports(kind) {
            debug!(
                "Probe {} ({}) never reports {}",
                self.serial_number(),
                self.shared.descriptor.probe_type(),
                kind
            );
        }

        let id = self
            .shared
            .subscriptions
            .write()
            .insert(kind, Arc::new(callback));
        debug!(
            "Subscribed {} to {} on probe {}",
            id.id(),
            kind,
            self.serial_number()
        );

        Ok(id)
    }

    /// Remove a registration. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, kind: MeasurementKind, id: SubscriptionId) -> bool {
        let removed = self.shared.subscriptions.write().remove(kind, id);
        if removed {
            debug!(
                "Unsubscribed {} from {} on probe {}",
                id.id(),
                kind,
                self.serial_number()
            );
        }
        removed
    }

    /// Number of callbacks registered for `kind`.
    pub fn subscription_count(&self, kind: MeasurementKind) -> usize {
        self.shared.subscriptions.read().len(kind)
    }

    // === Events ===

    /// Subscribe to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Register a callback for when the session closes.
    pub fn on_closed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.shared.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if event.is_closed() {
                    callback(&event);
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

impl std::fmt::Debug for ProbeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSession")
            .field("descriptor", &self.shared.descriptor)
            .field("connection_state", &self.connection_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ProbeType;
    use crate::mock::MockTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn session_with(probe_type: ProbeType) -> (Arc<ProbeSession>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let session = Arc::new(ProbeSession::new(
            DeviceDescriptor::new("SN1", probe_type),
            transport.clone(),
            &SessionConfig::default(),
        ));
        (session, transport)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        assert_eq!(session.connection_state(), ConnectionState::Connecting);

        assert_ok!(session.connect().await);
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert!(session.is_available().await);

        assert_ok!(session.disconnect().await);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(transport.is_closed());
        assert!(!session.is_available().await);

        // Idempotent
        assert_ok!(session.disconnect().await);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_moves_to_disconnected() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        transport.set_fail_open(true);

        let err = session.connect().await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        let err = session.connect().await.unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_subscribe_requires_connected() {
        let (session, _transport) = session_with(ProbeType::MfHandle);

        let err = session
            .subscribe(MeasurementKind::Temperature, |_| {})
            .unwrap_err();
        assert!(err.is_invalid_state());

        session.connect().await.unwrap();
        assert_ok!(session.subscribe(MeasurementKind::Temperature, |_| {}));

        session.disconnect().await.unwrap();
        assert_err!(session.subscribe(MeasurementKind::Temperature, |_| {}));
    }

    #[tokio::test]
    async fn test_samples_reach_subscribers_in_order() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let log = log.clone();
            session
                .subscribe(MeasurementKind::Temperature, move |sample| {
                    log.lock().push((tag, sample.raw_value));
                })
                .unwrap();
        }

        for value in [290.0, 300.0, 310.0] {
            assert!(transport.emit_measurement(MeasurementKind::Temperature, value, 1));
        }

        wait_for(|| log.lock().len() == 6).await;
        assert_eq!(
            *log.lock(),
            vec![
                ("a", 290.0),
                ("b", 290.0),
                ("a", 300.0),
                ("b", 300.0),
                ("a", 310.0),
                ("b", 310.0),
            ]
        );

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (session, transport) = session_with(ProbeType::QsrHandle);
        session.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = session
            .subscribe(MeasurementKind::Temperature, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        transport.emit_measurement(MeasurementKind::Temperature, 300.0, 1);
        wait_for(|| count.load(Ordering::SeqCst) == 1).await;

        assert!(session.unsubscribe(MeasurementKind::Temperature, id));
        assert!(!session.unsubscribe(MeasurementKind::Temperature, id));
        assert_eq!(session.subscription_count(MeasurementKind::Temperature), 0);

        transport.emit_measurement(MeasurementKind::Temperature, 301.0, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_callbacks_after_disconnect() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        session
            .subscribe(MeasurementKind::Temperature, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        for _ in 0..100 {
            transport.emit_measurement(MeasurementKind::Temperature, 300.0, 1);
        }

        session.disconnect().await.unwrap();
        let after_disconnect = count.load(Ordering::SeqCst);

        assert!(!transport.emit_measurement(MeasurementKind::Temperature, 300.0, 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_disconnect);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_delivery() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        session
            .subscribe(MeasurementKind::Temperature, |_| panic!("subscriber bug"))
            .unwrap();
        session
            .subscribe(MeasurementKind::Temperature, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        transport.emit_measurement(MeasurementKind::Temperature, 300.0, 1);
        transport.emit_measurement(MeasurementKind::Temperature, 301.0, 1);
        wait_for(|| count.load(Ordering::SeqCst) == 2).await;

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_callback_can_disconnect_session() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();

        let weak = Arc::downgrade(&session);
        session
            .subscribe(MeasurementKind::Temperature, move |_| {
                if let Some(session) = weak.upgrade() {
                    tokio::spawn(async move {
                        session.disconnect().await.unwrap();
                    });
                }
            })
            .unwrap();

        transport.emit_measurement(MeasurementKind::Temperature, 300.0, 1);
        wait_for(|| session.connection_state() == ConnectionState::Disconnected).await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_reentrant_disconnect_does_not_deadlock() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();

        let weak = Arc::downgrade(&session);
        session
            .subscribe(MeasurementKind::Temperature, move |_| {
                if let Some(session) = weak.upgrade() {
                    futures::executor::block_on(session.disconnect()).unwrap();
                }
            })
            .unwrap();

        let mut events = session.subscribe_events();
        transport.emit_measurement(MeasurementKind::Temperature, 300.0, 1);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("session did not close")
            .unwrap();
        assert_eq!(event.kind, SessionEventKind::Closed(CloseReason::Requested));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_link_loss_closes_session() {
        let (session, transport) = session_with(ProbeType::T104IrBt);
        session.connect().await.unwrap();
        let mut events = session.subscribe_events();

        transport.drop_link();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("no close event")
            .unwrap();
        assert_eq!(event.kind, SessionEventKind::Closed(CloseReason::LinkLost));
        assert_eq!(event.serial_number, "SN1");
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        assert_ok!(session.disconnect().await);
    }

    #[tokio::test]
    async fn test_battery_cached_after_disconnect() {
        let (session, transport) = session_with(ProbeType::MfHandle);

        assert!(matches!(
            session.battery_level().await,
            Err(Error::NotConnected)
        ));

        session.connect().await.unwrap();
        transport.set_battery(77);
        assert_eq!(session.battery_level().await.unwrap(), 77);

        session.disconnect().await.unwrap();
        transport.set_battery(12);
        assert_eq!(session.battery_level().await.unwrap(), 77);
        assert_eq!(session.last_battery_reading().unwrap().level, 77);
    }

    #[tokio::test]
    async fn test_battery_error_keeps_session_connected() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();

        transport.set_fail_battery(true);
        let err = session.battery_level().await.unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(session.connection_state(), ConnectionState::Connected);

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_failure_still_disconnects() {
        let (session, transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();
        transport.set_fail_close(true);

        let err = session.disconnect().await.unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_on_closed_callback() {
        let (session, _transport) = session_with(ProbeType::MfHandle);
        session.connect().await.unwrap();

        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        let _handle = session.on_closed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        session.disconnect().await.unwrap();
        wait_for(|| closed.load(Ordering::SeqCst) == 1).await;
    }
}
