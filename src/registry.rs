//! Session registry.
//!
//! Owns every live [`ProbeSession`], keyed by serial number. There is at
//! most one session per serial; a session that closes is removed.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use futures::future::join_all;

use crate::config::{RegistryConfig, SessionConfig};
use crate::data::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::session::{ProbeSession, SessionEvent};
use crate::transport::TransportFactory;

type SessionMap = Arc<RwLock<BTreeMap<String, Arc<ProbeSession>>>>;

/// Outcome of [`SessionRegistry::disconnect_all`].
#[derive(Debug, Default)]
pub struct DisconnectReport {
    /// One entry per device, ordered by serial number.
    pub results: Vec<(String, Result<()>)>,
}

impl DisconnectReport {
    /// Serial numbers of every device that was disconnected.
    pub fn devices(&self) -> Vec<&str> {
        self.results.iter().map(|(serial, _)| serial.as_str()).collect()
    }

    /// Devices that closed cleanly.
    pub fn succeeded(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(serial, _)| serial.as_str())
            .collect()
    }

    /// Devices whose transport reported an error while closing.
    pub fn failed(&self) -> Vec<(&str, &Error)> {
        self.results
            .iter()
            .filter_map(|(serial, result)| result.as_ref().err().map(|e| (serial.as_str(), e)))
            .collect()
    }

    /// Check if every device closed cleanly.
    pub fn is_clean(&self) -> bool {
        self.results.iter().all(|(_, result)| result.is_ok())
    }

    /// Number of devices in the report.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if no device was disconnected.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Owns the set of active probe sessions.
pub struct SessionRegistry {
    /// Builds transports for new sessions.
    factory: Arc<dyn TransportFactory>,
    /// Active sessions by serial number.
    sessions: SessionMap,
    /// Per-serial locks so concurrent creates connect once. An entry lives
    /// only while a create for that serial is in flight.
    creating: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Creates that passed the capacity check but are not registered yet.
    reserved: Mutex<usize>,
    config: RegistryConfig,
    session_config: SessionConfig,
}

impl SessionRegistry {
    /// Create a registry that builds transports with `factory`.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        config: RegistryConfig,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            factory,
            sessions: Arc::new(RwLock::new(BTreeMap::new())),
            creating: Mutex::new(HashMap::new()),
            reserved: Mutex::new(0),
            config,
            session_config,
        }
    }

    /// Get the session for `descriptor`, connecting a new one if needed.
    ///
    /// If a session for the serial number already exists it is returned
    /// and nothing is connected. Otherwise a new session is created,
    /// connected and registered.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionFailed`] if the device cannot be reached; nothing
    /// is registered in that case. [`Error::MaxSessionsReached`] if the
    /// registry is full.
    pub async fn create_session(&self, descriptor: &DeviceDescriptor) -> Result<Arc<ProbeSession>> {
        let serial = descriptor.serial_number();

        if let Some(existing) = self.live(serial) {
            debug!("Reusing session for probe {}", serial);
            return Ok(existing);
        }

        let creating = CreateLock::acquire(self, serial);
        let _creating = creating.lock.lock().await;

        // Another caller may have connected while we waited.
        if let Some(existing) = self.live(serial) {
            debug!("Reusing session for probe {}", serial);
            return Ok(existing);
        }

        let slot = self.reserve_slot(serial)?;

        let transport = self.factory.create(descriptor)?;
        let session = Arc::new(ProbeSession::new(
            descriptor.clone(),
            transport,
            &self.session_config,
        ));

        let events = session.subscribe_events();
        session.connect().await?;

        slot.commit(session.clone());
        self.watch_session(session.clone(), events);

        info!("Registered session for probe {}", descriptor);
        Ok(session)
    }

    /// The registered session for `serial` if it is still connected.
    ///
    /// Entries that are tearing down or closed are dropped from the map.
    fn live(&self, serial: &str) -> Option<Arc<ProbeSession>> {
        let session = self.sessions.read().get(serial).cloned()?;
        if session.connection_state().is_connected() {
            return Some(session);
        }
        if session.connection_state().is_terminal() {
            Self::remove_if_same(&self.sessions, &session);
        }
        None
    }

    /// Claim capacity for one new session.
    fn reserve_slot(&self, serial: &str) -> Result<SlotReservation<'_>> {
        let mut reserved = self.reserved.lock();
        let registered = self
            .sessions
            .read()
            .values()
            .filter(|s| s.connection_state().is_connected())
            .count();

        if registered + *reserved >= self.config.max_sessions {
            warn!(
                "Maximum session count ({}) reached, refusing probe {}",
                self.config.max_sessions, serial
            );
            return Err(Error::MaxSessionsReached {
                max: self.config.max_sessions,
            });
        }

        *reserved += 1;
        Ok(SlotReservation {
            registry: self,
            held: true,
        })
    }

    /// Drop entries whose session has reached `Disconnected`.
    fn prune(&self) {
        self.sessions
            .write()
            .retain(|_, session| !session.connection_state().is_terminal());
    }

    /// Create sessions for several devices in parallel.
    ///
    /// Returns one result per descriptor, in input order.
    pub async fn create_sessions(
        &self,
        descriptors: &[DeviceDescriptor],
    ) -> Vec<(String, Result<Arc<ProbeSession>>)> {
        let futures = descriptors.iter().map(|descriptor| async move {
            let result = self.create_session(descriptor).await;
            if let Err(ref e) = result {
                warn!("Failed to create session for {}: {}", descriptor, e);
            }
            (descriptor.serial_number().to_string(), result)
        });

        join_all(futures).await
    }

    /// Remove the session from the map once it reports closed.
    fn watch_session(
        &self,
        session: Arc<ProbeSession>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) {
        let sessions = Arc::downgrade(&self.sessions);
        let weak_session = Arc::downgrade(&session);
        drop(session);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_closed() => {
                        if let (Some(sessions), Some(session)) =
                            (sessions.upgrade(), weak_session.upgrade())
                        {
                            Self::remove_if_same(&sessions, &session);
                            debug!("Probe {} closed: {:?}", event.serial_number, event.kind);
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn remove_if_same(sessions: &SessionMap, session: &Arc<ProbeSession>) -> bool {
        let mut sessions = sessions.write();
        let serial = session.serial_number();

        match sessions.get(serial) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(serial);
                true
            }
            _ => false,
        }
    }

    /// Disconnect one device and remove it from the registry.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] if no session exists for the serial, or the
    /// transport's error if closing failed (the session is removed anyway).
    pub async fn disconnect(&self, serial_number: &str) -> Result<()> {
        let session = self.get(serial_number).ok_or_else(|| Error::DeviceNotFound {
            serial_number: serial_number.to_string(),
        })?;

        let result = session.disconnect().await;
        Self::remove_if_same(&self.sessions, &session);
        result
    }

    /// Disconnect every session in parallel and clear the registry.
    ///
    /// A device that fails to close does not stop the others; every device
    /// gets its own entry in the report.
    pub async fn disconnect_all(&self) -> DisconnectReport {
        let sessions = self.all();
        if sessions.is_empty() {
            return DisconnectReport::default();
        }

        info!("Disconnecting {} probe sessions", sessions.len());

        let futures = sessions.iter().map(|(serial, session)| async move {
            let result = session.disconnect().await;
            if let Err(ref e) = result {
                warn!("Error disconnecting probe {}: {}", serial, e);
            }
            (serial.clone(), result)
        });
        let results = join_all(futures).await;

        for (_, session) in &sessions {
            Self::remove_if_same(&self.sessions, session);
        }

        let report = DisconnectReport { results };
        if report.is_clean() {
            info!("Devices {} disconnected", report.devices().join(", "));
        }
        report
    }

    /// Read the battery level of every session in parallel.
    pub async fn battery_levels(&self) -> Vec<(String, Result<u8>)> {
        let sessions = self.all();
        let futures = sessions.iter().map(|(serial, session)| async move {
            (serial.clone(), session.battery_level().await)
        });
        join_all(futures).await
    }

    /// Check availability of every session in parallel.
    pub async fn availability(&self) -> Vec<(String, bool)> {
        let sessions = self.all();
        let futures = sessions.iter().map(|(serial, session)| async move {
            (serial.clone(), session.is_available().await)
        });
        join_all(futures).await
    }

    /// Get the session for a serial number.
    ///
    /// A session that has reached `Disconnected` is never returned.
    pub fn get(&self, serial_number: &str) -> Option<Arc<ProbeSession>> {
        let session = self.sessions.read().get(serial_number).cloned()?;
        if session.connection_state().is_terminal() {
            Self::remove_if_same(&self.sessions, &session);
            return None;
        }
        Some(session)
    }

    /// Snapshot of all sessions, ordered by serial number.
    pub fn all(&self) -> Vec<(String, Arc<ProbeSession>)> {
        self.prune();
        self.sessions
            .read()
            .iter()
            .map(|(serial, session)| (serial.clone(), session.clone()))
            .collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.prune();
        self.sessions.read().len()
    }

    /// Check if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the per-serial create lock; drops the map entry once no other
/// create for the serial is waiting on it.
struct CreateLock<'a> {
    registry: &'a SessionRegistry,
    serial: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> CreateLock<'a> {
    fn acquire(registry: &'a SessionRegistry, serial: &str) -> Self {
        let lock = registry
            .creating
            .lock()
            .entry(serial.to_string())
            .or_default()
            .clone();

        Self {
            registry,
            serial: serial.to_string(),
            lock,
        }
    }
}

impl Drop for CreateLock<'_> {
    fn drop(&mut self) {
        let mut creating = self.registry.creating.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) <= 2 {
            if let Some(current) = creating.get(&self.serial) {
                if Arc::ptr_eq(current, &self.lock) {
                    creating.remove(&self.serial);
                }
            }
        }
    }
}

/// Capacity claimed by an in-flight create. Released on drop unless the
/// session was registered.
struct SlotReservation<'a> {
    registry: &'a SessionRegistry,
    held: bool,
}

impl SlotReservation<'_> {
    fn commit(mut self, session: Arc<ProbeSession>) {
        let mut reserved = self.registry.reserved.lock();
        self.registry
            .sessions
            .write()
            .insert(session.serial_number().to_string(), session);
        *reserved = reserved.saturating_sub(1);
        self.held = false;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut reserved = self.registry.reserved.lock();
            *reserved = reserved.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.read().keys().collect::<Vec<_>>())
            .field("max_sessions", &self.config.max_sessions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ProbeType;
    use crate::mock::MockTransportFactory;
    use crate::session::ConnectionState;
    use crate::transport::MockTransportFactory as AutoMockFactory;
    use std::time::Duration;

    fn registry(factory: Arc<dyn TransportFactory>) -> SessionRegistry {
        SessionRegistry::new(factory, RegistryConfig::default(), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_create_session_is_idempotent() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = registry(factory.clone());
        let descriptor = DeviceDescriptor::new("SN1", ProbeType::MfHandle);

        let first = registry.create_session(&descriptor).await.unwrap();
        let second = registry.create_session(&descriptor).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.created_count("SN1"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_connect_once() {
        let factory = Arc::new(MockTransportFactory::new());
        factory
            .prepare("SN1")
            .set_open_latency(Duration::from_millis(50));
        let registry = registry(factory.clone());
        let descriptor = DeviceDescriptor::new("SN1", ProbeType::MfHandle);

        let results = registry
            .create_sessions(&[descriptor.clone(), descriptor.clone(), descriptor])
            .await;

        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(factory.created_count("SN1"), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_max_sessions() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = SessionRegistry::new(
            factory,
            RegistryConfig { max_sessions: 1 },
            SessionConfig::default(),
        );

        registry
            .create_session(&DeviceDescriptor::new("SN1", ProbeType::MfHandle))
            .await
            .unwrap();
        let err = registry
            .create_session(&DeviceDescriptor::new("SN2", ProbeType::MfHandle))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MaxSessionsReached { max: 1 }));
    }

    #[tokio::test]
    async fn test_stale_descriptor_is_rejected() {
        let mut factory = AutoMockFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(|d| Err(Error::connection_failed(format!("{} not visible", d.serial_number()))));
        let registry = registry(Arc::new(factory));

        let err = registry
            .create_session(&DeviceDescriptor::new("GONE", ProbeType::QsrHandle))
            .await
            .unwrap_err();

        assert!(err.is_connection_error());
        assert!(registry.get("GONE").is_none());
    }

    #[tokio::test]
    async fn test_closed_session_is_removed() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = registry(factory.clone());
        let session = registry
            .create_session(&DeviceDescriptor::new("SN1", ProbeType::MfHandle))
            .await
            .unwrap();

        factory.transport("SN1").unwrap().drop_link();

        for _ in 0..200 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registry.get("SN1").is_none());
        assert!(session.connection_state().is_terminal());

        // A fresh session can be created afterwards.
        let again = registry
            .create_session(&DeviceDescriptor::new("SN1", ProbeType::MfHandle))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&session, &again));
        assert_eq!(factory.created_count("SN1"), 2);
    }

    #[tokio::test]
    async fn test_disconnect_single() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = registry(factory);
        registry
            .create_session(&DeviceDescriptor::new("SN1", ProbeType::MfHandle))
            .await
            .unwrap();

        registry.disconnect("SN1").await.unwrap();
        assert!(registry.is_empty());

        let err = registry.disconnect("SN1").await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_bulk_queries() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.prepare("A").set_battery(50);
        factory.prepare("B").set_battery(90);
        let registry = registry(factory);

        registry
            .create_sessions(&[
                DeviceDescriptor::new("B", ProbeType::MfHandle),
                DeviceDescriptor::new("A", ProbeType::T104IrBt),
            ])
            .await;

        let levels: Vec<_> = registry
            .battery_levels()
            .await
            .into_iter()
            .map(|(serial, level)| (serial, level.unwrap()))
            .collect();
        assert_eq!(levels, vec![("A".to_string(), 50), ("B".to_string(), 90)]);

        let availability = registry.availability().await;
        assert_eq!(
            availability,
            vec![("A".to_string(), true), ("B".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_create_after_session_disconnect_connects_again() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = registry(factory.clone());
        let descriptor = DeviceDescriptor::new("SN1", ProbeType::MfHandle);

        let first = registry.create_session(&descriptor).await.unwrap();
        first.disconnect().await.unwrap();

        assert!(registry.get("SN1").is_none());
        assert!(registry.is_empty());

        let second = registry.create_session(&descriptor).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.connection_state(), ConnectionState::Connected);
        assert_eq!(factory.created_count("SN1"), 2);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_max_sessions_holds_under_parallel_creates() {
        let factory = Arc::new(MockTransportFactory::new());
        for serial in ["A", "B", "C"] {
            factory
                .prepare(serial)
                .set_open_latency(Duration::from_millis(30));
        }
        let registry = SessionRegistry::new(
            factory,
            RegistryConfig { max_sessions: 1 },
            SessionConfig::default(),
        );

        let results = registry
            .create_sessions(&[
                DeviceDescriptor::new("A", ProbeType::MfHandle),
                DeviceDescriptor::new("B", ProbeType::MfHandle),
                DeviceDescriptor::new("C", ProbeType::MfHandle),
            ])
            .await;

        let created = results.iter().filter(|(_, r)| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|(_, r)| matches!(r, Err(Error::MaxSessionsReached { max: 1 })))
            .count();
        assert_eq!(created, 1);
        assert_eq!(refused, 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.reserved.lock(), 0);
    }

    #[tokio::test]
    async fn test_create_lock_released_after_create() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.prepare("SN2").set_fail_open(true);
        let registry = registry(factory);

        registry
            .create_session(&DeviceDescriptor::new("SN1", ProbeType::MfHandle))
            .await
            .unwrap();
        registry
            .create_session(&DeviceDescriptor::new("SN2", ProbeType::MfHandle))
            .await
            .unwrap_err();

        assert!(registry.creating.lock().is_empty());
        assert_eq!(*registry.reserved.lock(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_all_during_create_connects_once() {
        let factory = Arc::new(MockTransportFactory::new());
        factory
            .prepare("SN1")
            .set_open_latency(Duration::from_millis(50));
        let registry = Arc::new(registry(factory.clone()));
        let descriptor = DeviceDescriptor::new("SN1", ProbeType::MfHandle);

        let first = {
            let registry = registry.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { registry.create_session(&descriptor).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = registry.disconnect_all().await;
        assert!(report.is_empty());

        let second = registry.create_session(&descriptor).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created_count("SN1"), 1);
        assert!(registry.creating.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_all_empty() {
        let registry = registry(Arc::new(MockTransportFactory::new()));
        let report = registry.disconnect_all().await;
        assert!(report.is_empty());
        assert!(report.is_clean());
    }
}
