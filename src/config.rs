//! Runtime configuration.
//!
//! All settings have working defaults; use the `with_*` builders to tune
//! them.
//!
//! ```
//! use probe_link_ble::config::ProbeLinkConfig;
//! use std::time::Duration;
//!
//! let config = ProbeLinkConfig::default()
//!     .with_max_sessions(4)
//!     .with_scan_duration(Duration::from_secs(10));
//! assert_eq!(config.registry.max_sessions, 4);
//! ```

use std::time::Duration;

/// Maximum number of sessions a registry manages by default.
pub const MAX_SESSIONS: usize = 8;

/// Default length of a discovery scan.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// Settings for a single probe session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Capacity of the session event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { event_capacity: 16 }
    }
}

/// Settings for the session registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistryConfig {
    /// Maximum number of concurrently registered sessions.
    pub max_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSIONS,
        }
    }
}

/// Settings for the discovery service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryConfig {
    /// Scan length used by [`DiscoveryService::scan_default`](crate::DiscoveryService::scan_default).
    pub default_scan_duration: Duration,
    /// Capacity of the discovery broadcast channel.
    pub event_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_scan_duration: DEFAULT_SCAN_DURATION,
            event_capacity: 32,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProbeLinkConfig {
    /// Registry settings.
    pub registry: RegistryConfig,
    /// Per-session settings.
    pub session: SessionConfig,
    /// Discovery settings.
    pub discovery: DiscoveryConfig,
}

impl ProbeLinkConfig {
    /// Set the maximum number of sessions.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.registry.max_sessions = max_sessions;
        self
    }

    /// Set the default scan duration.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.discovery.default_scan_duration = duration;
        self
    }

    /// Set the session event channel capacity. Values below 1 are raised to 1.
    pub fn with_session_event_capacity(mut self, capacity: usize) -> Self {
        self.session.event_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProbeLinkConfig::default();
        assert_eq!(config.registry.max_sessions, MAX_SESSIONS);
        assert_eq!(config.discovery.default_scan_duration, DEFAULT_SCAN_DURATION);
        assert_eq!(config.session.event_capacity, 16);
    }

    #[test]
    fn test_builders() {
        let config = ProbeLinkConfig::default()
            .with_max_sessions(2)
            .with_scan_duration(Duration::from_millis(250))
            .with_session_event_capacity(0);

        assert_eq!(config.registry.max_sessions, 2);
        assert_eq!(config.discovery.default_scan_duration, Duration::from_millis(250));
        assert_eq!(config.session.event_capacity, 1);
    }
}
