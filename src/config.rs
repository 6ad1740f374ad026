//! Broker configuration.
//!
//! All limits are read once at construction into an explicit
//! [`BrokerConfig`] record. [`BrokerConfig::from_env`] is the convenience
//! adapter that consults the process environment; failures to read or parse
//! a variable are tolerated silently and fall back to the defaults.
//!
//! # Environment Variables
//!
//! - `BROKER_TIMEOUT` — milliseconds; when it parses to a positive number it
//!   replaces every request's effective deadline. `0` or garbage is ignored.
//! - `MAX_WS_PACKET_SIZE` — bytes; when it parses to a positive number it
//!   overrides the outbound packet-size warning threshold, floored at
//!   1 000 000 bytes.

// Rust guideline compliant 2026-02

use std::time::Duration;

use crate::constants::{DEFAULT_MAX_PACKET_SIZE, DEFAULT_MESSAGE_TIMEOUT, MIN_MAX_PACKET_SIZE};

/// Limits read once when a client is constructed.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Default per-request response deadline.
    pub message_timeout: Duration,
    /// Outbound packet size above which a send is logged.
    pub max_packet_size: usize,
    /// Global deadline override; replaces every per-request timeout when set.
    pub timeout_override: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            timeout_override: None,
        }
    }
}

impl BrokerConfig {
    /// Build a configuration from the process environment.
    ///
    /// Unset, empty, zero, or unparseable variables leave the corresponding
    /// default in place.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = read_positive("BROKER_TIMEOUT") {
            config.timeout_override = Some(Duration::from_millis(ms));
        }

        if let Some(bytes) = read_positive("MAX_WS_PACKET_SIZE") {
            config.max_packet_size = (bytes as usize).max(MIN_MAX_PACKET_SIZE);
        }

        config
    }

    /// Effective deadline for a request: the global override wins, then the
    /// per-message timeout, then the configured default.
    #[must_use]
    pub fn effective_timeout(&self, per_message: Option<Duration>) -> Duration {
        self.timeout_override
            .or(per_message)
            .unwrap_or(self.message_timeout)
    }
}

/// Read an environment variable as a positive integer, `None` otherwise.
fn read_positive(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|&value| value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.message_timeout, DEFAULT_MESSAGE_TIMEOUT);
        assert_eq!(config.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
        assert!(config.timeout_override.is_none());
    }

    #[test]
    fn test_effective_timeout_precedence() {
        let mut config = BrokerConfig::default();
        assert_eq!(config.effective_timeout(None), DEFAULT_MESSAGE_TIMEOUT);
        assert_eq!(
            config.effective_timeout(Some(Duration::from_millis(50))),
            Duration::from_millis(50)
        );

        config.timeout_override = Some(Duration::from_millis(7000));
        assert_eq!(
            config.effective_timeout(Some(Duration::from_millis(50))),
            Duration::from_millis(7000)
        );
    }

    #[test]
    fn test_packet_size_override_is_floored() {
        std::env::set_var("MAX_WS_PACKET_SIZE", "1024");
        let config = BrokerConfig::from_env();
        assert_eq!(config.max_packet_size, MIN_MAX_PACKET_SIZE);
        std::env::remove_var("MAX_WS_PACKET_SIZE");
    }

    #[test]
    fn test_zero_timeout_override_is_ignored() {
        std::env::set_var("BROKER_TIMEOUT", "0");
        let config = BrokerConfig::from_env();
        assert!(config.timeout_override.is_none());
        std::env::remove_var("BROKER_TIMEOUT");
    }

    #[test]
    fn test_garbage_timeout_override_is_ignored() {
        std::env::set_var("BROKER_TIMEOUT", "soon");
        let config = BrokerConfig::from_env();
        assert!(config.timeout_override.is_none());
        std::env::remove_var("BROKER_TIMEOUT");
    }
}
