//! Application-wide constants for hubwire.
//!
//! This module centralizes the broker's magic numbers so the timeout and
//! packet-size story lives in one place. Constants are grouped by domain
//! with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Timeouts**: request deadlines and subscription expiry
//! - **Reconnect**: transport retry cadence
//! - **Packets**: outbound frame size limits

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Default per-request response deadline.
///
/// Applied to every outbound request that expects a response unless the
/// caller overrides it per call or the `BROKER_TIMEOUT` environment variable
/// replaces it globally.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default expiry for one-shot event subscriptions.
///
/// A `once` subscription whose event never arrives is removed after this
/// window so the subscription table cannot leak handlers.
pub const ONCE_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Reconnect
// ============================================================================

/// Delay before retrying `connect` after the transport closes.
///
/// The broker reconnects with the same options it was last connected with.
/// A flat one-second cadence keeps module startup races short without
/// hammering a hub that is restarting.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

// ============================================================================
// Packets
// ============================================================================

/// Default maximum outbound packet size (4 MiB).
///
/// Oversize packets are logged and still transmitted; the transport makes
/// the final call.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

/// Lower bound for the `MAX_WS_PACKET_SIZE` override.
///
/// An override below this is clamped up so a typo cannot silence every
/// non-trivial payload.
pub const MIN_MAX_PACKET_SIZE: usize = 1_000_000;

// ============================================================================
// Transport
// ============================================================================

/// Default WebSocket path on the hub.
pub const DEFAULT_WS_PATH: &str = "/core";

/// Remote module that relays method traffic by default.
pub const DEFAULT_REGISTRAR: &str = "hub.core";

/// Local names handled by the API proxy itself.
///
/// These can never be registered as method handlers.
pub const RESERVED_METHOD_NAMES: &[&str] =
    &["emit", "on", "off", "once", "callTimeout", "excludeClients"];
