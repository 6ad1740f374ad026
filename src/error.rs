//! Broker error taxonomy.
//!
//! Two kinds sit at the core of the protocol: a remote handler reporting
//! failure ([`BrokerError::Broker`]) and a response deadline elapsing
//! ([`BrokerError::Timeout`]). The timeout variant carries the stable code
//! `"TIMEOUT"` so callers can recognize an expected failure and suppress
//! stack traces for it. Everything else in the crate surfaces as
//! `anyhow::Error` at the I/O seams.

// Rust guideline compliant 2026-02

/// Stable code attached to timeout failures.
pub const TIMEOUT_CODE: &str = "TIMEOUT";

/// Errors surfaced by broker operations.
#[derive(Debug)]
pub enum BrokerError {
    /// A remote handler reported failure. The message is the remote's first
    /// error string when it provided one.
    Broker(String),
    /// The awaited response did not arrive before the deadline.
    Timeout,
    /// Argument validation failed at the call site (reserved name,
    /// cross-module registration, malformed FQN).
    Validation(String),
    /// The transport was unavailable or the write failed.
    Transport(String),
}

impl BrokerError {
    /// Stable machine-readable code, for the variants that carry one.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Timeout => Some(TIMEOUT_CODE),
            _ => None,
        }
    }

    /// Returns `true` for the expected deadline-elapsed failure.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// JSON shape used when the error is emitted on a client's `error`
    /// signal instead of being returned to the caller.
    #[must_use]
    pub fn to_signal_value(&self) -> serde_json::Value {
        let mut object = serde_json::json!({ "error": self.to_string() });
        if let Some(code) = self.code() {
            object["code"] = serde_json::Value::String(code.to_string());
        }
        object
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Broker(msg) => write!(f, "{msg}"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Validation(msg) => write!(f, "{msg}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_carries_stable_code() {
        assert_eq!(BrokerError::Timeout.code(), Some("TIMEOUT"));
        assert!(BrokerError::Timeout.is_timeout());
    }

    #[test]
    fn test_broker_message_passes_through() {
        let err = BrokerError::Broker("remote fell over".to_string());
        assert_eq!(err.to_string(), "remote fell over");
        assert!(err.code().is_none());
    }

    #[test]
    fn test_signal_value_shape() {
        let value = BrokerError::Timeout.to_signal_value();
        assert_eq!(value["code"], "TIMEOUT");
        assert_eq!(value["error"], "Request timed out");

        let value = BrokerError::Broker("nope".to_string()).to_signal_value();
        assert_eq!(value["error"], "nope");
        assert!(value.get("code").is_none());
    }
}
