//! Wire message envelope and fully-qualified-name helpers.
//!
//! Every frame on the hub WebSocket is one UTF-8 JSON-encoded [`Message`].
//! The wire is symmetric client/server. An outbound method call `foo(a, b)`
//! to module `v.m` looks like:
//!
//! ```text
//! {"type":"v.m.foo","id":"<uuid>","moduleName":"<self>",
//!  "targetModuleName":"v.m","data":[a,b],"timeout":2000,
//!  "excludedClients":[],"time":1700000000000}
//! ```
//!
//! and the expected response:
//!
//! ```text
//! {"type":"response","requestId":"<uuid>","success":true,"data":[result],
//!  "targetModuleName":"<self>","time":...}
//! ```
//!
//! The `type` field is one of the built-in kinds in [`kind`], or a method
//! FQN (`vendor.module.method`) for RPC traffic.
//!
//! # Fully-qualified names
//!
//! A module name is two dotted components (`vendor.module`); an event or
//! method FQN is three or more (`vendor.module.name`). Splitting takes the
//! *last* dot as the separator between target module and local name, while
//! event routing targets the *first two* segments.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Built-in message kinds ────────────────────────────────────────────────

/// `type` values with protocol-level meaning. Anything else is treated as a
/// method FQN and dispatched through the handler table.
pub mod kind {
    /// Server liveness probe; also announces the server's module name.
    pub const PING: &str = "ping";
    /// Reply to a request, correlated by `requestId`.
    pub const RESPONSE: &str = "response";
    /// Fire-and-forget event, routed by `eventName`.
    pub const EVENT: &str = "event";
    /// Subscription request for an event FQN.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Subscription removal for an event FQN.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
}

// ─── Message envelope ──────────────────────────────────────────────────────

/// A single frame on the hub connection.
///
/// All fields except `kind` are optional on the wire; absent fields are not
/// serialized. `id` is assigned by [`crate::client::BrokerClient`] on send
/// and never reused within a process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message kind: one of [`kind`] or a method FQN.
    #[serde(rename = "type")]
    pub kind: String,

    /// Unique id, assigned on send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Wall-clock millisecond timestamp at send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,

    /// Sender's module name; preserved (not rewritten) on relay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,

    /// Intended recipient module, for routing and diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_module_name: Option<String>,

    /// For `response`: the `id` of the originating request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Opaque correlation tag preserved across relays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instigator_id: Option<String>,

    /// For `event` / `subscribe` / `unsubscribe`: the event FQN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,

    /// Ordered argument list (method calls, events) or response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,

    /// Only on `response`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Caller-specified deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Module names the hub should not deliver to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_clients: Option<Vec<String>>,
}

impl Message {
    /// New message of the given kind with every optional field absent.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Outbound method request `vendor.module.method(args)`.
    #[must_use]
    pub fn request(method_fqn: impl Into<String>, target: impl Into<String>, data: Vec<Value>) -> Self {
        let mut message = Self::new(method_fqn);
        message.target_module_name = Some(target.into());
        message.data = Some(data);
        message
    }

    /// Event message for `event_fqn` carrying `data`.
    #[must_use]
    pub fn event(event_fqn: impl Into<String>, data: Vec<Value>) -> Self {
        let mut message = Self::new(kind::EVENT);
        message.event_name = Some(event_fqn.into());
        message.data = Some(data);
        message
    }

    /// Subscription (or removal) message for `event_fqn`, targeted at the
    /// event's owning module.
    #[must_use]
    pub fn subscription(message_kind: &str, event_fqn: impl Into<String>) -> Self {
        let event_fqn = event_fqn.into();
        let mut message = Self::new(message_kind);
        message.target_module_name = event_target(&event_fqn).map(str::to_string);
        message.event_name = Some(event_fqn);
        message
    }

    /// `true` for kinds that never create a response waiter.
    #[must_use]
    pub fn is_fire_and_forget(&self) -> bool {
        self.kind == kind::EVENT || self.kind == kind::RESPONSE
    }

    /// First error string in `data`, for failed responses shaped
    /// `[{"error": "..."}]`.
    #[must_use]
    pub fn first_error(&self) -> Option<&str> {
        self.data
            .as_deref()?
            .first()?
            .get("error")?
            .as_str()
    }

    /// Parse a frame, reporting the offending payload on failure.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("unparseable broker frame: {e}: {}", truncate(raw, 120)))
    }
}

// ─── FQN helpers ───────────────────────────────────────────────────────────

/// Split an FQN at its last dot into `(target module, local name)`.
///
/// Returns `None` when there is no dot or either side is empty.
#[must_use]
pub fn split_fqn(fqn: &str) -> Option<(&str, &str)> {
    let (module, local) = fqn.rsplit_once('.')?;
    if module.is_empty() || local.is_empty() {
        return None;
    }
    Some((module, local))
}

/// Owning module of an event FQN: its first two segments.
///
/// Returns `None` unless the FQN has at least three non-empty segments.
#[must_use]
pub fn event_target(event_fqn: &str) -> Option<&str> {
    let mut segments = event_fqn.split('.');
    let vendor = segments.next().filter(|s| !s.is_empty())?;
    let module = segments.next().filter(|s| !s.is_empty())?;
    segments.next().filter(|s| !s.is_empty())?;
    let target_len = vendor.len() + 1 + module.len();
    Some(&event_fqn[..target_len])
}

/// `true` when `name` is a well-formed two-segment module name.
#[must_use]
pub fn is_module_name(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() == 2 && segments.iter().all(|s| !s.is_empty())
}

/// Join a module name and local name into an FQN.
#[must_use]
pub fn join_fqn(module: &str, local: &str) -> String {
    format!("{module}.{local}")
}

fn truncate(raw: &str, max: usize) -> &str {
    let mut end = raw.len().min(max);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trips_on_defined_fields() {
        let mut message = Message::request("v.m.foo", "v.m", vec![1.into(), 2.into()]);
        message.id = Some("abc".to_string());
        message.timeout = Some(2000);
        message.excluded_clients = Some(Vec::new());

        let raw = serde_json::to_string(&message).expect("serializes");
        let parsed = Message::parse(&raw).expect("parses");
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let mut message = Message::new(kind::RESPONSE);
        message.request_id = Some("r1".to_string());
        message.module_name = Some("acme.sum".to_string());
        message.success = Some(true);

        let raw = serde_json::to_string(&message).expect("serializes");
        assert!(raw.contains("\"type\":\"response\""));
        assert!(raw.contains("\"requestId\":\"r1\""));
        assert!(raw.contains("\"moduleName\":\"acme.sum\""));
        // Absent optionals stay off the wire entirely
        assert!(!raw.contains("eventName"));
        assert!(!raw.contains("instigatorId"));
    }

    #[test]
    fn test_split_fqn_takes_last_dot() {
        assert_eq!(split_fqn("acme.sum.add"), Some(("acme.sum", "add")));
        assert_eq!(split_fqn("hub.core"), Some(("hub", "core")));
        assert_eq!(split_fqn("nodots"), None);
        assert_eq!(split_fqn("trailing."), None);
    }

    #[test]
    fn test_event_target_takes_first_two_segments() {
        assert_eq!(event_target("vendor.mod.tick"), Some("vendor.mod"));
        assert_eq!(event_target("vendor.mod.a.b"), Some("vendor.mod"));
        assert_eq!(event_target("vendor.mod"), None);
        assert_eq!(event_target("vendor..tick"), None);
    }

    #[test]
    fn test_is_module_name() {
        assert!(is_module_name("acme.sum"));
        assert!(!is_module_name("acme"));
        assert!(!is_module_name("acme.sum.add"));
        assert!(!is_module_name(".sum"));
    }

    #[test]
    fn test_first_error_extraction() {
        let mut message = Message::new(kind::RESPONSE);
        message.success = Some(false);
        message.data = Some(vec![serde_json::json!({ "error": "X" })]);
        assert_eq!(message.first_error(), Some("X"));

        message.data = Some(vec![serde_json::json!(42)]);
        assert_eq!(message.first_error(), None);
    }

    #[test]
    fn test_subscription_message_targets_owning_module() {
        let message = Message::subscription(kind::SUBSCRIBE, "vendor.mod.tick");
        assert_eq!(message.kind, kind::SUBSCRIBE);
        assert_eq!(message.event_name.as_deref(), Some("vendor.mod.tick"));
        assert_eq!(message.target_module_name.as_deref(), Some("vendor.mod"));
    }

    #[test]
    fn test_fire_and_forget_kinds() {
        assert!(Message::new(kind::EVENT).is_fire_and_forget());
        assert!(Message::new(kind::RESPONSE).is_fire_and_forget());
        assert!(!Message::new(kind::PING).is_fire_and_forget());
        assert!(!Message::new("v.m.foo").is_fire_and_forget());
    }
}
