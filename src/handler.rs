//! Handler and subscription table entry types.
//!
//! Method handlers answer inbound RPC traffic; event handlers observe
//! subscribed events. Both are stored as `Arc`'d closures so table entries
//! can be cloned out of a lock before invocation, and so targeted removal
//! can compare handler identity with `Arc::ptr_eq`.
//!
//! # Raw-request envelope
//!
//! A method handler may defer its work by returning
//! [`HandlerValue::Raw`]: the dispatcher stamps the envelope with the
//! inbound instigator id, then invokes the stored closure with the original
//! argument list and uses its return value as the response payload. This
//! lets a handler learn who asked without polluting its signature.

// Rust guideline compliant 2026-02

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

/// Async method handler: argument list in, response payload (or deferred
/// envelope) out. Failures become failure responses to the caller.
pub type MethodHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<HandlerValue>> + Send + Sync>;

/// Event subscription handler. A returned error is logged and isolated;
/// it never interrupts the remaining handlers for the event.
pub type EventHandler = Arc<dyn Fn(&[Value]) -> anyhow::Result<()> + Send + Sync>;

/// Wrap an async closure as a [`MethodHandler`].
pub fn method<F, Fut>(f: F) -> MethodHandler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerValue>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Wrap a closure as an [`EventHandler`].
pub fn event<F>(f: F) -> EventHandler
where
    F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a method handler hands back to the dispatcher.
pub enum HandlerValue {
    /// Immediate response payload.
    Value(Value),
    /// Deferred work; see the module docs.
    Raw(RawRequest),
}

impl std::fmt::Debug for HandlerValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Raw(_) => f.debug_tuple("Raw").finish(),
        }
    }
}

impl From<Value> for HandlerValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Deferred-handler callback: `(instigator id, original argument list)` to
/// response payload.
type RawCallback =
    Box<dyn FnOnce(Option<String>, Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send>;

/// Deferred-handler envelope returned through [`HandlerValue::Raw`].
pub struct RawRequest {
    callback: RawCallback,
}

impl std::fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRequest").finish_non_exhaustive()
    }
}

impl RawRequest {
    /// Wrap a deferred callback.
    #[must_use]
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Option<String>, Vec<Value>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            callback: Box::new(move |instigator, args| f(instigator, args).boxed()),
        }
    }

    /// Stamp the envelope with the inbound instigator id and run the stored
    /// closure with the original argument list.
    pub(crate) async fn invoke(
        self,
        instigator_id: Option<String>,
        args: Vec<Value>,
    ) -> anyhow::Result<Value> {
        (self.callback)(instigator_id, args).await
    }
}

/// Method handler table entry.
#[derive(Clone)]
pub struct HandlerEntry {
    /// The registered handler.
    pub handler: MethodHandler,
    /// Whether responses produced by this handler preserve relay semantics.
    pub relay: bool,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

/// Subscription table entry. Insertion order is preserved by the table;
/// identity (`Arc::ptr_eq` on `handler`) drives targeted removal.
#[derive(Clone)]
pub struct SubscriptionEntry {
    /// The subscribed handler.
    pub handler: EventHandler,
    /// Remove after the first delivery.
    pub once: bool,
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}
