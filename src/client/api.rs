//! Fluent method proxy: the ergonomic layer over the broker's generic
//! call surface.
//!
//! `client.api("vendor", "module")` yields an [`ApiProxy`] bound to that
//! module with default call options. Builder-style copies override the
//! deadline ([`ApiProxy::call_timeout`]) or extend the exclusion list
//! ([`ApiProxy::exclude_clients`]); two proxies built with the same
//! bindings behave identically.
//!
//! Outbound RPC goes through [`ApiProxy::call`]; events through
//! [`ApiProxy::emit`] / [`ApiProxy::on`] / [`ApiProxy::once`] /
//! [`ApiProxy::off`]; local handler installation through
//! [`ApiProxy::register`] / [`ApiProxy::register_all`]. Emitting or
//! registering for a module other than the client's own fails synchronously
//! with a clear reason, as does registering one of the reserved proxy
//! names.

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::constants::{DEFAULT_MESSAGE_TIMEOUT, ONCE_SUBSCRIPTION_TIMEOUT, RESERVED_METHOD_NAMES};
use crate::error::BrokerError;
use crate::handler::{EventHandler, MethodHandler};
use crate::message::{join_fqn, kind, Message};

use super::{BrokerClient, SubscribeOptions};

/// Method proxy bound to one target module.
#[derive(Debug, Clone)]
pub struct ApiProxy {
    client: BrokerClient,
    target: String,
    timeout: Duration,
    excluded_clients: Vec<String>,
}

impl ApiProxy {
    pub(super) fn new(client: BrokerClient, target: String) -> Self {
        Self {
            client,
            target,
            timeout: DEFAULT_MESSAGE_TIMEOUT,
            excluded_clients: Vec::new(),
        }
    }

    /// The bound target module (`vendor.module`).
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Copy of this proxy with only the per-call deadline overridden.
    #[must_use]
    pub fn call_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Copy of this proxy with `clients` appended to the exclusion list.
    #[must_use]
    pub fn exclude_clients<I, S>(&self, clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut copy = self.clone();
        copy.excluded_clients
            .extend(clients.into_iter().map(Into::into));
        copy
    }

    /// Invoke `method` on the target module and await its response payload.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Vec<Value>, BrokerError> {
        let mut message =
            Message::request(join_fqn(&self.target, method), self.target.clone(), args);
        message.timeout = Some(self.timeout.as_millis() as u64);
        message.excluded_clients = Some(self.excluded_clients.clone());
        self.client.send(message, false).await
    }

    /// Emit `event` from this module. Only the owning module may emit its
    /// events; anything else fails synchronously.
    pub async fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), BrokerError> {
        if self.target != self.client.module_name() {
            return Err(BrokerError::Validation(format!(
                "{} cannot emit events for {}",
                self.client.module_name(),
                self.target
            )));
        }
        let mut message = Message::event(join_fqn(&self.target, event), args);
        message.excluded_clients = Some(self.excluded_clients.clone());
        self.client.send(message, false).await.map(|_data| ())
    }

    /// Subscribe `handler` to the target module's `event`.
    ///
    /// Never fails: a timed-out (or otherwise failed) subscription
    /// acknowledgement is logged and the local table entry stays live.
    pub async fn on(&self, event: &str, handler: EventHandler) {
        let event_fqn = join_fqn(&self.target, event);
        if let Err(err) = self
            .client
            .subscribe_to_api_event_with(&event_fqn, handler, SubscribeOptions::default())
            .await
        {
            log::warn!(
                "[Broker:{}] subscription to \"{event_fqn}\" failed: {err}",
                self.client.module_name()
            );
        }
    }

    /// Subscribe `handler` for a single delivery.
    ///
    /// If the event does not arrive within `timeout` (default five
    /// minutes), the handler is removed so the table cannot leak.
    pub async fn once(&self, event: &str, handler: EventHandler, timeout: Option<Duration>) {
        let event_fqn = join_fqn(&self.target, event);
        let options = SubscribeOptions {
            once: true,
            ..SubscribeOptions::default()
        };
        if let Err(err) = self
            .client
            .subscribe_to_api_event_with(&event_fqn, Arc::clone(&handler), options)
            .await
        {
            // The table entry is live regardless; the expiry guard below
            // still has to cover it.
            log::warn!(
                "[Broker:{}] subscription to \"{event_fqn}\" failed: {err}",
                self.client.module_name()
            );
        }

        let expiry = timeout.unwrap_or(ONCE_SUBSCRIPTION_TIMEOUT);
        let weak = self.client.downgrade();
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            let Some(client) = weak.upgrade() else {
                return;
            };
            let expired = client.state().remove_subscription(&event_fqn, Some(&handler));
            if expired {
                log::debug!(
                    "[Broker:{}] once subscription to \"{event_fqn}\" expired",
                    client.module_name()
                );
                if let Err(err) = client
                    .send(Message::subscription(kind::UNSUBSCRIBE, &event_fqn), false)
                    .await
                {
                    log::trace!(
                        "[Broker:{}] expiry unsubscribe for \"{event_fqn}\" not sent: {err}",
                        client.module_name()
                    );
                }
            }
        });
    }

    /// Unsubscribe from the target module's `event`: one handler when
    /// given, every handler otherwise.
    pub async fn off(&self, event: &str, handler: Option<&EventHandler>) {
        let event_fqn = join_fqn(&self.target, event);
        if let Err(err) = self
            .client
            .unsubscribe_from_api_event(&event_fqn, handler, true)
            .await
        {
            log::warn!(
                "[Broker:{}] unsubscription from \"{event_fqn}\" failed: {err}",
                self.client.module_name()
            );
        }
    }

    /// Install `handler` as this module's `method`.
    ///
    /// Fails synchronously on cross-module registration, reserved names,
    /// and double registration.
    pub fn register(&self, method: &str, handler: MethodHandler) -> Result<(), BrokerError> {
        if self.target != self.client.module_name() {
            return Err(BrokerError::Validation(format!(
                "{} cannot register handlers for {}",
                self.client.module_name(),
                self.target
            )));
        }
        if RESERVED_METHOD_NAMES.contains(&method) {
            return Err(BrokerError::Validation(format!(
                "\"{method}\" is reserved and cannot be registered"
            )));
        }
        if self.client.register_api_handler(method, handler) {
            Ok(())
        } else {
            Err(BrokerError::Validation(format!(
                "\"{}\" already has a handler installed",
                join_fqn(&self.target, method)
            )))
        }
    }

    /// Install every `(method, handler)` pair as this module's handlers.
    ///
    /// Stops at the first failure, leaving the already-installed members in
    /// place.
    pub fn register_all<I>(&self, handlers: I) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = (String, MethodHandler)>,
    {
        for (method, handler) in handlers {
            self.register(&method, handler)?;
        }
        Ok(())
    }
}
