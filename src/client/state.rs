//! Per-client broker state: the handler, subscription, registrar, and
//! pending-response tables.
//!
//! Every member of a duplicate family owns its own [`ClientState`]; only the
//! transport is shared. The tables are mutated under a plain mutex with
//! short critical sections — entries are cloned out before any handler is
//! invoked, so no lock is ever held across an await point.

// Rust guideline compliant 2026-02

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::handler::{EventHandler, HandlerEntry, MethodHandler, SubscriptionEntry};
use crate::message::Message;

/// Tables and flags for one broker client (parent or duplicate).
#[derive(Default)]
pub(crate) struct ClientState {
    /// Method FQN → handler. One-shot insertion; never shrinks except on
    /// destroy.
    pub handlers: HashMap<String, HandlerEntry>,
    /// Event FQN → ordered subscription entries.
    pub subscriptions: HashMap<String, Vec<SubscriptionEntry>>,
    /// Remote modules this client has registered its handlers with.
    pub registrars: HashSet<String>,
    /// In-flight requests: message id → single-shot response slot.
    pub pending: HashMap<String, oneshot::Sender<Message>>,
    /// Transport open (parents only; duplicates delegate).
    pub connected: bool,
    /// Captured from the first server `ping`.
    pub server_module_name: Option<String>,
    /// Set once on destroy.
    pub destroyed: bool,
}

impl std::fmt::Debug for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientState")
            .field("handlers", &self.handlers.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("registrars", &self.registrars)
            .field("pending", &self.pending.len())
            .field("connected", &self.connected)
            .field("server_module_name", &self.server_module_name)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl ClientState {
    /// Install a handler at `fqn` unless one is already present.
    ///
    /// Returns `false` when the key is taken — the original handler stays
    /// installed so accidental double-registration is visible.
    pub fn insert_handler(&mut self, fqn: &str, handler: MethodHandler, relay: bool) -> bool {
        if self.handlers.contains_key(fqn) {
            return false;
        }
        self.handlers
            .insert(fqn.to_string(), HandlerEntry { handler, relay });
        true
    }

    /// Registered handler keys, for `registerAPIHandlers` payloads.
    pub fn handler_keys(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Append a subscription entry, preserving insertion order. Duplicate
    /// handlers are allowed and each fires independently.
    pub fn append_subscription(&mut self, event_fqn: &str, handler: EventHandler, once: bool) {
        self.subscriptions
            .entry(event_fqn.to_string())
            .or_default()
            .push(SubscriptionEntry { handler, once });
    }

    /// Remove subscriptions for `event_fqn`.
    ///
    /// With a handler, only the first identity-matching entry goes; without
    /// one, the whole entry is deleted. Returns `true` when anything was
    /// removed.
    pub fn remove_subscription(
        &mut self,
        event_fqn: &str,
        handler: Option<&EventHandler>,
    ) -> bool {
        match handler {
            None => self.subscriptions.remove(event_fqn).is_some(),
            Some(target) => {
                let Some(entries) = self.subscriptions.get_mut(event_fqn) else {
                    return false;
                };
                let Some(index) = entries
                    .iter()
                    .position(|e| Arc::ptr_eq(&e.handler, target))
                else {
                    return false;
                };
                entries.remove(index);
                if entries.is_empty() {
                    self.subscriptions.remove(event_fqn);
                }
                true
            }
        }
    }

    /// Drop the delivered `once` entries for `event_fqn`, by handler
    /// identity, leaving anything added during delivery alone.
    pub fn remove_delivered_once(&mut self, event_fqn: &str, delivered: &[SubscriptionEntry]) {
        let Some(entries) = self.subscriptions.get_mut(event_fqn) else {
            return;
        };
        entries.retain(|e| {
            !(e.once
                && delivered
                    .iter()
                    .any(|d| d.once && Arc::ptr_eq(&d.handler, &e.handler)))
        });
        if entries.is_empty() {
            self.subscriptions.remove(event_fqn);
        }
    }

    /// Subscribed event FQNs, for resubscription after a reconnect.
    pub fn subscription_keys(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Take the single-shot waiter for a response id, if any survives.
    pub fn take_pending(&mut self, request_id: &str) -> Option<oneshot::Sender<Message>> {
        self.pending.remove(request_id)
    }

    /// Drop every in-flight waiter. Their callers observe a disconnect
    /// surface error.
    pub fn fail_pending(&mut self) {
        self.pending.clear();
    }
}
