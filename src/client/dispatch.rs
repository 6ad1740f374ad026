//! Inbound dispatch: one state machine per frame.
//!
//! Frames arrive on the parent's socket and are routed by `type`:
//!
//! - `response` — consumed by the pending-request slot it correlates to,
//!   then replayed through every live duplicate so their waiters observe
//!   the shared stream too. A response with no surviving slot (the waiter
//!   timed out) is dropped silently.
//! - `event` — delivered to every matching subscription entry with
//!   per-handler error isolation; `once` entries are removed after the
//!   delivery pass. Replayed through duplicates like responses.
//! - `subscribe` / `unsubscribe` — answered by the module they target:
//!   locally (surfacing a local signal), by a matching duplicate, or with
//!   a failure diagnostic.
//! - `ping` — captures the server's module name, then in one pass responds,
//!   refreshes every subscription, and re-installs the peer-lifecycle taps.
//! - anything else — a method call for the handler table. Handlers run on
//!   their own task so slow work never stalls the frame loop.

// Rust guideline compliant 2026-02

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};

use crate::error::BrokerError;
use crate::handler::{self, HandlerEntry, HandlerValue};
use crate::message::{event_target, join_fqn, kind, Message};

use super::{signals, BrokerClient};

/// Parse and route one inbound frame.
pub(super) async fn dispatch_frame(client: &BrokerClient, raw: &str) {
    match Message::parse(raw) {
        Ok(message) => dispatch_message(client.clone(), message).await,
        Err(err) => {
            log::warn!("[Broker:{}] {err:#}", client.module_name());
        }
    }
}

/// Route one parsed message. Boxed because control frames recurse into the
/// duplicate they target.
pub(super) fn dispatch_message(client: BrokerClient, message: Message) -> BoxFuture<'static, ()> {
    async move {
        log::trace!(
            "[Broker:{}] dispatching \"{}\"",
            client.module_name(),
            message.kind
        );
        match message.kind.as_str() {
            kind::RESPONSE => on_response(&client, &message),
            kind::EVENT => on_event(&client, &message),
            kind::SUBSCRIBE | kind::UNSUBSCRIBE => on_subscription_control(&client, message).await,
            kind::PING => on_ping(&client, message).await,
            _ => on_method(&client, message).await,
        }
    }
    .boxed()
}

fn error_payload(reason: &str) -> Value {
    json!({ "error": reason })
}

// ─── response ──────────────────────────────────────────────────────────────

fn on_response(client: &BrokerClient, message: &Message) {
    route_response(client, message);
    for duplicate in client.live_duplicates() {
        route_response(&duplicate, message);
    }
}

fn route_response(client: &BrokerClient, message: &Message) {
    let Some(request_id) = message.request_id.as_deref() else {
        return;
    };
    let waiter = client.state().take_pending(request_id);
    match waiter {
        Some(sender) => {
            // Receiver may have raced its own deadline; either way the
            // slot is gone and a second response for this id is dropped.
            let _ = sender.send(message.clone());
        }
        None => {
            log::trace!(
                "[Broker:{}] dropping response for unknown request {request_id}",
                client.module_name()
            );
        }
    }
}

// ─── event ─────────────────────────────────────────────────────────────────

fn on_event(client: &BrokerClient, message: &Message) {
    deliver_event(client, message);
    for duplicate in client.live_duplicates() {
        deliver_event(&duplicate, message);
    }
}

fn deliver_event(client: &BrokerClient, message: &Message) {
    let Some(event_name) = message.event_name.as_deref() else {
        return;
    };
    let Some(entries) = client.state().subscriptions.get(event_name).cloned() else {
        return;
    };

    let data = message.data.clone().unwrap_or_default();
    for entry in &entries {
        if let Err(err) = (entry.handler)(&data) {
            log::warn!(
                "[Broker:{}] \"{event_name}\" handler failed: {err:#}",
                client.module_name()
            );
        }
    }

    // `once` entries go after the delivery pass, by identity, so handlers
    // added during delivery survive.
    client.state().remove_delivered_once(event_name, &entries);
}

// ─── subscribe / unsubscribe ───────────────────────────────────────────────

async fn on_subscription_control(client: &BrokerClient, message: Message) {
    let Some(event_name) = message.event_name.clone() else {
        let reason = format!("a \"{}\" message requires an eventName", message.kind);
        client
            .respond(&message, false, vec![error_payload(&reason)], false)
            .await;
        return;
    };
    let Some(target) = event_target(&event_name) else {
        let reason = format!("\"{event_name}\" is not an event name (vendor.module.event)");
        client
            .respond(&message, false, vec![error_payload(&reason)], false)
            .await;
        return;
    };

    if target == client.module_name() {
        let local_name = &event_name[target.len() + 1..];
        let signal = if message.kind == kind::SUBSCRIBE {
            signals::SUBSCRIBE
        } else {
            signals::UNSUBSCRIBE
        };
        client.bus().emit(signal, &[json!({ "eventName": local_name })]);
        client.respond(&message, true, Vec::new(), false).await;
        return;
    }

    if let Some(duplicate) = find_duplicate(client, target) {
        // The duplicate answers for itself.
        dispatch_message(duplicate, message).await;
        return;
    }

    let reason = format!(
        "{} cannot handle subscriptions for {target}",
        client.module_name()
    );
    client
        .respond(&message, false, vec![error_payload(&reason)], false)
        .await;
}

// ─── ping ──────────────────────────────────────────────────────────────────

async fn on_ping(client: &BrokerClient, message: Message) {
    if let Some(server) = message.module_name.clone() {
        client.state().server_module_name = Some(server);
    }

    if let Some(target) = message.target_module_name.as_deref() {
        if target != client.module_name() {
            if let Some(duplicate) = find_duplicate(client, target) {
                dispatch_message(duplicate, message).await;
                return;
            }
        }
    }

    // One pass, concurrently: acknowledge, refresh every subscription on
    // the hub, and re-install the peer-lifecycle taps.
    let responder = client.clone();
    let original = message.clone();
    tokio::spawn(async move {
        responder.respond(&original, true, Vec::new(), false).await;
    });

    let refresher = client.clone();
    tokio::spawn(async move {
        resubscribe_all(&refresher).await;
    });

    let server_module_name = client.state().server_module_name.clone();
    if let Some(server) = server_module_name {
        install_peer_lifecycle_taps(client, &server);
    }
}

/// Send a fresh `subscribe` for every event in the table. Failures are
/// warnings: the remote caller of whatever triggered this refresh already
/// observes its own outcome.
pub(super) async fn resubscribe_all(client: &BrokerClient) {
    let subscription_keys = client.state().subscription_keys();
    for event_fqn in subscription_keys {
        if let Err(err) = client
            .send(Message::subscription(kind::SUBSCRIBE, &event_fqn), false)
            .await
        {
            log::warn!(
                "[Broker:{}] resubscribe to \"{event_fqn}\" failed: {err}",
                client.module_name()
            );
        }
    }
}

/// Subscribe to the server's `moduleconnect` / `moduledisconnect` events so
/// peer lifecycle surfaces on the local bus, and so a freshly-appeared peer
/// triggers another subscription refresh.
///
/// Pings land here repeatedly; any prior taps are removed first so the
/// table cannot accumulate duplicate entries across reconnects.
fn install_peer_lifecycle_taps(client: &BrokerClient, server: &str) {
    let connect_fqn = join_fqn(server, signals::MODULE_CONNECT);
    let disconnect_fqn = join_fqn(server, signals::MODULE_DISCONNECT);

    let weak = client.downgrade();
    let on_peer_connect = handler::event(move |args| {
        if let Some(client) = weak.upgrade() {
            client.bus().emit(signals::MODULE_CONNECT, args);
            let refresher = client.clone();
            tokio::spawn(async move {
                resubscribe_all(&refresher).await;
            });
        }
        Ok(())
    });

    let weak = client.downgrade();
    let on_peer_disconnect = handler::event(move |args| {
        if let Some(client) = weak.upgrade() {
            client.bus().emit(signals::MODULE_DISCONNECT, args);
        }
        Ok(())
    });

    // Table mutation is synchronous so back-to-back pings stay idempotent;
    // only the hub announcements go off-task.
    {
        let mut state = client.state();
        let _ = state.remove_subscription(&connect_fqn, None);
        let _ = state.remove_subscription(&disconnect_fqn, None);
        state.append_subscription(&connect_fqn, on_peer_connect, false);
        state.append_subscription(&disconnect_fqn, on_peer_disconnect, false);
    }

    let subscriber = client.clone();
    tokio::spawn(async move {
        for event_fqn in [connect_fqn, disconnect_fqn] {
            if let Err(err) = subscriber
                .send(Message::subscription(kind::SUBSCRIBE, &event_fqn), false)
                .await
            {
                log::debug!(
                    "[Broker:{}] lifecycle tap announcement for \"{event_fqn}\" failed: {err}",
                    subscriber.module_name()
                );
            }
        }
    });
}

// ─── method calls ──────────────────────────────────────────────────────────

async fn on_method(client: &BrokerClient, message: Message) {
    if let Some(target) = message.target_module_name.as_deref() {
        if target != client.module_name() {
            if let Some(duplicate) = find_duplicate(client, target) {
                dispatch_message(duplicate, message).await;
                return;
            }
        }
    }

    let entry = client.state().handlers.get(&message.kind).cloned();
    let Some(entry) = entry else {
        let reason = format!(
            "There is no handler registered for this type of message: {}",
            message.kind
        );
        client
            .respond(&message, false, vec![error_payload(&reason)], false)
            .await;
        return;
    };

    // Handlers run concurrently; a slow one never stalls the frame loop.
    let client = client.clone();
    tokio::spawn(async move {
        run_method_handler(&client, message, entry).await;
    });
}

async fn run_method_handler(client: &BrokerClient, message: Message, entry: HandlerEntry) {
    let args = message.data.clone().unwrap_or_default();

    let outcome = match (entry.handler)(args.clone()).await {
        Ok(HandlerValue::Value(payload)) => Ok(payload),
        Ok(HandlerValue::Raw(raw)) => raw.invoke(message.instigator_id.clone(), args).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(payload) => {
            client.respond(&message, true, vec![payload], entry.relay).await;
        }
        Err(err) => {
            let reason = match err.downcast_ref::<BrokerError>() {
                Some(BrokerError::Broker(reason)) => reason.clone(),
                Some(BrokerError::Timeout) => {
                    // The remote caller already observed its own timeout.
                    log::warn!(
                        "[Broker:{}] \"{}\" handler timed out",
                        client.module_name(),
                        message.kind
                    );
                    "ERROR".to_string()
                }
                _ => {
                    log::trace!(
                        "[Broker:{}] \"{}\" handler failed: {err:#}",
                        client.module_name(),
                        message.kind
                    );
                    "ERROR".to_string()
                }
            };
            client
                .respond(&message, false, vec![error_payload(&reason)], entry.relay)
                .await;
        }
    }
}

// ─── family routing ────────────────────────────────────────────────────────

fn find_duplicate(client: &BrokerClient, target: &str) -> Option<BrokerClient> {
    client
        .live_duplicates()
        .into_iter()
        .find(|dup| dup.module_name() == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::handler::{event, method};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn test_client(name: &str) -> BrokerClient {
        BrokerClient::with_config(name, "/core", BrokerConfig::default())
    }

    fn event_frame(event_name: &str, data: Vec<Value>) -> Message {
        let mut message = Message::event(event_name, data);
        message.id = Some("evt".to_string());
        message
    }

    #[tokio::test]
    async fn test_event_delivery_and_once_removal() {
        let client = test_client("acme.sub");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tick = event(move |args| {
            sink.lock().expect("seen lock").push(args[0].clone());
            Ok(())
        });

        client
            .state()
            .append_subscription("vendor.mod.tick", tick, true);

        dispatch_message(client.clone(), event_frame("vendor.mod.tick", vec![42.into()])).await;
        dispatch_message(client.clone(), event_frame("vendor.mod.tick", vec![43.into()])).await;

        let seen = seen.lock().expect("seen lock");
        assert_eq!(*seen, vec![Value::from(42)]);
        assert!(!client
            .state()
            .subscriptions
            .contains_key("vendor.mod.tick"));
    }

    #[tokio::test]
    async fn test_failing_event_handler_does_not_stop_the_rest() {
        let client = test_client("acme.sub");
        let count = Arc::new(AtomicUsize::new(0));

        let failing = event(|_args| anyhow::bail!("boom"));
        let counter = Arc::clone(&count);
        let counting = event(move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        {
            let mut state = client.state();
            state.append_subscription("v.m.tick", failing, false);
            state.append_subscription("v.m.tick", counting, false);
        }

        dispatch_message(client.clone(), event_frame("v.m.tick", Vec::new())).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_replay_through_every_duplicate() {
        let parent = test_client("acme.parent");
        let dup_a = parent.duplicate("acme.alpha");
        let dup_b = parent.duplicate("acme.beta");

        let count = Arc::new(AtomicUsize::new(0));
        for member in [&parent, &dup_a, &dup_b] {
            let counter = Arc::clone(&count);
            member.state().append_subscription(
                "v.m.e",
                event(move |_args| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                false,
            );
        }

        dispatch_message(parent.clone(), event_frame("v.m.e", Vec::new())).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_response_routes_to_duplicate_waiter() {
        let parent = test_client("acme.parent");
        let duplicate = parent.duplicate("acme.alpha");

        let (sender, receiver) = tokio::sync::oneshot::channel();
        duplicate
            .state()
            .pending
            .insert("r1".to_string(), sender);

        let mut response = Message::new(kind::RESPONSE);
        response.request_id = Some("r1".to_string());
        response.success = Some(true);
        response.data = Some(vec![8.into()]);

        dispatch_message(parent.clone(), response).await;

        let received = receiver.await.expect("waiter observed the replay");
        assert_eq!(received.data, Some(vec![8.into()]));
    }

    #[tokio::test]
    async fn test_late_response_is_dropped_silently() {
        let client = test_client("acme.parent");
        let mut response = Message::new(kind::RESPONSE);
        response.request_id = Some("gone".to_string());
        response.success = Some(true);

        // No pending slot — must not panic or respond.
        dispatch_message(client.clone(), response).await;
        assert!(client.state().pending.is_empty());
    }

    #[tokio::test]
    async fn test_local_subscribe_control_emits_signal() {
        let client = test_client("acme.sub");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_signal(
            signals::SUBSCRIBE,
            Arc::new(move |args| {
                sink.lock().expect("seen lock").extend(args.to_vec());
            }),
        );

        let mut message = Message::subscription(kind::SUBSCRIBE, "acme.sub.tick");
        message.id = Some("s1".to_string());
        dispatch_message(client.clone(), message).await;

        let seen = seen.lock().expect("seen lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["eventName"], "tick");
    }

    #[tokio::test]
    async fn test_ping_captures_server_module_name() {
        let client = test_client("acme.sub");
        let mut ping = Message::new(kind::PING);
        ping.id = Some("p1".to_string());
        ping.module_name = Some("hub.core".to_string());

        dispatch_message(client.clone(), ping).await;
        assert_eq!(client.server_module_name().as_deref(), Some("hub.core"));
    }

    #[tokio::test]
    async fn test_repeated_pings_do_not_accumulate_lifecycle_taps() {
        let client = test_client("acme.sub");
        for i in 0..3 {
            let mut ping = Message::new(kind::PING);
            ping.id = Some(format!("p{i}"));
            ping.module_name = Some("hub.core".to_string());
            dispatch_message(client.clone(), ping).await;
            // Let the spawned install task run.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let state = client.state();
        let taps = state
            .subscriptions
            .get("hub.core.moduleconnect")
            .map_or(0, Vec::len);
        assert_eq!(taps, 1);
        let taps = state
            .subscriptions
            .get("hub.core.moduledisconnect")
            .map_or(0, Vec::len);
        assert_eq!(taps, 1);
    }

    #[tokio::test]
    async fn test_raw_request_handler_sees_instigator() {
        let client = test_client("acme.sum");
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);

        let handler = method(move |_args| {
            let sink = Arc::clone(&sink);
            async move {
                Ok(HandlerValue::Raw(crate::handler::RawRequest::new(
                    move |instigator, _args| async move {
                        *sink.lock().expect("observed lock") = instigator;
                        Ok(Value::Null)
                    },
                )))
            }
        });
        assert!(client
            .state()
            .insert_handler("acme.sum.whoami", handler, false));

        let mut request = Message::request("acme.sum.whoami", "acme.sum", Vec::new());
        request.id = Some("q1".to_string());
        request.instigator_id = Some("instigator-9".to_string());

        dispatch_message(client.clone(), request).await;
        // Handler runs on its own task.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(
            observed.lock().expect("observed lock").as_deref(),
            Some("instigator-9")
        );
    }
}
