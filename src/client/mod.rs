//! Broker client: the value every module embeds to participate in the hub.
//!
//! # Architecture
//!
//! ```text
//!   BrokerClient (parent)          BrokerClient (duplicate)
//!         │                               │
//!         │ owns ConnectOptions           │ own module name,
//!         │ owns outbound queue           │ own handler / subscription /
//!         │ weak refs to duplicates       │ registrar / pending tables
//!         ▼                               │
//!   Background connection task ◄──────────┘ sends through the parent
//!   (connect, reconnect, route)
//! ```
//!
//! Exactly one *parent* owns the WebSocket; any number of *duplicates*
//! share it while keeping an independent identity. The parent's connection
//! task replays inbound frames through each live duplicate so response
//! waiters and subscriptions on duplicates observe the same stream, and
//! hands control traffic to the duplicate it targets. Duplicates of
//! duplicates attach to the original parent, never to an intermediate.
//!
//! # Usage
//!
//! ```ignore
//! let client = BrokerClient::new("acme.sum");
//! client.connect("127.0.0.1", Some(8080))?;
//! client.wait_connected().await?;
//!
//! client.api("acme", "sum").register("add", hubwire::handler::method(
//!     |args| async move {
//!         let a = args[0].as_i64().unwrap_or(0);
//!         let b = args[1].as_i64().unwrap_or(0);
//!         Ok(hubwire::handler::HandlerValue::Value((a + b).into()))
//!     },
//! ))?;
//!
//! let result = client.api("acme", "other").call("mul", vec![6.into(), 7.into()]).await?;
//! ```

// Rust guideline compliant 2026-02

mod api;
mod connection;
mod dispatch;
mod state;

pub use api::ApiProxy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::config::BrokerConfig;
use crate::constants::{DEFAULT_REGISTRAR, DEFAULT_WS_PATH, RESERVED_METHOD_NAMES};
use crate::error::BrokerError;
use crate::handler::{EventHandler, MethodHandler};
use crate::message::{is_module_name, join_fqn, kind, Message};
use crate::signal::{SignalBus, SignalListener};

use state::ClientState;

/// Signal names emitted on a client's bus.
pub mod signals {
    /// Transport opened.
    pub const CONNECT: &str = "connect";
    /// Transport closed.
    pub const DISCONNECT: &str = "disconnect";
    /// RPC failure emission (opt-in; see [`super::BrokerClient::on_error`]).
    pub const ERROR: &str = "error";
    /// Client torn down.
    pub const DESTROY: &str = "destroy";
    /// A remote subscribed to one of this module's events.
    pub const SUBSCRIBE: &str = "subscribe";
    /// A remote dropped one of its subscriptions.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// A peer module appeared on the hub.
    pub const MODULE_CONNECT: &str = "moduleconnect";
    /// A peer module left the hub.
    pub const MODULE_DISCONNECT: &str = "moduledisconnect";
}

/// Where and how the parent connects.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Hub host name or address.
    pub host: String,
    /// Hub port; omitted for scheme-default.
    pub port: Option<u16>,
    /// Upgrade the connection URL to `wss://`.
    pub tls: bool,
}

/// Options for [`BrokerClient::subscribe_to_api_event_with`].
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Announce the subscription to the event's owning module.
    pub send_message: bool,
    /// Remove the handler after its first delivery.
    pub once: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            send_message: true,
            once: false,
        }
    }
}

/// Parent-only connection bookkeeping.
#[derive(Debug)]
struct ParentState {
    /// Outbound text queue of the live socket session, when one exists.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Live duplicates; pruned when one emits `destroy`.
    duplicates: Mutex<Vec<Weak<ClientInner>>>,
    /// Options of the last `connect` call, reused on every retry.
    last_options: Mutex<Option<ConnectOptions>>,
    /// Whether the connection task is alive.
    task_running: AtomicBool,
    /// Wakes the connection task for teardown.
    shutdown: Notify,
    /// Wakes the connection task to drop the socket and dial again.
    reconnect: Notify,
}

impl ParentState {
    fn new() -> Self {
        Self {
            outbound: Mutex::new(None),
            duplicates: Mutex::new(Vec::new()),
            last_options: Mutex::new(None),
            task_running: AtomicBool::new(false),
            shutdown: Notify::new(),
            reconnect: Notify::new(),
        }
    }
}

/// Family position of a client.
#[derive(Debug)]
enum Family {
    Parent(ParentState),
    Duplicate { parent: Arc<ClientInner> },
}

/// Shared core of a [`BrokerClient`] handle.
#[derive(Debug)]
pub(crate) struct ClientInner {
    module_name: String,
    ws_path: String,
    config: BrokerConfig,
    bus: SignalBus,
    state: Mutex<ClientState>,
    family: Family,
}

impl ClientInner {
    /// Parent bookkeeping; panics when called on a duplicate, which only
    /// happens through `root_inner` (roots are parents by construction).
    fn parent_state(&self) -> &ParentState {
        match &self.family {
            Family::Parent(parent) => parent,
            Family::Duplicate { .. } => unreachable!("root of a family is always a parent"),
        }
    }
}

/// Weak handle used by internally-installed handlers so the tables never
/// keep their own client alive.
#[derive(Debug, Clone)]
pub(crate) struct WeakBrokerClient {
    inner: Weak<ClientInner>,
}

impl WeakBrokerClient {
    pub(crate) fn upgrade(&self) -> Option<BrokerClient> {
        self.inner.upgrade().map(|inner| BrokerClient { inner })
    }
}

/// Handle to one broker participant (parent or duplicate).
///
/// Cheap to clone; all clones share the same tables and transport.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    inner: Arc<ClientInner>,
}

impl BrokerClient {
    /// New parent client with the default WebSocket path (`/core`) and
    /// limits read from the process environment.
    #[must_use]
    pub fn new(module_name: &str) -> Self {
        Self::with_config(module_name, DEFAULT_WS_PATH, BrokerConfig::from_env())
    }

    /// New parent client with an explicit WebSocket path.
    #[must_use]
    pub fn with_path(module_name: &str, ws_path: &str) -> Self {
        Self::with_config(module_name, ws_path, BrokerConfig::from_env())
    }

    /// New parent client with an explicit configuration record.
    #[must_use]
    pub fn with_config(module_name: &str, ws_path: &str, config: BrokerConfig) -> Self {
        if !is_module_name(module_name) {
            log::warn!(
                "[Broker:{module_name}] module names are expected to have two dotted segments"
            );
        }
        Self {
            inner: Arc::new(ClientInner {
                module_name: module_name.to_string(),
                ws_path: ws_path.to_string(),
                config,
                bus: SignalBus::new(),
                state: Mutex::new(ClientState::default()),
                family: Family::Parent(ParentState::new()),
            }),
        }
    }

    // ─── Identity and lifecycle ────────────────────────────────────────────

    /// This client's module name (`vendor.module`).
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.inner.module_name
    }

    /// `true` for duplicates sharing a parent's transport.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self.inner.family, Family::Duplicate { .. })
    }

    /// Transport state; duplicates delegate to the parent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.root_inner()
            .state
            .lock()
            .expect("client state lock")
            .connected
    }

    /// Server module name captured from the first server `ping`, if any.
    #[must_use]
    pub fn server_module_name(&self) -> Option<String> {
        self.state().server_module_name.clone()
    }

    /// Open the transport to the hub and keep it open.
    ///
    /// Returns immediately; the connection is established by a background
    /// task that retries every second until [`Self::destroy`]. Await
    /// [`Self::wait_connected`] for readiness. Only parents connect —
    /// duplicates share their parent's transport.
    pub fn connect(&self, host: &str, port: Option<u16>) -> anyhow::Result<()> {
        self.connect_with(ConnectOptions {
            host: host.to_string(),
            port,
            tls: false,
        })
    }

    /// [`Self::connect`] with explicit options.
    pub fn connect_with(&self, options: ConnectOptions) -> anyhow::Result<()> {
        let Family::Parent(parent) = &self.inner.family else {
            anyhow::bail!("duplicates share the parent's transport; connect the parent instead");
        };
        if self.state().destroyed {
            anyhow::bail!("client has been destroyed");
        }

        *parent.last_options.lock().expect("connect options lock") = Some(options);
        if parent.task_running.swap(true, Ordering::SeqCst) {
            // Task already alive — nudge it to pick the new options up.
            parent.reconnect.notify_one();
        } else {
            connection::spawn(self.clone());
        }
        Ok(())
    }

    /// Drop the current socket and dial again with the last options.
    pub fn force_reconnect(&self) {
        self.root_inner().parent_state().reconnect.notify_one();
    }

    /// Resolve once the transport is open. Resolves immediately when it
    /// already is.
    pub async fn wait_connected(&self) -> Result<(), BrokerError> {
        let wait = self.bus().watch(&[signals::CONNECT]);
        if self.is_connected() {
            return Ok(());
        }
        wait.wait(None).await.map(|_signal| ())
    }

    /// [`Self::wait_connected`] bounded by a deadline.
    pub(crate) async fn wait_connected_within(
        &self,
        deadline: Duration,
    ) -> Result<(), BrokerError> {
        let wait = self.bus().watch(&[signals::CONNECT]);
        if self.is_connected() {
            return Ok(());
        }
        wait.wait(Some(deadline)).await.map(|_signal| ())
    }

    /// Round-trip a `ping` to the hub, returning its response payload.
    pub async fn ping(&self) -> Result<Vec<Value>, BrokerError> {
        self.send(Message::new(kind::PING), false).await
    }

    /// Create a sibling client that shares this family's transport but has
    /// its own module name and tables.
    ///
    /// Duplicates of duplicates attach to the original parent. The parent
    /// holds only a weak reference and prunes it when the duplicate emits
    /// `destroy`.
    #[must_use]
    pub fn duplicate(&self, module_name: &str) -> BrokerClient {
        let root = self.root_inner();
        let inner = Arc::new(ClientInner {
            module_name: module_name.to_string(),
            ws_path: root.ws_path.clone(),
            config: root.config.clone(),
            bus: SignalBus::new(),
            state: Mutex::new(ClientState::default()),
            family: Family::Duplicate {
                parent: Arc::clone(&root),
            },
        });

        root.parent_state()
            .duplicates
            .lock()
            .expect("duplicates lock")
            .push(Arc::downgrade(&inner));

        // Prune the family entry once the duplicate announces teardown.
        let parent = Arc::downgrade(&root);
        let doomed = Arc::as_ptr(&inner) as usize;
        inner.bus.on(
            signals::DESTROY,
            Arc::new(move |_args| {
                if let Some(parent) = parent.upgrade() {
                    parent
                        .parent_state()
                        .duplicates
                        .lock()
                        .expect("duplicates lock")
                        .retain(|weak| {
                            weak.upgrade()
                                .is_some_and(|dup| Arc::as_ptr(&dup) as usize != doomed)
                        });
                }
            }),
        );

        BrokerClient { inner }
    }

    /// Tear the client down.
    ///
    /// A duplicate deregisters from its registrars, unsubscribes from every
    /// event, announces its departure to the server, and emits `destroy` so
    /// the parent forgets it. A parent closes the transport, fails every
    /// in-flight request, and detaches all listeners.
    pub async fn destroy(&self) {
        match &self.inner.family {
            Family::Duplicate { .. } => {
                self.deregister_handlers_from_remotes().await;
                self.unsubscribe_from_all_events().await;

                let farewell =
                    Message::event(join_fqn(self.module_name(), "disconnect"), Vec::new());
                if let Err(err) = self.send(farewell, false).await {
                    log::trace!(
                        "[Broker:{}] departure event not sent: {err}",
                        self.module_name()
                    );
                }

                {
                    let mut state = self.state();
                    state.destroyed = true;
                    state.fail_pending();
                    state.handlers.clear();
                }
                self.bus().emit(signals::DESTROY, &[]);
                self.bus().clear();
            }
            Family::Parent(parent) => {
                {
                    let mut state = self.state();
                    state.destroyed = true;
                    state.fail_pending();
                }
                parent.shutdown.notify_one();
                *parent.outbound.lock().expect("outbound lock") = None;
                self.bus().clear();
            }
        }
    }

    // ─── Signals ───────────────────────────────────────────────────────────

    /// Install a persistent listener for one of [`signals`].
    pub fn on_signal(&self, signal: &str, listener: SignalListener) {
        self.bus().on(signal, listener);
    }

    /// Opt in to error emission: with at least one error listener attached,
    /// RPC failures are emitted here instead of returned, and the failed
    /// call resolves with an empty payload.
    pub fn on_error(&self, listener: SignalListener) {
        self.bus().on(signals::ERROR, listener);
    }

    // ─── Namespace façade ──────────────────────────────────────────────────

    /// Method proxy bound to `vendor.module` with default call options.
    #[must_use]
    pub fn api(&self, vendor: &str, module: &str) -> ApiProxy {
        ApiProxy::new(self.clone(), format!("{vendor}.{module}"))
    }

    // ─── Handler registration ──────────────────────────────────────────────

    /// Install `handler` at `<self>.<local_name>`.
    ///
    /// Installation is one-shot: returns `false` (leaving the original in
    /// place) when the key is taken, and rejects the reserved proxy names.
    pub fn register_api_handler(&self, local_name: &str, handler: MethodHandler) -> bool {
        if RESERVED_METHOD_NAMES.contains(&local_name) {
            log::warn!(
                "[Broker:{}] \"{local_name}\" is reserved and cannot be registered",
                self.module_name()
            );
            return false;
        }
        let fqn = join_fqn(self.module_name(), local_name);
        let installed = self.state().insert_handler(&fqn, handler, false);
        if !installed {
            log::debug!(
                "[Broker:{}] \"{fqn}\" already has a handler installed",
                self.module_name()
            );
        }
        installed
    }

    /// Bulk-install handlers and register them with `remote`
    /// (default `hub.core`) so it relays matching method traffic here.
    pub async fn register_api_handlers<I>(
        &self,
        handlers: I,
        remote: Option<&str>,
    ) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = (String, MethodHandler)>,
    {
        for (local_name, handler) in handlers {
            let _ = self.register_api_handler(&local_name, handler);
        }
        self.register_handlers_to_remote(remote.unwrap_or(DEFAULT_REGISTRAR))
            .await
    }

    /// Record `target` as a registrar and announce this client's handler
    /// keys to it. Re-announced automatically on every (re)connect.
    pub async fn register_handlers_to_remote(&self, target: &str) -> Result<(), BrokerError> {
        if !is_module_name(target) {
            return Err(BrokerError::Validation(format!(
                "\"{target}\" is not a module name"
            )));
        }

        let keys = {
            let mut state = self.state();
            state.registrars.insert(target.to_string());
            state.handler_keys()
        };

        let mut message = Message::new(join_fqn(target, "registerAPIHandlers"));
        message.target_module_name = Some(target.to_string());
        message.data = Some(keys.into_iter().map(Value::String).collect());
        self.send(message, false).await.map(|_data| ())
    }

    /// Withdraw this client's handler keys from every recorded registrar.
    pub async fn deregister_handlers_from_remotes(&self) {
        let (registrars, keys) = {
            let mut state = self.state();
            let registrars: Vec<String> = state.registrars.drain().collect();
            (registrars, state.handler_keys())
        };

        for registrar in registrars {
            let mut message = Message::new(join_fqn(&registrar, "deregisterAPIHandlers"));
            message.target_module_name = Some(registrar.clone());
            message.data = Some(keys.iter().cloned().map(Value::String).collect());
            if let Err(err) = self.send(message, false).await {
                log::debug!(
                    "[Broker:{}] deregistration from {registrar} failed: {err}",
                    self.module_name()
                );
            }
        }
    }

    // ─── Subscriptions ─────────────────────────────────────────────────────

    /// Subscribe `handler` to `event_fqn` and announce the subscription to
    /// the event's owning module.
    pub async fn subscribe_to_api_event(
        &self,
        event_fqn: &str,
        handler: EventHandler,
    ) -> Result<(), BrokerError> {
        self.subscribe_to_api_event_with(event_fqn, handler, SubscribeOptions::default())
            .await
    }

    /// [`Self::subscribe_to_api_event`] with explicit options.
    ///
    /// A timed-out subscription acknowledgement is logged, not surfaced —
    /// the local table entry is live either way and a later resubscribe
    /// will repeat the announcement.
    pub async fn subscribe_to_api_event_with(
        &self,
        event_fqn: &str,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> Result<(), BrokerError> {
        if crate::message::event_target(event_fqn).is_none() {
            return Err(BrokerError::Validation(format!(
                "\"{event_fqn}\" is not an event name (vendor.module.event)"
            )));
        }

        self.state()
            .append_subscription(event_fqn, handler, options.once);

        if options.send_message {
            match self
                .send(Message::subscription(kind::SUBSCRIBE, event_fqn), false)
                .await
            {
                Ok(_data) => {}
                Err(err) if err.is_timeout() => {
                    log::debug!(
                        "[Broker:{}] subscribe acknowledgement for \"{event_fqn}\" timed out",
                        self.module_name()
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Remove subscriptions for `event_fqn`: the first identity-matching
    /// entry when `handler` is given, the whole entry otherwise. With
    /// `send_message`, the owning module is told as well.
    pub async fn unsubscribe_from_api_event(
        &self,
        event_fqn: &str,
        handler: Option<&EventHandler>,
        send_message: bool,
    ) -> Result<(), BrokerError> {
        let _removed = self.state().remove_subscription(event_fqn, handler);

        if send_message {
            match self
                .send(Message::subscription(kind::UNSUBSCRIBE, event_fqn), false)
                .await
            {
                Ok(_data) => {}
                Err(err) if err.is_timeout() => {
                    log::debug!(
                        "[Broker:{}] unsubscribe acknowledgement for \"{event_fqn}\" timed out",
                        self.module_name()
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Drop every subscription, announcing each removal.
    pub async fn unsubscribe_from_all_events(&self) {
        let subscription_keys = self.state().subscription_keys();
        for event_fqn in subscription_keys {
            if let Err(err) = self
                .unsubscribe_from_api_event(&event_fqn, None, true)
                .await
            {
                log::debug!(
                    "[Broker:{}] unsubscribe from \"{event_fqn}\" failed: {err}",
                    self.module_name()
                );
            }
        }
    }

    // ─── Outbound path ─────────────────────────────────────────────────────

    /// Send `message`, correlating a response unless it is fire-and-forget.
    ///
    /// Assigns a fresh id and send time, stamps the sender (preserved when
    /// `relayed`), and writes through the family's shared socket. Requests
    /// gate on the transport being open, bounded by their own deadline.
    /// Failures are emitted on the `error` signal instead of returned when
    /// a listener is attached.
    pub(crate) async fn send(
        &self,
        mut message: Message,
        relayed: bool,
    ) -> Result<Vec<Value>, BrokerError> {
        if self.state().destroyed {
            return Err(BrokerError::Transport("client has been destroyed".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        message.id = Some(id.clone());
        message.time = Some(chrono::Utc::now().timestamp_millis());
        if !relayed || message.module_name.is_none() {
            message.module_name = Some(self.module_name().to_string());
        }

        let deadline = self
            .inner
            .config
            .effective_timeout(message.timeout.map(Duration::from_millis));
        let fire_and_forget = message.is_fire_and_forget();

        if !fire_and_forget && !self.is_connected() {
            if let Err(err) = self.wait_connected_within(deadline).await {
                return self.fail_or_emit(err);
            }
        }

        let raw = match serde_json::to_string(&message) {
            Ok(raw) => raw,
            Err(err) => {
                return Err(BrokerError::Transport(format!(
                    "message serialization failed: {err}"
                )))
            }
        };
        if raw.len() > self.inner.config.max_packet_size {
            log::trace!(
                "[Broker:{}] outbound \"{}\" packet is {} bytes (limit {})",
                self.module_name(),
                message.kind,
                raw.len(),
                self.inner.config.max_packet_size
            );
        }

        if fire_and_forget {
            self.send_raw(&raw)?;
            return Ok(Vec::new());
        }

        let (sender, receiver) = oneshot::channel();
        self.state().pending.insert(id.clone(), sender);

        if let Err(err) = self.send_raw(&raw) {
            let _ = self.state().take_pending(&id);
            return self.fail_or_emit(err);
        }

        match tokio::time::timeout(deadline, receiver).await {
            Err(_elapsed) => {
                let _ = self.state().take_pending(&id);
                self.fail_or_emit(BrokerError::Timeout)
            }
            Ok(Err(_dropped)) => {
                let _ = self.state().take_pending(&id);
                self.fail_or_emit(BrokerError::Transport(
                    "connection closed before the response arrived".to_string(),
                ))
            }
            Ok(Ok(response)) => {
                if response.success == Some(false) {
                    let reason = response.first_error().map_or_else(
                        || {
                            format!(
                                "{}'s \"{}\" request has failed",
                                self.module_name(),
                                message.kind
                            )
                        },
                        str::to_string,
                    );
                    self.fail_or_emit(BrokerError::Broker(reason))
                } else {
                    Ok(response.data.unwrap_or_default())
                }
            }
        }
    }

    /// Send a `response` echoing the original's correlation fields.
    ///
    /// On relay, the outbound sender is rewritten to the original target so
    /// the far side sees the response as coming from the intended module.
    /// A missing socket is a silent no-op.
    pub(crate) async fn respond(
        &self,
        original: &Message,
        success: bool,
        data: Vec<Value>,
        relayed: bool,
    ) {
        let mut response = Message::new(kind::RESPONSE);
        response.request_id = original.id.clone();
        response.timeout = original.timeout;
        response.instigator_id = original.instigator_id.clone();
        response.target_module_name = original.target_module_name.clone();
        response.success = Some(success);
        response.data = Some(data);
        if relayed {
            response.module_name = original.target_module_name.clone();
        }

        if let Err(err) = self.send(response, relayed).await {
            log::trace!(
                "[Broker:{}] response for {:?} not sent: {err}",
                self.module_name(),
                original.id
            );
        }
    }

    /// Queue a serialized frame on the family's shared socket.
    pub(crate) fn send_raw(&self, raw: &str) -> Result<(), BrokerError> {
        let root = self.root_inner();
        let outbound = root.parent_state().outbound.lock().expect("outbound lock");
        match outbound.as_ref() {
            Some(queue) => queue
                .send(raw.to_string())
                .map_err(|_closed| BrokerError::Transport("connection task stopped".to_string())),
            None => Err(BrokerError::Transport("socket is not open".to_string())),
        }
    }

    /// Route an RPC failure: emitted on the `error` signal when someone
    /// listens (the call then resolves empty), returned otherwise.
    fn fail_or_emit(&self, err: BrokerError) -> Result<Vec<Value>, BrokerError> {
        if err.is_timeout() {
            // Expected failure mode — keep it out of warn-level noise.
            log::debug!("[Broker:{}] request timed out", self.module_name());
        }
        if self.bus().has_listeners(signals::ERROR) {
            self.bus().emit(signals::ERROR, &[err.to_signal_value()]);
            Ok(Vec::new())
        } else {
            Err(err)
        }
    }

    // ─── Internal plumbing ─────────────────────────────────────────────────

    pub(crate) fn downgrade(&self) -> WeakBrokerClient {
        WeakBrokerClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The family's parent inner (self for parents).
    fn root_inner(&self) -> Arc<ClientInner> {
        match &self.inner.family {
            Family::Parent(_) => Arc::clone(&self.inner),
            Family::Duplicate { parent } => Arc::clone(parent),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ClientState> {
        self.inner.state.lock().expect("client state lock")
    }

    pub(crate) fn bus(&self) -> &SignalBus {
        &self.inner.bus
    }

    pub(crate) fn ws_path(&self) -> &str {
        &self.inner.ws_path
    }

    /// Live duplicates of this client. Empty for duplicates — families are
    /// one level deep by construction.
    pub(crate) fn live_duplicates(&self) -> Vec<BrokerClient> {
        match &self.inner.family {
            Family::Duplicate { .. } => Vec::new(),
            Family::Parent(parent) => {
                let mut handles = Vec::new();
                parent
                    .duplicates
                    .lock()
                    .expect("duplicates lock")
                    .retain(|weak| match weak.upgrade() {
                        Some(inner) => {
                            handles.push(BrokerClient { inner });
                            true
                        }
                        None => false,
                    });
                handles
            }
        }
    }

    /// Install (or clear) the outbound queue of the live socket session.
    pub(crate) fn install_outbound(&self, queue: Option<mpsc::UnboundedSender<String>>) {
        *self
            .root_inner()
            .parent_state()
            .outbound
            .lock()
            .expect("outbound lock") = queue;
    }

    pub(crate) fn current_options(&self) -> Option<ConnectOptions> {
        self.root_inner()
            .parent_state()
            .last_options
            .lock()
            .expect("connect options lock")
            .clone()
    }

    pub(crate) fn mark_task_stopped(&self) {
        self.root_inner()
            .parent_state()
            .task_running
            .store(false, Ordering::SeqCst);
    }

    /// Parent inner of this family, for the connection task's select loop.
    pub(crate) fn root(&self) -> Arc<ClientInner> {
        self.root_inner()
    }
}

// Notify accessors used by the connection task's select loop.
impl ClientInner {
    pub(crate) async fn shutdown_requested(&self) {
        self.parent_state().shutdown.notified().await;
    }

    pub(crate) async fn reconnect_requested(&self) {
        self.parent_state().reconnect.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{method, HandlerValue};

    fn test_client() -> BrokerClient {
        BrokerClient::with_config("acme.sum", "/core", BrokerConfig::default())
    }

    fn noop() -> MethodHandler {
        method(|_args| async { Ok(HandlerValue::Value(Value::Null)) })
    }

    #[tokio::test]
    async fn test_register_api_handler_is_one_shot() {
        let client = test_client();
        assert!(client.register_api_handler("add", noop()));
        assert!(!client.register_api_handler("add", noop()));
        assert!(client.state().handlers.contains_key("acme.sum.add"));
    }

    #[tokio::test]
    async fn test_reserved_names_are_rejected() {
        let client = test_client();
        for reserved in ["emit", "on", "off"] {
            assert!(!client.register_api_handler(reserved, noop()));
        }
        assert!(client.state().handlers.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_family_bookkeeping() {
        let parent = test_client();
        let dup_a = parent.duplicate("acme.alpha");
        let dup_b = dup_a.duplicate("acme.beta");

        assert!(dup_a.is_duplicate());
        assert!(dup_b.is_duplicate());
        // Duplicates of duplicates attach to the original parent.
        assert_eq!(parent.live_duplicates().len(), 2);
        assert!(dup_b.live_duplicates().is_empty());

        dup_a.destroy().await;
        let remaining = parent.live_duplicates();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].module_name(), "acme.beta");
    }

    #[tokio::test]
    async fn test_is_connected_delegates_to_parent() {
        let parent = test_client();
        let dup = parent.duplicate("acme.other");
        assert!(!dup.is_connected());

        parent.state().connected = true;
        assert!(dup.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_socket_times_out_on_connect_gate() {
        let client = test_client();
        let mut message = Message::new("acme.other.noop");
        message.timeout = Some(30);

        let err = client
            .send(message, false)
            .await
            .expect_err("no socket, gate must time out");
        assert_eq!(err.code(), Some("TIMEOUT"));
    }

    #[tokio::test]
    async fn test_error_listener_swallows_failures() {
        let client = test_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_error(Arc::new(move |args| {
            sink.lock().expect("seen lock").extend(args.to_vec());
        }));

        let mut message = Message::new("acme.other.noop");
        message.timeout = Some(30);
        let result = client.send(message, false).await.expect("emitted, not thrown");
        assert!(result.is_empty());

        let seen = seen.lock().expect("seen lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn test_event_send_fails_fast_without_socket() {
        let client = test_client();
        let err = client
            .send(Message::event("acme.sum.tick", Vec::new()), false)
            .await
            .expect_err("no socket");
        assert!(matches!(err, BrokerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connect_on_duplicate_is_rejected() {
        let parent = test_client();
        let dup = parent.duplicate("acme.other");
        assert!(dup.connect("localhost", Some(1)).is_err());
    }

    #[tokio::test]
    async fn test_register_handlers_to_remote_validates_target() {
        let client = test_client();
        let err = client
            .register_handlers_to_remote("not-a-module")
            .await
            .expect_err("invalid module name");
        assert!(matches!(err, BrokerError::Validation(_)));
    }
}
