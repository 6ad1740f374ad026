//! Named-signal bus for client lifecycle and control notifications.
//!
//! Each client owns one [`SignalBus`] carrying its `connect`, `disconnect`,
//! `error`, `destroy`, and local `subscribe`/`unsubscribe` signals. The bus
//! supports persistent listeners ([`SignalBus::on`]) and a
//! wait-for-one-of-many primitive: [`SignalBus::watch`] registers one-shot
//! waiters for a set of names *synchronously* (so callers can re-check
//! state after registering without racing the emitter), and the returned
//! [`SignalWait`] resolves with whichever named signal fires first, tearing
//! down every waiter it installed regardless of which name won.
//!
//! Response correlation deliberately does *not* ride on this bus: pending
//! requests live in a typed id → one-shot map on the client, so a late
//! response after a timeout finds no slot and is dropped at dispatch.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BrokerError;

/// Persistent signal listener. Invoked inline on emit, outside the bus lock.
pub type SignalListener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Shared single-shot slot: the first signal to fire takes the sender.
type WaiterSlot = Arc<Mutex<Option<oneshot::Sender<(String, Vec<Value>)>>>>;

/// One-shot waiter installed under a signal name by [`SignalBus::watch`].
struct Waiter {
    token: u64,
    slot: WaiterSlot,
}

#[derive(Default)]
struct BusInner {
    listeners: HashMap<String, Vec<SignalListener>>,
    waiters: HashMap<String, Vec<Waiter>>,
}

/// Per-client named-signal emitter.
#[derive(Default)]
pub struct SignalBus {
    inner: Mutex<BusInner>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("signal bus lock");
        f.debug_struct("SignalBus")
            .field("listener_signals", &inner.listeners.len())
            .field("waiter_signals", &inner.waiters.len())
            .finish()
    }
}

impl SignalBus {
    /// New empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a persistent listener for `signal`.
    pub fn on(&self, signal: &str, listener: SignalListener) {
        let mut inner = self.inner.lock().expect("signal bus lock");
        inner
            .listeners
            .entry(signal.to_string())
            .or_default()
            .push(listener);
    }

    /// `true` when at least one persistent listener is installed for
    /// `signal`. Used to decide between throwing and emitting RPC errors.
    #[must_use]
    pub fn has_listeners(&self, signal: &str) -> bool {
        let inner = self.inner.lock().expect("signal bus lock");
        inner.listeners.get(signal).is_some_and(|l| !l.is_empty())
    }

    /// Fire `signal` with `args`: every persistent listener runs, and every
    /// pending [`SignalWait`] registered under this name resolves.
    pub fn emit(&self, signal: &str, args: &[Value]) {
        let (listeners, waiters) = {
            let mut inner = self.inner.lock().expect("signal bus lock");
            let listeners = inner.listeners.get(signal).cloned().unwrap_or_default();
            let waiters = inner.waiters.remove(signal).unwrap_or_default();
            (listeners, waiters)
        };

        for waiter in waiters {
            let sender = waiter.slot.lock().expect("waiter slot lock").take();
            if let Some(sender) = sender {
                // Receiver may already be gone (timed out); nothing to do.
                let _ = sender.send((signal.to_string(), args.to_vec()));
            }
        }

        // Listeners run outside the lock so they may re-enter the bus.
        for listener in listeners {
            listener(args);
        }
    }

    /// Register one-shot waiters for every name in `signals` and return a
    /// [`SignalWait`] to await the first of them.
    ///
    /// Registration happens before this returns, so a caller can check
    /// state *after* watching and never miss an emit in between.
    #[must_use]
    pub fn watch(&self, signals: &[&str]) -> SignalWait<'_> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let slot: WaiterSlot = Arc::new(Mutex::new(Some(sender)));

        {
            let mut inner = self.inner.lock().expect("signal bus lock");
            for signal in signals {
                inner
                    .waiters
                    .entry((*signal).to_string())
                    .or_default()
                    .push(Waiter {
                        token,
                        slot: Arc::clone(&slot),
                    });
            }
        }

        SignalWait {
            bus: self,
            token,
            signals: signals.iter().map(|s| (*s).to_string()).collect(),
            receiver,
        }
    }

    /// Resolve with the name and argument list of whichever of `signals`
    /// fires first.
    ///
    /// Every waiter installed by this call is removed on resolution, timeout,
    /// or bus teardown — including the waiters for signals that never fired.
    /// A zero or absent `timeout` arms no timer. On deadline the call fails
    /// with [`BrokerError::Timeout`] (`code = "TIMEOUT"`).
    pub async fn wait_any(
        &self,
        signals: &[&str],
        timeout: Option<Duration>,
    ) -> Result<(String, Vec<Value>), BrokerError> {
        if signals.is_empty() {
            return Err(BrokerError::Validation(
                "wait_any requires at least one signal name".to_string(),
            ));
        }
        self.watch(signals).wait(timeout).await
    }

    /// Drop every listener and pending waiter. Called on client destroy;
    /// in-flight waits resolve with a transport error.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("signal bus lock");
        inner.listeners.clear();
        inner.waiters.clear();
    }

    fn remove_waiters(&self, token: u64, signals: &[String]) {
        let mut inner = self.inner.lock().expect("signal bus lock");
        for signal in signals {
            if let Some(list) = inner.waiters.get_mut(signal) {
                list.retain(|w| w.token != token);
                if list.is_empty() {
                    inner.waiters.remove(signal);
                }
            }
        }
    }
}

/// Pending wait-for-one-of-many registration.
///
/// Dropping it (awaited or not) removes every waiter it installed.
pub struct SignalWait<'bus> {
    bus: &'bus SignalBus,
    token: u64,
    signals: Vec<String>,
    receiver: oneshot::Receiver<(String, Vec<Value>)>,
}

impl std::fmt::Debug for SignalWait<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalWait")
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

impl SignalWait<'_> {
    /// Await the first of the watched signals.
    ///
    /// A zero or absent `timeout` arms no timer; on deadline the wait fails
    /// with [`BrokerError::Timeout`].
    pub async fn wait(
        mut self,
        timeout: Option<Duration>,
    ) -> Result<(String, Vec<Value>), BrokerError> {
        let receiver = &mut self.receiver;
        let timeout = timeout.filter(|d| !d.is_zero());
        match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, receiver).await {
                Ok(received) => received.map_err(|_closed| {
                    BrokerError::Transport("signal bus torn down while waiting".to_string())
                }),
                Err(_elapsed) => Err(BrokerError::Timeout),
            },
            None => receiver.await.map_err(|_closed| {
                BrokerError::Transport("signal bus torn down while waiting".to_string())
            }),
        }
        // Waiter entries are removed by Drop.
    }
}

impl Drop for SignalWait<'_> {
    fn drop(&mut self) {
        self.bus.remove_waiters(self.token, &self.signals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_wait_any_resolves_with_first_signal() {
        let bus = Arc::new(SignalBus::new());
        let emitter = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.emit("connect", &[serde_json::json!("ready")]);
        });

        let (name, args) = bus
            .wait_any(&["connect", "disconnect"], Some(Duration::from_secs(1)))
            .await
            .expect("signal fires");
        assert_eq!(name, "connect");
        assert_eq!(args, vec![serde_json::json!("ready")]);
    }

    #[tokio::test]
    async fn test_wait_any_times_out_with_stable_code() {
        let bus = SignalBus::new();
        let err = bus
            .wait_any(&["never"], Some(Duration::from_millis(20)))
            .await
            .expect_err("deadline fires");
        assert_eq!(err.code(), Some("TIMEOUT"));
    }

    #[tokio::test]
    async fn test_watch_registers_before_await() {
        let bus = SignalBus::new();
        let wait = bus.watch(&["connect"]);

        // Emitted before the wait is polled — must still be observed.
        bus.emit("connect", &[]);

        let (name, _) = wait
            .wait(Some(Duration::from_millis(50)))
            .await
            .expect("pre-poll emit is captured");
        assert_eq!(name, "connect");
    }

    #[tokio::test]
    async fn test_waiters_are_torn_down_after_resolution() {
        let bus = SignalBus::new();

        let wait = bus.watch(&["a", "b"]);
        bus.emit("a", &[]);
        let (name, _) = wait.wait(Some(Duration::from_secs(1))).await.expect("resolves");
        assert_eq!(name, "a");

        // The loser's waiter must be gone too.
        let inner = bus.inner.lock().expect("lock");
        assert!(inner.waiters.is_empty());
    }

    #[tokio::test]
    async fn test_waiters_are_torn_down_after_timeout() {
        let bus = SignalBus::new();
        let _ = bus
            .wait_any(&["a", "b"], Some(Duration::from_millis(10)))
            .await;
        let inner = bus.inner.lock().expect("lock");
        assert!(inner.waiters.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_watch_removes_waiters() {
        let bus = SignalBus::new();
        let wait = bus.watch(&["a"]);
        drop(wait);
        let inner = bus.inner.lock().expect("lock");
        assert!(inner.waiters.is_empty());
    }

    #[tokio::test]
    async fn test_persistent_listeners_fire_every_emit() {
        let bus = SignalBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&count);
        bus.on(
            "tick",
            Arc::new(move |_args| {
                observed.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(bus.has_listeners("tick"));
        assert!(!bus.has_listeners("tock"));

        bus.emit("tick", &[]);
        bus.emit("tick", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_timeout_arms_no_timer() {
        let bus = Arc::new(SignalBus::new());
        let emitter = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            emitter.emit("late", &[]);
        });

        // Zero means "no deadline", so this must wait for the emit.
        let (name, _) = bus
            .wait_any(&["late"], Some(Duration::ZERO))
            .await
            .expect("resolves without timer");
        assert_eq!(name, "late");
    }

    #[tokio::test]
    async fn test_clear_fails_pending_waits() {
        let bus = Arc::new(SignalBus::new());
        let waiter = Arc::clone(&bus);
        let handle = tokio::spawn(async move { waiter.wait_any(&["never"], None).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.clear();

        let err = handle.await.expect("join").expect_err("torn down");
        assert!(matches!(err, BrokerError::Transport(_)));
    }
}
