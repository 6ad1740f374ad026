//! Background connection task: transport lifecycle for a duplicate family.
//!
//! One task per parent client owns the WebSocket. It dials, runs a
//! `tokio::select!` loop over the reader, the family's outbound queue, and
//! the shutdown/reconnect wakeups, and on close schedules a retry with the
//! same options one second later. Open and close are cascaded through every
//! live duplicate so each member observes the shared transport's lifecycle
//! on its own signal bus.

// Rust guideline compliant 2026-02

use tokio::sync::mpsc;

use crate::constants::RECONNECT_DELAY;
use crate::message::join_fqn;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

use super::{dispatch, signals, BrokerClient};

/// Start the connection task for `client` (a parent).
pub(super) fn spawn(client: BrokerClient) {
    tokio::spawn(run_connection_loop(client));
}

/// Why the per-socket I/O loop returned.
enum IoExit {
    /// Connection lost or force-reconnect requested — dial again.
    Disconnected,
    /// Destroy requested — stop for good.
    Shutdown,
}

async fn run_connection_loop(client: BrokerClient) {
    loop {
        if client.state().destroyed {
            break;
        }
        let Some(options) = client.current_options() else {
            break;
        };

        let url = ws::build_url(&options.host, options.port, client.ws_path(), options.tls);
        log::info!("[Broker:{}] connecting to {url}", client.module_name());

        match ws::connect(&url).await {
            Err(err) => {
                log::warn!(
                    "[Broker:{}] connection failed: {err:#} (retry in {}ms)",
                    client.module_name(),
                    RECONNECT_DELAY.as_millis()
                );
                if wait_for_retry(&client).await {
                    break;
                }
            }
            Ok((writer, reader)) => {
                log::info!("[Broker:{}] connected", client.module_name());

                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                client.install_outbound(Some(outbound_tx));
                handle_open(&client);

                let exit = run_io_loop(&client, writer, reader, outbound_rx).await;

                client.install_outbound(None);
                handle_close(&client);

                if matches!(exit, IoExit::Shutdown) || client.state().destroyed {
                    break;
                }
                log::info!(
                    "[Broker:{}] disconnected, reconnecting in {}ms",
                    client.module_name(),
                    RECONNECT_DELAY.as_millis()
                );
                if wait_for_retry(&client).await {
                    break;
                }
            }
        }
    }

    client.mark_task_stopped();
    log::debug!("[Broker:{}] connection task exited", client.module_name());
}

/// Sleep out the retry delay. Returns `true` when destroy arrived instead.
async fn wait_for_retry(client: &BrokerClient) -> bool {
    let root = client.root();
    tokio::select! {
        () = tokio::time::sleep(RECONNECT_DELAY) => false,
        () = root.shutdown_requested() => true,
    }
}

/// Per-socket I/O loop: route frames, drain the outbound queue, watch for
/// teardown.
async fn run_io_loop(
    client: &BrokerClient,
    mut writer: WsWriter,
    mut reader: WsReader,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) -> IoExit {
    let root = client.root();

    loop {
        tokio::select! {
            frame = reader.recv() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    dispatch::dispatch_frame(client, &text).await;
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = writer.send_pong(payload).await;
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    log::info!(
                        "[Broker:{}] connection closed by server ({code}: {reason})",
                        client.module_name()
                    );
                    return IoExit::Disconnected;
                }
                Some(Ok(_)) => {
                    // Binary and pong frames carry nothing for the broker.
                }
                Some(Err(err)) => {
                    handle_transport_error(client, &err);
                    return IoExit::Disconnected;
                }
                None => {
                    log::info!("[Broker:{}] stream ended", client.module_name());
                    return IoExit::Disconnected;
                }
            },

            queued = outbound_rx.recv() => match queued {
                Some(raw) => {
                    if let Err(err) = writer.send_text(&raw).await {
                        log::warn!(
                            "[Broker:{}] send failed: {err:#}",
                            client.module_name()
                        );
                        return IoExit::Disconnected;
                    }
                }
                // Queue cleared from destroy().
                None => {
                    let _ = writer.send_close().await;
                    let _ = writer.close().await;
                    return IoExit::Shutdown;
                }
            },

            () = root.shutdown_requested() => {
                // Deliberate departure: tell the hub before releasing the
                // socket, so it does not read this as a crash.
                let _ = writer.send_close().await;
                let _ = writer.close().await;
                return IoExit::Shutdown;
            }

            () = root.reconnect_requested() => {
                log::info!("[Broker:{}] forced reconnect", client.module_name());
                let _ = writer.close().await;
                return IoExit::Disconnected;
            }
        }
    }
}

/// Transport open: mark connected, announce, re-register, cascade.
fn handle_open(client: &BrokerClient) {
    client.state().connected = true;
    client.bus().emit(signals::CONNECT, &[]);
    reregister_with_registrars(client);

    for duplicate in client.live_duplicates() {
        duplicate.bus().emit(signals::CONNECT, &[]);
        // The server only pings the socket owner; duplicates introduce
        // themselves so it learns their module names.
        let pinger = duplicate.clone();
        tokio::spawn(async move {
            if let Err(err) = pinger.ping().await {
                log::debug!(
                    "[Broker:{}] introduction ping failed: {err}",
                    pinger.module_name()
                );
            }
        });
        reregister_with_registrars(&duplicate);
    }
}

/// Transport closed: flip state, drop the stale peer-lifecycle tap, fail
/// in-flight waiters, cascade. The caller schedules the reconnect.
fn handle_close(client: &BrokerClient) {
    let was_connected = {
        let mut state = client.state();
        let was = state.connected;
        state.connected = false;
        was
    };
    if !was_connected {
        return;
    }

    surface_close(client);
    for duplicate in client.live_duplicates() {
        surface_close(&duplicate);
    }
}

fn surface_close(client: &BrokerClient) {
    {
        let mut state = client.state();
        // The tap is re-installed from the next server ping; a stale entry
        // would accumulate across reconnects.
        if let Some(server) = state.server_module_name.clone() {
            let _ = state.remove_subscription(&join_fqn(&server, "moduleconnect"), None);
        }
        state.fail_pending();
    }
    client.bus().emit(signals::DISCONNECT, &[]);
}

/// Transport error: user-visible warning, cascaded to every family member.
/// The close that follows drives the reconnect.
fn handle_transport_error(client: &BrokerClient, err: &anyhow::Error) {
    log::warn!("[Broker:{}] transport error: {err:#}", client.module_name());
    for duplicate in client.live_duplicates() {
        log::warn!(
            "[Broker:{}] transport error on shared socket: {err:#}",
            duplicate.module_name()
        );
    }
}

/// Announce this client's handler keys to every recorded registrar, off the
/// connection task so responses can flow while the sends await them.
fn reregister_with_registrars(client: &BrokerClient) {
    let registrars: Vec<String> = client.state().registrars.iter().cloned().collect();
    if registrars.is_empty() {
        return;
    }
    let client = client.clone();
    tokio::spawn(async move {
        for target in registrars {
            if let Err(err) = client.register_handlers_to_remote(&target).await {
                log::warn!(
                    "[Broker:{}] re-registration with {target} failed: {err}",
                    client.module_name()
                );
            }
        }
    });
}
