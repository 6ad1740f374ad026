//! Hub transport: the WebSocket link a broker family shares.
//!
//! The broker assumes nothing about its connection beyond "bidirectional,
//! message-framed, delivered in order". This module is the only place the
//! concrete tungstenite types appear: [`connect`] performs the handshake
//! and hands back independent [`WsWriter`] / [`WsReader`] halves, so the
//! connection task can drain its outbound queue while a `select!` loop
//! reads inbound traffic.
//!
//! Broker traffic is UTF-8 JSON, one [`crate::message::Message`] per text
//! frame. Everything else on the wire is transport plumbing: ping/pong
//! keepalive and the close handshake. [`WsMessage`] reduces inbound frames
//! to exactly that set.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

/// Concrete stream behind the writer/reader halves.
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Close code reported when the peer closed without sending one.
const CLOSE_NO_STATUS: u16 = 1005;

/// An inbound frame, reduced to what the broker dispatches on.
#[derive(Debug)]
pub enum WsMessage {
    /// A JSON-encoded broker message.
    Text(String),
    /// Binary payload. The broker protocol never produces these; the
    /// dispatcher skips them.
    Binary(Vec<u8>),
    /// Transport keepalive probe; answer with [`WsWriter::send_pong`].
    Ping(Vec<u8>),
    /// Keepalive answer from the peer.
    Pong(Vec<u8>),
    /// The peer ended the connection.
    Close {
        /// Close status code, 1005 when the peer sent none.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

impl WsMessage {
    /// Map a tungstenite frame onto the broker's view of the stream.
    ///
    /// Protocol-internal fragments carry no broker meaning and map to
    /// `None`; the reader keeps going past them.
    fn from_frame(frame: tungstenite::Message) -> Option<Self> {
        match frame {
            tungstenite::Message::Text(text) => Some(Self::Text(text.to_string())),
            tungstenite::Message::Binary(payload) => Some(Self::Binary(payload.to_vec())),
            tungstenite::Message::Ping(payload) => Some(Self::Ping(payload.to_vec())),
            tungstenite::Message::Pong(payload) => Some(Self::Pong(payload.to_vec())),
            tungstenite::Message::Close(close_frame) => {
                let (code, reason) = match close_frame {
                    Some(frame) => (frame.code.into(), frame.reason.to_string()),
                    None => (CLOSE_NO_STATUS, String::new()),
                };
                Some(Self::Close { code, reason })
            }
            tungstenite::Message::Frame(_) => None,
        }
    }
}

/// Outbound half of the hub connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Write one serialized broker message as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is gone or the write fails.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("writing text frame to hub failed")
    }

    /// Answer a transport ping.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(payload))
            .await
            .context("writing pong frame to hub failed")
    }

    /// Announce an orderly shutdown with an explicit close frame.
    ///
    /// Used on destroy so the hub sees a deliberate departure instead of a
    /// dropped socket. Follow with [`Self::close`] to flush and release the
    /// outbound half.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("writing close frame to hub failed")
    }

    /// Flush pending writes and release the outbound half.
    ///
    /// # Errors
    ///
    /// Returns an error when the flush or shutdown fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .context("shutting down hub connection failed")
    }
}

/// Inbound half of the hub connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Next frame the broker can act on; `None` once the stream ends.
    ///
    /// Frames without broker meaning are skipped here so the dispatch loop
    /// only ever sees [`WsMessage`] values.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(frame) => {
                    if let Some(message) = WsMessage::from_frame(frame) {
                        return Some(Ok(message));
                    }
                }
                Err(err) => {
                    return Some(Err(anyhow::anyhow!("reading from hub failed: {err}")));
                }
            }
        }
    }
}

/// Open the hub connection and split it into writer/reader halves.
///
/// # Errors
///
/// Returns an error when the URL does not parse or the handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (stream, _handshake_response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("hub handshake with {url} failed"))?;

    let (sink, stream) = stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Build the hub connection URL: `ws://host[:port]<path>`.
///
/// `tls` upgrades the scheme to `wss://`. The path must start with `/`;
/// on non-browser hosts there is no ambient location to infer it from, so
/// callers always supply one (the broker defaults to `/core`).
#[must_use]
pub fn build_url(host: &str, port: Option<u16>, path: &str, tls: bool) -> String {
    let scheme = if tls { "wss" } else { "ws" };
    match port {
        Some(port) => format!("{scheme}://{host}:{port}{path}"),
        None => format!("{scheme}://{host}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_with_port() {
        assert_eq!(
            build_url("localhost", Some(8080), "/core", false),
            "ws://localhost:8080/core"
        );
    }

    #[test]
    fn test_build_url_without_port() {
        assert_eq!(
            build_url("hub.example.com", None, "/core", false),
            "ws://hub.example.com/core"
        );
    }

    #[test]
    fn test_build_url_tls() {
        assert_eq!(
            build_url("hub.example.com", Some(443), "/core", true),
            "wss://hub.example.com:443/core"
        );
    }

    #[test]
    fn test_build_url_custom_path() {
        assert_eq!(
            build_url("127.0.0.1", Some(9000), "/broker", false),
            "ws://127.0.0.1:9000/broker"
        );
    }

    #[test]
    fn test_text_frame_maps_to_broker_message() {
        let frame = tungstenite::Message::Text("{\"type\":\"ping\"}".to_string());
        match WsMessage::from_frame(frame) {
            Some(WsMessage::Text(text)) => assert_eq!(text, "{\"type\":\"ping\"}"),
            other => panic!("expected a text message, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_close_reports_no_status_code() {
        match WsMessage::from_frame(tungstenite::Message::Close(None)) {
            Some(WsMessage::Close { code, reason }) => {
                assert_eq!(code, CLOSE_NO_STATUS);
                assert!(reason.is_empty());
            }
            other => panic!("expected a close message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        assert!(connect("not a url").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_surfaces_refused_connection() {
        // Port 1 on loopback has nothing listening.
        assert!(connect("ws://127.0.0.1:1/core").await.is_err());
    }
}
