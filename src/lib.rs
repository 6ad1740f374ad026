//! Client-side message broker for hub-connected modules.
//!
//! Every module of the distributed system embeds a [`BrokerClient`] to
//! reach the central hub over a single WebSocket and exchange three kinds
//! of traffic: request/response method invocations, fire-and-forget events
//! with subscription semantics, and control messages (ping, subscribe /
//! unsubscribe, handler registration).
//!
//! # Quick start
//!
//! ```ignore
//! use hubwire::{handler, HandlerValue, InitModuleOptions, HubAddress};
//!
//! let client = hubwire::init_module(InitModuleOptions::new(
//!     "acme.sum",
//!     HubAddress::new("127.0.0.1", Some(8080)),
//! ))
//! .await?;
//!
//! // Serve a method
//! client.api("acme", "sum").register("add", handler::method(|args| async move {
//!     let a = args[0].as_i64().unwrap_or(0);
//!     let b = args[1].as_i64().unwrap_or(0);
//!     Ok(HandlerValue::Value((a + b).into()))
//! }))?;
//! client.register_handlers_to_remote("hub.core").await?;
//!
//! // Call a peer
//! let product = client.api("acme", "calc").call("mul", vec![6.into(), 7.into()]).await?;
//!
//! // Observe a peer's events
//! client.api("acme", "calc").on("result", handler::event(|args| {
//!     println!("result: {args:?}");
//!     Ok(())
//! })).await;
//! ```

// Rust guideline compliant 2026-02

// Library modules
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod handler;
pub mod message;
pub mod signal;
pub mod ws;

// Re-export commonly used types
pub use bootstrap::{init_module, HubAddress, InitModuleOptions};
pub use client::{signals, ApiProxy, BrokerClient, ConnectOptions, SubscribeOptions};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use handler::{EventHandler, HandlerValue, MethodHandler, RawRequest};
pub use message::Message;
pub use signal::SignalBus;
