//! One-call module bootstrap.
//!
//! [`init_module`] wraps the construct → connect → await-readiness dance
//! every module performs at startup, and optionally registers a serving URL
//! with the hub so it can proxy the module's static assets.
//!
//! # Usage
//!
//! ```ignore
//! let client = hubwire::init_module(
//!     InitModuleOptions::new("hub.reality_world", HubAddress::new("127.0.0.1", Some(8080)))
//!         .server_url("http://127.0.0.1:3000"),
//! )
//! .await?;
//! ```

// Rust guideline compliant 2026-02

use anyhow::Context;
use serde_json::json;

use crate::client::{BrokerClient, ConnectOptions};
use crate::constants::DEFAULT_WS_PATH;

/// Hub endpoint address.
#[derive(Debug, Clone)]
pub struct HubAddress {
    /// Hub host name or address.
    pub host: String,
    /// Hub port; omitted for scheme-default.
    pub port: Option<u16>,
}

impl HubAddress {
    /// New hub address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Options for [`init_module`].
///
/// The WebSocket path always has a value (default `/core`): outside a
/// browser there is no ambient location to infer it from.
#[derive(Debug, Clone)]
pub struct InitModuleOptions {
    /// Module name to participate as (`vendor.module`).
    pub module_name: String,
    /// URL serving this module's static assets, registered with the hub
    /// proxy when given.
    pub server_url: Option<String>,
    /// WebSocket path on the hub.
    pub web_socket_path: String,
    /// Hub endpoint.
    pub hub: HubAddress,
    /// Connect over `wss://`.
    pub tls: bool,
}

impl InitModuleOptions {
    /// Options with the defaults every module starts from.
    #[must_use]
    pub fn new(module_name: impl Into<String>, hub: HubAddress) -> Self {
        Self {
            module_name: module_name.into(),
            server_url: None,
            web_socket_path: DEFAULT_WS_PATH.to_string(),
            hub,
            tls: false,
        }
    }

    /// Register `url` with the hub proxy after connecting.
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Override the WebSocket path.
    #[must_use]
    pub fn web_socket_path(mut self, path: impl Into<String>) -> Self {
        self.web_socket_path = path.into();
        self
    }
}

/// Construct a client, connect it to the hub, await readiness, and
/// (optionally) register the module's serving URL.
///
/// Returns the ready client.
pub async fn init_module(options: InitModuleOptions) -> anyhow::Result<BrokerClient> {
    let client = BrokerClient::with_path(&options.module_name, &options.web_socket_path);
    client
        .connect_with(ConnectOptions {
            host: options.hub.host.clone(),
            port: options.hub.port,
            tls: options.tls,
        })
        .context("broker connect failed")?;
    client
        .wait_connected()
        .await
        .context("broker never became ready")?;

    if let Some(server_url) = &options.server_url {
        client
            .api("hub", "core")
            .call(
                "registerProxyURL",
                vec![json!({
                    "moduleName": options.module_name,
                    "serverURL": server_url,
                })],
            )
            .await
            .with_context(|| format!("registering proxy URL {server_url} failed"))?;
    }

    Ok(client)
}
