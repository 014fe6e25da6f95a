//! # hass-transport
//!
//! Persistent protocol client for a home-automation hub's WebSocket API.
//!
//! The client keeps a single duplex channel to the hub open for as long as it
//! runs:
//!
//! - **Authentication**: answers `auth_required` with the configured token and
//!   holds back every other request until the hub accepted it
//! - **Correlation**: allocates request ids and tracks requests until their
//!   `result` arrives
//! - **Retries**: re-sends failed requests, under a new id when the hub
//!   rejected the id itself
//! - **Reconnection**: retries the connection forever and replays event
//!   subscriptions with their original ids
//! - **Dispatch**: routes inbound frames to handlers registered per `type`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hass_transport::websocket::{HassClient, WsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HassClient::new(WsConfig::from_host(false, "hub.local:8123", "token"))?;
//!     client.start().await?;
//!     client.call_service("light", "turn_on", "light.kitchen").await;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod health;
mod reconnect;
pub mod runnable;
pub mod websocket;

pub use error::{TransportError, TransportResult};
pub use health::{AlwaysAvailable, HealthProbe, HttpHealthProbe};
pub use runnable::Runnable;
pub use websocket::{HassClient, WsConfig};
