//! Persistent WebSocket client for the hub API.
//!
//! # Architecture
//!
//! ```text
//!  callers ──▶ HassClient ──▶ outbound queue ──▶ dispatcher ──▶ channel ──▶ hub
//!                                   ▲                                        │
//!                                   │                                        ▼
//!                              scheduler ◀── result handler ◀── reader ◀─────┘
//!                                                                 │
//!                                                                 ▼
//!                                                      CallbackRegistry (by type)
//! ```
//!
//! Two long-lived workers run per `start()`: the dispatcher drains the
//! bounded outbound queue and the reader consumes inbound frames. The reader
//! owns the connect/retry loop; every reconnect resets request ids, replays
//! the registered subscriptions and, once the hub accepted the credential,
//! lets queued requests through.
//!
//! State that outlives a connection lives in lock-free `scc::HashMap` stores:
//! [`RequestTracker`] for requests awaiting a `result`, [`CallbackRegistry`]
//! for inbound handlers and [`SubscriptionRegistry`] for event subscriptions.
//!
//! # Example
//!
//! ```rust,no_run
//! use hass_transport::websocket::{HassClient, MessageKind, WsConfig, handler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WsConfig::from_host(false, "hub.local:8123", "long-lived-token");
//!     let client = HassClient::new(config)?;
//!
//!     client.register_callback(
//!         "event",
//!         MessageKind::Event,
//!         handler(|message| async move { println!("{message:?}") }),
//!     );
//!     client.subscribe(["state_changed"]).await;
//!     client.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

mod callbacks;
mod config;
mod connection;
mod dispatcher;
mod handlers;
mod message;
mod pending;
mod reader;
mod scheduler;
mod subscription;
mod types;
mod ws_client;

pub use callbacks::{CallbackEntry, CallbackRegistry, Handler, handler};
pub use config::{WEBSOCKET_PATH, WsConfig};
pub use connection::{
    Connector, FrameSink, FrameStream, Link, TungsteniteConnector, WsMessage, channel_link,
};
pub use message::{
    AuthPhase, Authentication, ERROR_CODE_ID_REUSE, ERROR_CODE_INVALID_FORMAT, EntityState,
    EventContent, EventMessage, EventSubscription, Message, MessageKind, RawMessage, ResultError,
    ResultMessage, ServiceCall, ServiceTarget, StateChange, TYPE_AUTH, TYPE_AUTH_INVALID,
    TYPE_AUTH_OK, TYPE_AUTH_REQUIRED, TYPE_CALL_SERVICE, TYPE_EVENT, TYPE_RESULT,
    TYPE_SUBSCRIBE_EVENTS, peek_type,
};
pub use pending::{Request, RequestTracker, TrackedRequest};
pub use subscription::SubscriptionRegistry;
pub use types::{ConnectionEpoch, ConnectionState, IdAllocator, RequestId};
pub use ws_client::HassClient;
