//! Watch State Changes Example
//!
//! Connects to a hub, subscribes to `state_changed` and prints every entity
//! transition until Ctrl-C. Optionally toggles one entity after the session
//! is authenticated.
//!
//! Run with: `cargo run -p hass-transport --example watch_events`
//!
//! Environment:
//! - `HASS_HOST` hub address, defaults to `homeassistant.local:8123`
//! - `HASS_TOKEN` long-lived access token (required)
//! - `HASS_SECURE` set to `1` for `wss://`
//! - `HASS_TOGGLE` entity id to toggle once, e.g. `light.kitchen`

use std::{sync::Arc, time::Duration};

use hass_transport::{
    HttpHealthProbe,
    websocket::{HassClient, MessageKind, TungsteniteConnector, WsConfig, handler},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hass_transport=debug,info")),
        )
        .init();

    let host = std::env::var("HASS_HOST").unwrap_or_else(|_| "homeassistant.local:8123".to_string());
    let token = std::env::var("HASS_TOKEN")?;
    let secure = std::env::var("HASS_SECURE").is_ok_and(|v| v == "1");

    let config = WsConfig::from_host(secure, &host, token).reconnect_max_delay(Duration::from_secs(30));

    let probe = Arc::new(HttpHealthProbe::new(&config)?);
    let probe_cancel = CancellationToken::new();
    let probe_task = probe.spawn(probe_cancel.clone());

    let client = HassClient::with_connector(config, Arc::new(TungsteniteConnector), probe)?;
    client.register_callback(
        "event",
        MessageKind::Event,
        handler(|message| async move {
            let Some(event) = message.as_event() else {
                return;
            };
            match event.event.state_change() {
                Some(change) => {
                    let from = change.old_state.map(|s| s.state).unwrap_or_default();
                    let to = change.new_state.map(|s| s.state).unwrap_or_default();
                    println!("{}: {from} -> {to}", change.entity_id);
                }
                None => println!("{}: {}", event.event.event_type, event.event.data),
            }
        }),
    );

    client.subscribe(["state_changed"]).await;
    client.start().await?;

    if let Ok(entity) = std::env::var("HASS_TOGGLE") {
        while !client.is_connected_and_authenticated() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let domain = entity.split('.').next().unwrap_or("homeassistant").to_string();
        let id = client.call_service(domain, "toggle", entity.clone()).await;
        println!("toggle {entity} sent as request {}", id.get());
    }

    tokio::signal::ctrl_c().await?;

    client.stop().await;
    probe_cancel.cancel();
    let _ = probe_task.await;
    Ok(())
}
