//! Hub reachability signal consulted before every send.
//!
//! The dispatcher only asks [`HealthProbe::is_available`], which must answer
//! immediately. [`HttpHealthProbe`] keeps that answer fresh by polling the
//! hub's REST API in the background.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{TransportError, TransportResult},
    websocket::WsConfig,
};

/// Shortest polling interval accepted by [`HttpHealthProbe::interval`].
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Non-blocking "is the hub reachable" query.
pub trait HealthProbe: Send + Sync + 'static {
    fn is_available(&self) -> bool;
}

/// Probe that never gates anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAvailable;

impl HealthProbe for AlwaysAvailable {
    fn is_available(&self) -> bool {
        true
    }
}

/// Probe backed by the hub's HTTP API.
///
/// Without health entities the hub counts as available when `GET /api/`
/// answers 200. With health entities it counts as available when at least
/// one of them can be read through `GET /api/states/<entity_id>`, which also
/// proves the hub finished loading its state.
pub struct HttpHealthProbe {
    client: Client,
    api_root: Url,
    access_token: String,
    entities: Vec<String>,
    interval: Duration,
    available: AtomicBool,
}

impl HttpHealthProbe {
    /// Build a probe for the hub addressed by `config`.
    pub fn new(config: &WsConfig) -> TransportResult<Self> {
        let api_root = config.health_url().map_err(TransportError::config)?;
        let client = Client::builder()
            .timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_root,
            access_token: config.access_token.clone(),
            entities: Vec::new(),
            interval: Duration::from_secs(10),
            available: AtomicBool::new(true),
        })
    }

    /// Entities whose presence proves the hub is ready, e.g. `light.kitchen`.
    #[must_use]
    pub fn entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the polling interval, raised to [`MIN_PROBE_INTERVAL`] if shorter.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_PROBE_INTERVAL);
        self
    }

    /// Run one probe, cache and return its outcome.
    pub async fn check_once(&self) -> bool {
        let available = match self.probe().await {
            Ok(available) => available,
            Err(e) => {
                debug!(error = %e, "health probe failed");
                false
            }
        };
        let previous = self.available.swap(available, Ordering::SeqCst);
        if previous != available {
            if available {
                info!(url = %self.api_root, "hub is available");
            } else {
                warn!(url = %self.api_root, "hub is unavailable");
            }
        }
        available
    }

    async fn probe(&self) -> TransportResult<bool> {
        if self.entities.is_empty() {
            return self.get_ok(self.api_root.clone()).await;
        }
        for entity in &self.entities {
            let url = self
                .api_root
                .join(&format!("states/{entity}"))
                .map_err(|e| TransportError::config(format!("Invalid entity id {entity}: {e}")))?;
            if self.get_ok(url).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get_ok(&self, url: Url) -> TransportResult<bool> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Ok(response.status() == StatusCode::OK)
    }

    /// Poll in the background until `cancel` fires.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let probe = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        probe.check_once().await;
                    }
                }
            }
            debug!("health probe stopped");
        })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
