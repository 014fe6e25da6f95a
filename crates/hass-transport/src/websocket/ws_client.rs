//! User-facing hub client.
//!
//! [`HassClient`] owns one persistent channel to the hub. It authenticates,
//! keeps event subscriptions alive across reconnects and re-sends requests the
//! hub rejected, while callers submit messages and register handlers from any
//! task.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace};

use super::{
    callbacks::{CallbackRegistry, Handler},
    config::WsConfig,
    connection::{Connector, LinkWriter, Session, TungsteniteConnector},
    dispatcher, handlers,
    message::{EventSubscription, Message, MessageKind, ServiceCall},
    pending::{Request, RequestTracker},
    reader,
    scheduler::RunContext,
    subscription::SubscriptionRegistry,
    types::{ConnectionEpoch, ConnectionState, IdAllocator, RequestId},
};
use crate::{
    error::{TransportError, TransportResult},
    health::{AlwaysAvailable, HealthProbe},
    runnable::Runnable,
};

/// Time allowed for the close frame when stopping.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Background workers of one `start()`.
struct Workers {
    run: RunContext,
    dispatcher: JoinHandle<mpsc::Receiver<Request>>,
    reader: JoinHandle<()>,
}

/// State shared between the façade, the workers and the handlers.
pub(crate) struct Inner {
    pub(crate) config: Arc<WsConfig>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) health: Arc<dyn HealthProbe>,
    pub(crate) ids: IdAllocator,
    pub(crate) session: Mutex<Session>,
    pub(crate) tracker: RequestTracker,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) subscriptions: SubscriptionRegistry,
    queue_tx: mpsc::Sender<Request>,
    queue_rx: Mutex<Option<mpsc::Receiver<Request>>>,
    workers: AsyncMutex<Option<Workers>>,
}

impl Inner {
    pub(crate) fn epoch(&self) -> ConnectionEpoch {
        self.session.lock().epoch
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.session.lock().state
    }

    pub(crate) fn state_and_link(&self) -> (ConnectionState, Option<Arc<LinkWriter>>) {
        let session = self.session.lock();
        (session.state, session.link.clone())
    }

    pub(crate) fn run_context(&self) -> Option<RunContext> {
        self.session.lock().run.clone()
    }

    pub(crate) fn queue_sender(&self) -> mpsc::Sender<Request> {
        self.queue_tx.clone()
    }

    async fn submit(&self, request: Request) {
        trace!(id = %request.id(), msg_type = request.message().type_tag(), "enqueueing request");
        // The receiver is owned by `Inner` whenever no dispatcher holds it,
        // so the channel never closes.
        let _ = self.queue_tx.send(request).await;
    }

    async fn startup(self: &Arc<Self>) -> TransportResult<()> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            debug!("client already started");
            return Ok(());
        }
        let queue = self
            .queue_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::internal("outbound queue is gone"))?;

        let run = RunContext::new();
        self.session.lock().run = Some(run.clone());
        handlers::register_builtin(self);

        let dispatcher = tokio::spawn(dispatcher::run(Arc::clone(self), run.clone(), queue));
        let reader = tokio::spawn(reader::run(Arc::clone(self), run.clone()));
        *workers = Some(Workers {
            run,
            dispatcher,
            reader,
        });
        info!(url = %self.config.url, "hub client started");
        Ok(())
    }

    pub(crate) async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        let Some(Workers {
            run,
            dispatcher,
            reader,
        }) = workers.take()
        else {
            return;
        };

        // Clear the channel first: the reader treats the resulting read
        // failure as expected instead of reconnecting.
        let link = {
            let mut session = self.session.lock();
            session.run = None;
            session.state = ConnectionState::Disconnected;
            session.link.take()
        };
        if let Some(link) = link {
            link.shutdown(CLOSE_GRACE).await;
        }

        run.cancel.cancel();
        run.tasks.close();

        match dispatcher.await {
            Ok(queue) => *self.queue_rx.lock() = Some(queue),
            Err(e) => error!(error = %e, "dispatcher task failed"),
        }
        if let Err(e) = reader.await {
            error!(error = %e, "reader task failed");
        }
        run.tasks.wait().await;
        self.tracker.clear();
        info!(url = %self.config.url, "hub client stopped");
    }
}

/// Persistent client for the hub's WebSocket API.
///
/// Cheap to clone; all clones drive the same connection.
///
/// # Example
///
/// ```rust,no_run
/// use hass_transport::websocket::{HassClient, MessageKind, WsConfig, handler};
///
/// # async fn run() -> hass_transport::TransportResult<()> {
/// let config = WsConfig::from_host(false, "hub.local:8123", "long-lived-token");
/// let client = HassClient::new(config)?;
///
/// client.register_callback("event", MessageKind::Event, handler(|message| async move {
///     if let Some(event) = message.as_event() {
///         println!("{} {:?}", event.event.event_type, event.event.entity_id());
///     }
/// }));
/// client.subscribe(["state_changed"]).await;
/// client.start().await?;
///
/// client.call_service("light", "turn_on", "light.kitchen").await;
/// # client.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HassClient {
    inner: Arc<Inner>,
}

impl HassClient {
    /// Create a client connecting through `tokio-tungstenite`.
    pub fn new(config: WsConfig) -> TransportResult<Self> {
        Self::with_connector(config, Arc::new(TungsteniteConnector), Arc::new(AlwaysAvailable))
    }

    /// Create a client with a custom channel factory and health probe.
    pub fn with_connector(
        config: WsConfig,
        connector: Arc<dyn Connector>,
        health: Arc<dyn HealthProbe>,
    ) -> TransportResult<Self> {
        config.validate().map_err(TransportError::config)?;

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let inner = Inner {
            config: Arc::new(config),
            connector,
            health,
            ids: IdAllocator::new(),
            session: Mutex::new(Session::default()),
            tracker: RequestTracker::new(),
            callbacks: CallbackRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            workers: AsyncMutex::new(None),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &WsConfig {
        &self.inner.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register the built-in handlers and launch the workers.
    ///
    /// Returns without waiting for the first connection; connecting is
    /// retried in the background until it succeeds. Idempotent.
    pub async fn start(&self) -> TransportResult<()> {
        self.inner.startup().await
    }

    /// Close the channel and wait for the workers and pending retries to end.
    ///
    /// Subscriptions and callbacks are kept for a later `start()`. Idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown().await;
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Allocate an id for a caller-built message.
    ///
    /// Ids are scoped to the current connection. A request still undelivered
    /// when the connection drops is sent again under a fresh id; see
    /// [`tracked_requests`](Self::tracked_requests).
    pub fn next_message_id(&self) -> RequestId {
        self.inner.ids.next_id()
    }

    /// Queue `message` for delivery.
    ///
    /// Waits only for room in the outbound queue, not for the hub. Messages
    /// queued while the client is stopped are sent after the next `start()`.
    pub async fn enqueue(&self, message: impl Into<Message>) {
        let request = Request::new(message.into(), self.inner.epoch());
        self.inner.submit(request).await;
    }

    /// Subscribe to each event type, returning the allocated ids.
    ///
    /// Subscriptions are recorded even while disconnected and sent after every
    /// (re)connect.
    pub async fn subscribe<I, S>(&self, event_types: I) -> Vec<RequestId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids = Vec::new();
        for event_type in event_types {
            let event_type = event_type.into();
            // Registering under the session lock keeps this atomic with the
            // replay snapshot taken on connect.
            let (subscription, connected, epoch) = {
                let session = self.inner.session.lock();
                let subscription = EventSubscription::new(self.inner.ids.next_id(), event_type);
                self.inner.subscriptions.insert(subscription.clone());
                (subscription, session.state.is_connected(), session.epoch)
            };
            info!(id = %subscription.id, event_type = %subscription.event_type, "subscribing to events");
            ids.push(subscription.id);
            if connected {
                self.inner.submit(Request::new(subscription.into(), epoch)).await;
            }
        }
        ids
    }

    /// Call `domain.service` on one entity.
    ///
    /// The returned id identifies the request on the current connection only;
    /// after a reconnect the request may be resent under a new id.
    pub async fn call_service(
        &self,
        domain: impl Into<String>,
        service: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> RequestId {
        let call = ServiceCall::new(self.next_message_id(), domain, service).entity(entity_id);
        let id = call.id;
        self.enqueue(call).await;
        id
    }

    /// Stop tracking a request. A later result for it is ignored.
    ///
    /// `id` must be the request's current id. Returns false if it is not
    /// tracked, which includes requests moved to a new id after a reconnect.
    pub fn abandon(&self, id: RequestId) -> bool {
        self.inner.tracker.remove(id).is_some()
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Handle inbound frames tagged `type_tag`, decoded as `kind`.
    ///
    /// Replaces any previous handler for the tag, including the built-in
    /// ones (which `start()` registers again).
    pub fn register_callback(&self, type_tag: impl Into<String>, kind: MessageKind, handler: Handler) {
        self.inner.callbacks.register(type_tag, kind, handler);
    }

    pub fn deregister_callback(&self, type_tag: &str) -> bool {
        self.inner.callbacks.deregister(type_tag)
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn is_started(&self) -> bool {
        self.inner.run_context().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state().is_authenticated()
    }

    /// Ready to deliver requests.
    pub fn is_connected_and_authenticated(&self) -> bool {
        let state = self.inner.state();
        state.is_connected() && state.is_authenticated()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Number of id resets so far; bumps on every reconnect.
    pub fn epoch(&self) -> ConnectionEpoch {
        self.inner.epoch()
    }

    /// Ids of the requests awaiting a result.
    pub fn tracked_requests(&self) -> Vec<RequestId> {
        self.inner.tracker.ids()
    }

    pub fn subscriptions(&self) -> Vec<EventSubscription> {
        self.inner.subscriptions.all()
    }
}

#[async_trait]
impl Runnable for HassClient {
    async fn start(&self) -> TransportResult<()> {
        HassClient::start(self).await
    }

    async fn stop(&self) {
        HassClient::stop(self).await;
    }

    fn name(&self) -> &str {
        "hass-websocket-client"
    }
}
