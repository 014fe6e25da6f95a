//! Physical channel to the hub and the connect/retry loop.

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{
    Sink, SinkExt, StreamExt,
    future,
    stream::BoxStream,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::{connect_async, tungstenite::Message as TungsteniteMessage};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use super::{
    config::WsConfig,
    pending::Request,
    scheduler::{self, RunContext},
    types::{ConnectionEpoch, ConnectionState},
    ws_client::Inner,
};
use crate::{
    error::{TransportError, TransportResult},
    reconnect::calculate_backoff,
};

/// A data frame on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame payload as text; binary frames must be valid UTF-8.
    pub fn into_text(self) -> TransportResult<String> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Binary(b) => Ok(String::from_utf8(b)?),
        }
    }
}

/// Write half of a channel.
pub type FrameSink = Pin<Box<dyn Sink<WsMessage, Error = TransportError> + Send>>;
/// Read half of a channel. The stream ends when the hub closes the channel.
pub type FrameStream = BoxStream<'static, TransportResult<WsMessage>>;

/// An open channel as produced by a [`Connector`].
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens channels to the hub.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &WsConfig) -> TransportResult<Link>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
///
/// Ping frames are answered by tungstenite itself while the stream is polled.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, config: &WsConfig) -> TransportResult<Link> {
        let (ws, response) = connect_async(config.url.as_str())
            .await
            .map_err(|e| TransportError::connect(e.to_string()))?;
        debug!(url = %config.url, status = %response.status(), "websocket handshake completed");

        let (write, read) = ws.split();
        let sink = write
            .sink_map_err(TransportError::from)
            .with(|frame: WsMessage| {
                future::ready(Ok::<_, TransportError>(match frame {
                    WsMessage::Text(text) => TungsteniteMessage::text(text),
                    WsMessage::Binary(data) => TungsteniteMessage::binary(data),
                }))
            });

        let max_size = config.max_message_size;
        let stream = read
            .take_while(|frame| {
                future::ready(!matches!(frame, Ok(TungsteniteMessage::Close(_))))
            })
            .filter_map(move |frame| {
                let frame = match frame {
                    Ok(TungsteniteMessage::Text(text)) => Some(Ok(WsMessage::Text(text.to_string()))),
                    Ok(TungsteniteMessage::Binary(data)) => Some(Ok(WsMessage::Binary(data.to_vec()))),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                };
                let frame = match frame {
                    Some(Ok(frame)) if frame.len() > max_size => {
                        warn!(size = frame.len(), max_size, "dropping oversized frame");
                        None
                    }
                    other => other,
                };
                future::ready(frame)
            });

        Ok(Link::new(Box::pin(sink), stream.boxed()))
    }
}

/// The installed write side of the current channel.
pub(crate) struct LinkWriter {
    sink: AsyncMutex<FrameSink>,
    closed: CancellationToken,
    epoch: ConnectionEpoch,
}

impl LinkWriter {
    pub(crate) fn new(sink: FrameSink, epoch: ConnectionEpoch) -> Self {
        Self {
            sink: AsyncMutex::new(sink),
            closed: CancellationToken::new(),
            epoch,
        }
    }

    pub(crate) fn epoch(&self) -> ConnectionEpoch {
        self.epoch
    }

    pub(crate) async fn send(&self, frame: WsMessage) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::connection_closed(None));
        }
        let mut sink = self.sink.lock().await;
        sink.send(frame).await
    }

    /// Mark the channel closed; wakes the reader blocked on it.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Close the channel and try to send a close frame.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        self.close();
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(grace, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "error while closing channel"),
            Err(_) => debug!(?grace, "timed out closing channel"),
        }
    }
}

/// Session state shared by the workers and the façade.
#[derive(Default)]
pub(crate) struct Session {
    pub(crate) state: ConnectionState,
    pub(crate) epoch: ConnectionEpoch,
    pub(crate) link: Option<Arc<LinkWriter>>,
    pub(crate) run: Option<RunContext>,
}

/// Drop the current channel and start a new id generation.
///
/// Returns the new epoch and the requests written on earlier channels that
/// never received a result, or `None` once the run is being stopped.
fn reset_session(inner: &Inner, run: &RunContext) -> Option<(ConnectionEpoch, Vec<Request>)> {
    let (old_link, epoch) = {
        let mut session = inner.session.lock();
        if session.run.is_none() || run.cancel.is_cancelled() {
            return None;
        }
        session.state = ConnectionState::Connecting;
        session.epoch = session.epoch.next();
        inner.ids.reset_to(inner.subscriptions.max_id());
        (session.link.take(), session.epoch)
    };
    if let Some(link) = old_link {
        link.close();
    }
    Some((epoch, inner.tracker.take_unanswered(epoch)))
}

/// Open a channel, retrying forever until it succeeds or the run is cancelled.
///
/// On success the channel is installed, registered subscriptions are replayed
/// and the read half is returned to the caller.
pub(crate) async fn connect_with_retry(inner: &Arc<Inner>, run: &RunContext) -> Option<FrameStream> {
    let (epoch, unanswered) = reset_session(inner, run)?;
    let config = &inner.config;
    let mut attempt: u32 = 0;

    loop {
        debug!(url = %config.url, attempt, %epoch, "connecting to hub");
        let connect = tokio::time::timeout(config.connect_timeout, inner.connector.connect(config));
        let result = tokio::select! {
            _ = run.cancel.cancelled() => return None,
            result = connect => result.unwrap_or_else(|_| Err(TransportError::timeout(config.connect_timeout))),
        };

        match result {
            Ok(link) => {
                let Link { sink, stream } = link;
                let writer = Arc::new(LinkWriter::new(sink, epoch));
                let replay = {
                    let mut session = inner.session.lock();
                    if session.run.is_none() || run.cancel.is_cancelled() {
                        return None;
                    }
                    session.link = Some(Arc::clone(&writer));
                    session.state = ConnectionState::Connected;
                    inner
                        .subscriptions
                        .all()
                        .into_iter()
                        .filter(|sub| !inner.tracker.in_flight(sub.id, epoch))
                        .collect::<Vec<_>>()
                };
                info!(url = %config.url, %epoch, attempt, "connected to hub");

                for subscription in replay {
                    debug!(id = %subscription.id, event_type = %subscription.event_type, "replaying subscription");
                    scheduler::schedule(inner, Request::new(subscription.into(), epoch), Duration::ZERO);
                }
                if config.redeliver_on_reconnect {
                    for request in unanswered {
                        debug!(id = %request.id(), "redelivering unanswered request");
                        scheduler::schedule(inner, request, Duration::ZERO);
                    }
                } else if !unanswered.is_empty() {
                    warn!(count = unanswered.len(), "dropping requests left unanswered by the previous connection");
                }
                return Some(stream);
            }
            Err(e) => {
                let delay = calculate_backoff(config.backoff(), attempt);
                warn!(url = %config.url, error = %e, attempt, ?delay, "failed to connect to hub, retrying");
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = run.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Adapt a pair of frame channels into a [`Link`].
///
/// Used for in-process hubs.
pub fn channel_link(
    outbound: futures::channel::mpsc::UnboundedSender<WsMessage>,
    inbound: futures::channel::mpsc::UnboundedReceiver<WsMessage>,
) -> Link {
    let sink = outbound.sink_map_err(|e| TransportError::websocket(e.to_string()));
    Link::new(Box::pin(sink), inbound.map(Ok).boxed())
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc;

    use super::*;

    #[test]
    fn test_binary_frames_decode_as_utf8() {
        let frame = WsMessage::Binary(br#"{"type":"auth_ok"}"#.to_vec());
        assert_eq!(frame.into_text().unwrap(), r#"{"type":"auth_ok"}"#);

        let frame = WsMessage::Binary(vec![0xff, 0xfe]);
        assert!(matches!(
            frame.into_text(),
            Err(TransportError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_link_writer_rejects_after_close() {
        let (tx, mut rx) = mpsc::unbounded();
        let (_in_tx, in_rx) = mpsc::unbounded();
        let link = channel_link(tx, in_rx);
        let writer = LinkWriter::new(link.sink, ConnectionEpoch(1));

        writer.send(WsMessage::text("hello")).await.unwrap();
        assert_eq!(rx.next().await, Some(WsMessage::text("hello")));

        writer.close();
        writer.closed().await;
        assert!(matches!(
            writer.send(WsMessage::text("late")).await,
            Err(TransportError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_sink() {
        let (tx, mut rx) = mpsc::unbounded();
        let (_in_tx, in_rx) = mpsc::unbounded();
        let link = channel_link(tx, in_rx);
        let writer = LinkWriter::new(link.sink, ConnectionEpoch(1));

        writer.shutdown(Duration::from_secs(1)).await;
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn test_tungstenite_connector_reports_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = WsConfig::new(format!("ws://{addr}/api/websocket"), "token");
        let result = TungsteniteConnector.connect(&config).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
