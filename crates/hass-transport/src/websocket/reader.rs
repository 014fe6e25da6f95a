//! Inbound worker: reads frames and dispatches them to registered handlers.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, trace, warn};

use super::{
    connection::{self, FrameStream, LinkWriter},
    handlers::FRAME_EPOCH,
    message::peek_type,
    scheduler::RunContext,
    types::ConnectionEpoch,
    ws_client::Inner,
};
use crate::error::{TransportError, TransportResult};

/// Connect, then read until the run is cancelled, reconnecting after every
/// failure.
pub(crate) async fn run(inner: Arc<Inner>, run: RunContext) {
    debug!("reader started");
    let Some(mut stream) = connection::connect_with_retry(&inner, &run).await else {
        debug!("reader stopped before connecting");
        return;
    };

    loop {
        let link = inner.state_and_link().1;
        let outcome = AssertUnwindSafe(read_frames(&inner, &run, &mut stream, link))
            .catch_unwind()
            .await;

        if run.cancel.is_cancelled() || inner.run_context().is_none() {
            debug!("channel closed by stop");
            break;
        }
        match outcome {
            Ok(Ok(())) => break,
            Ok(Err(e)) => warn!(error = %e, "lost connection to hub, reconnecting"),
            Err(_) => error!("reader panicked, reconnecting"),
        }

        match connection::connect_with_retry(&inner, &run).await {
            Some(next) => stream = next,
            None => break,
        }
    }
    debug!("reader stopped");
}

/// Returns `Ok(())` only when the run was cancelled.
async fn read_frames(
    inner: &Inner,
    run: &RunContext,
    stream: &mut FrameStream,
    link: Option<Arc<LinkWriter>>,
) -> TransportResult<()> {
    let Some(link) = link else {
        return Err(TransportError::connection_closed(Some("channel cleared".to_string())));
    };

    loop {
        let frame = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return Ok(()),
            _ = link.closed() => {
                return Err(TransportError::connection_closed(Some("channel closed locally".to_string())));
            }
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(frame)) => match frame.into_text() {
                Ok(text) => dispatch_frame(inner, run, &text, link.epoch()),
                Err(e) => warn!(error = %e, "discarding frame that is not valid UTF-8"),
            },
            Some(Err(e)) => return Err(e),
            None => {
                info!("hub closed the channel");
                return Err(TransportError::connection_closed(None));
            }
        }
    }
}

/// Route one frame to the handler registered for its type tag.
///
/// The handler runs with [`FRAME_EPOCH`] set to the epoch of the channel the
/// frame came from.
fn dispatch_frame(inner: &Inner, run: &RunContext, text: &str, epoch: ConnectionEpoch) {
    let tag = match peek_type(text) {
        Ok(tag) => tag,
        Err(e) => {
            warn!(error = %e, "discarding frame without a type tag");
            return;
        }
    };

    let Some(entry) = inner.callbacks.lookup(&tag) else {
        warn!(error = %TransportError::dispatch_miss(&tag), "discarding frame");
        return;
    };

    let message = match entry.kind.decode(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(msg_type = %tag, kind = ?entry.kind, error = %e, "discarding malformed frame");
            return;
        }
    };

    trace!(msg_type = %tag, id = %message.id(), "received frame");
    run.spawn(FRAME_EPOCH.scope(epoch, (entry.handler)(message)));
}
