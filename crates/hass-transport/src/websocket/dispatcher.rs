//! Outbound worker draining the request queue onto the channel.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use super::{
    connection::WsMessage,
    pending::Request,
    scheduler::{self, RunContext},
    ws_client::Inner,
};

/// Drain the queue until the run is cancelled, then hand the receiver back so
/// a later `start()` can reuse it.
pub(crate) async fn run(
    inner: Arc<Inner>,
    run: RunContext,
    mut queue: mpsc::Receiver<Request>,
) -> mpsc::Receiver<Request> {
    debug!("dispatcher started");
    loop {
        let request = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let id = request.id();
        let outcome = tokio::select! {
            _ = run.cancel.cancelled() => break,
            outcome = AssertUnwindSafe(dispatch(&inner, request)).catch_unwind() => outcome,
        };
        if outcome.is_err() {
            error!(%id, "dispatching request panicked, request dropped");
        }
    }
    debug!("dispatcher stopped");
    queue
}

async fn dispatch(inner: &Inner, mut request: Request) {
    let config = &inner.config;
    let epoch = inner.epoch();

    if request.is_subscription() {
        let id = request.id();
        // Every connection replays the registry, so copies queued for an
        // earlier one are stale.
        if request.epoch() < epoch {
            debug!(%id, request_epoch = %request.epoch(), %epoch, "subscription queued for a previous connection, dropping");
            return;
        }
        if !inner.subscriptions.contains(id) {
            debug!(%id, "subscription no longer registered under this id, dropping");
            return;
        }
        if inner.subscriptions.sent_in(id, epoch) || inner.tracker.in_flight(id, epoch) {
            debug!(%id, "subscription already sent on this connection, skipping");
            return;
        }
    } else if request.id().is_correlated() && request.epoch() < epoch {
        let id = inner.ids.next_id();
        debug!(old_id = %request.id(), new_id = %id, %epoch, "reassigning id allocated on a previous connection");
        request = request.rotated(id, epoch);
    }

    request.touch();
    inner.tracker.track(&request);

    if !inner.health.is_available() {
        debug!(id = %request.id(), "hub unavailable, delaying request");
        scheduler::schedule(inner, request, config.hub_unavailable_delay);
        return;
    }

    let (state, link) = inner.state_and_link();
    if !state.is_authenticated() && !request.message().is_auth_handshake() {
        debug!(id = %request.id(), msg_type = request.message().type_tag(), %state, "not authenticated, delaying request");
        scheduler::schedule(inner, request, config.auth_wait_delay);
        return;
    }

    let Some(link) = link else {
        debug!(id = %request.id(), "no open channel, dropping send attempt");
        return;
    };

    let text = match request.message().to_json() {
        Ok(text) => text,
        Err(e) => {
            error!(id = %request.id(), error = %e, "failed to serialize request, dropping it");
            inner.tracker.remove(request.id());
            return;
        }
    };

    trace!(id = %request.id(), msg_type = request.message().type_tag(), "sending request");
    match link.send(WsMessage::Text(text)).await {
        Ok(()) => {
            inner.tracker.mark_sent(request.id(), link.epoch());
            if request.is_subscription() {
                inner.subscriptions.mark_sent(request.id(), link.epoch());
            }
        }
        Err(e) => {
            warn!(id = %request.id(), error = %e, "write failed, requeueing request");
            link.close();
            scheduler::schedule(inner, request, Duration::ZERO);
        }
    }
}
