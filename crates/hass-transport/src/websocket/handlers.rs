//! Built-in handlers for the authentication phase and request results.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tracing::{debug, error, info, warn};

use super::{
    callbacks::{Handler, handler},
    message::{
        Message, MessageKind, ResultMessage, TYPE_AUTH_INVALID, TYPE_AUTH_OK, TYPE_AUTH_REQUIRED,
        TYPE_RESULT,
    },
    pending::Request,
    scheduler,
    types::{ConnectionEpoch, ConnectionState},
    ws_client::Inner,
};
use crate::error::TransportError;

tokio::task_local! {
    /// Epoch of the channel the frame being handled was read from.
    pub(crate) static FRAME_EPOCH: ConnectionEpoch;
}

/// Epoch the current frame was read in, if it is not the current one.
///
/// Handlers invoked outside the reader count as current.
fn stale_epoch(current: ConnectionEpoch) -> Option<ConnectionEpoch> {
    FRAME_EPOCH
        .try_with(|read_in| *read_in)
        .ok()
        .filter(|read_in| *read_in != current)
}

/// Register the handlers the session cannot work without.
pub(crate) fn register_builtin(inner: &Arc<Inner>) {
    let callbacks = &inner.callbacks;
    callbacks.register(
        TYPE_AUTH_REQUIRED,
        MessageKind::AuthPhase,
        with_inner(inner, on_auth_required),
    );
    callbacks.register(
        TYPE_AUTH_OK,
        MessageKind::AuthPhase,
        with_inner(inner, on_auth_ok),
    );
    callbacks.register(
        TYPE_AUTH_INVALID,
        MessageKind::AuthPhase,
        with_inner(inner, on_auth_invalid),
    );
    callbacks.register(TYPE_RESULT, MessageKind::Result, with_inner(inner, on_result));
}

/// Handlers only hold a weak reference; the registry lives inside `Inner`.
fn with_inner(inner: &Arc<Inner>, f: fn(&Arc<Inner>, Message)) -> Handler {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    handler(move |message| {
        let weak = weak.clone();
        async move {
            if let Some(inner) = weak.upgrade() {
                f(&inner, message);
            }
        }
    })
}

fn on_auth_required(inner: &Arc<Inner>, message: Message) {
    let epoch = inner.epoch();
    if let Some(read_in) = stale_epoch(epoch) {
        debug!(%read_in, %epoch, "ignoring auth_required from a previous channel");
        return;
    }
    let version = message
        .as_auth_phase()
        .and_then(|phase| phase.ha_version.clone())
        .unwrap_or_default();
    info!(ha_version = %version, "hub requested authentication");
    let request = Request::new(Message::authentication(inner.config.access_token.clone()), epoch);
    scheduler::schedule(inner, request, Duration::ZERO);
}

fn on_auth_ok(inner: &Arc<Inner>, _message: Message) {
    let mut session = inner.session.lock();
    if let Some(read_in) = stale_epoch(session.epoch) {
        debug!(%read_in, epoch = %session.epoch, "ignoring auth_ok from a previous channel");
        return;
    }
    if session.state == ConnectionState::Connected {
        session.state = ConnectionState::Authenticated;
        info!(epoch = %session.epoch, "authenticated with hub");
    } else {
        debug!(state = %session.state, "ignoring auth_ok outside of a fresh connection");
    }
}

fn on_auth_invalid(inner: &Arc<Inner>, message: Message) {
    let reason = message
        .as_auth_phase()
        .and_then(|phase| phase.message.clone())
        .unwrap_or_else(|| "invalid access token".to_string());
    let err = TransportError::auth_rejected(reason);
    error!(error = %err, "hub rejected the credential, stopping client");

    {
        let mut session = inner.session.lock();
        if session.state.is_authenticated() {
            session.state = ConnectionState::Connected;
        }
    }

    // `stop()` drains the task set this handler runs on, so it cannot be
    // awaited from here.
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        inner.shutdown().await;
    });
}

fn on_result(inner: &Arc<Inner>, message: Message) {
    let Some(result) = message.as_result() else {
        return;
    };
    let epoch = inner.epoch();
    if let Some(read_in) = stale_epoch(epoch) {
        // Requests of that channel were already taken out of the tracker and
        // their ids may have been handed out again.
        debug!(id = %result.id, %read_in, %epoch, "ignoring result from a previous channel");
        return;
    }
    handle_result(inner, result);
}

fn handle_result(inner: &Inner, result: &ResultMessage) {
    let id = result.id;
    let Some(request) = inner.tracker.remove(id) else {
        if result.success {
            debug!(%id, "result for an untracked request");
        } else {
            warn!(%id, code = result.error_code(), "failure for an untracked request");
        }
        return;
    };

    if result.success {
        debug!(%id, "request succeeded");
        return;
    }

    let err = TransportError::request_failed(id.get(), result.error_code(), result.error_message());
    if result.needs_new_id() {
        let new_id = inner.ids.next_id();
        let retry = request.rotated(new_id, inner.epoch());
        if request.is_subscription() && inner.subscriptions.rekey(id, new_id).is_some() {
            debug!(old_id = %id, %new_id, "subscription moved to new id");
        }
        warn!(error = %err, %new_id, "retrying request with a new id");
        scheduler::schedule(inner, retry, inner.config.id_rotation_delay);
    } else {
        if request.is_subscription() {
            inner.subscriptions.clear_sent(id);
        }
        warn!(error = %err, delay = ?inner.config.failed_request_delay, "retrying failed request");
        scheduler::schedule(inner, request, inner.config.failed_request_delay);
    }
}
