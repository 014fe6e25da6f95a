//! In-flight request tracking using `scc::HashMap`.
//!
//! The dispatcher records every correlated request it (re)sends; the result
//! handler removes it again once the hub answered. Entries remember the
//! connection epoch they were written in, so a request is only considered in
//! flight on the connection that actually carried it.

use std::time::Instant;

use super::{
    message::Message,
    types::{ConnectionEpoch, RequestId},
};

/// A message travelling through the outbound queue.
#[derive(Clone, Debug)]
pub struct Request {
    message: Message,
    /// Epoch the message id was allocated in.
    epoch: ConnectionEpoch,
    created_at: Instant,
    last_update: Instant,
}

impl Request {
    pub fn new(message: Message, epoch: ConnectionEpoch) -> Self {
        let now = Instant::now();
        Self {
            message,
            epoch,
            created_at: now,
            last_update: now,
        }
    }

    pub fn id(&self) -> RequestId {
        self.message.id()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn epoch(&self) -> ConnectionEpoch {
        self.epoch
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn is_subscription(&self) -> bool {
        self.message.as_subscription().is_some()
    }

    /// Refresh the last update time before a (re)send.
    pub(crate) fn touch(&mut self) {
        self.last_update = Instant::now();
    }

    /// Same request under a new id allocated in `epoch`.
    #[must_use]
    pub(crate) fn rotated(&self, id: RequestId, epoch: ConnectionEpoch) -> Self {
        Self {
            message: self.message.with_id(id),
            epoch,
            created_at: self.created_at,
            last_update: Instant::now(),
        }
    }
}

/// A tracked request and the epoch it was written in, if it was written.
#[derive(Clone, Debug)]
pub struct TrackedRequest {
    pub request: Request,
    pub sent_in: Option<ConnectionEpoch>,
}

/// Lock-free store of requests awaiting a `result`.
#[derive(Default)]
pub struct RequestTracker {
    requests: scc::HashMap<RequestId, TrackedRequest>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh the entry for `request`.
    ///
    /// The entry is marked as not written until [`RequestTracker::mark_sent`]
    /// is called. Uncorrelated requests are never tracked.
    pub fn track(&self, request: &Request) {
        let id = request.id();
        if !id.is_correlated() {
            return;
        }
        let entry = TrackedRequest {
            request: request.clone(),
            sent_in: None,
        };
        match self.requests.entry_sync(id) {
            scc::hash_map::Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = entry;
            }
            scc::hash_map::Entry::Vacant(vacant) => {
                vacant.insert_entry(entry);
            }
        }
    }

    /// Record that the request was written on the connection of `epoch`.
    pub fn mark_sent(&self, id: RequestId, epoch: ConnectionEpoch) -> bool {
        self.requests
            .update_sync(&id, |_, entry| entry.sent_in = Some(epoch))
            .is_some()
    }

    /// Returns true when `id` was written on the connection of `epoch` and
    /// has not been answered yet.
    pub fn in_flight(&self, id: RequestId, epoch: ConnectionEpoch) -> bool {
        self.requests
            .get_sync(&id)
            .is_some_and(|entry| entry.get().sent_in == Some(epoch))
    }

    /// Remove and return the request tracked under `id`.
    pub fn remove(&self, id: RequestId) -> Option<Request> {
        self.requests
            .remove_sync(&id)
            .map(|(_, entry)| entry.request)
    }

    pub fn get(&self, id: RequestId) -> Option<TrackedRequest> {
        self.requests.get_sync(&id).map(|entry| entry.get().clone())
    }

    /// Drop every entry whose id belongs to an epoch before `epoch` and
    /// return the ones that were written but never answered.
    ///
    /// Subscriptions are dropped without being returned; they are replayed
    /// from the subscription registry instead.
    pub fn take_unanswered(&self, epoch: ConnectionEpoch) -> Vec<Request> {
        let mut stale = Vec::new();
        self.requests.retain_sync(|_, entry| {
            if entry.request.epoch() >= epoch {
                return true;
            }
            if entry.sent_in.is_some() && !entry.request.is_subscription() {
                stale.push(entry.request.clone());
            }
            false
        });
        stale.sort_by_key(|request| request.created_at());
        stale
    }

    /// Ids currently tracked, in ascending order.
    pub fn ids(&self) -> Vec<RequestId> {
        let mut ids = Vec::with_capacity(self.requests.len());
        self.requests.retain_sync(|id, _| {
            ids.push(*id);
            true
        });
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&self) {
        self.requests.clear_sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::message::{EventSubscription, ServiceCall};

    fn call(id: u64) -> Request {
        Request::new(
            ServiceCall::new(RequestId(id), "light", "toggle").into(),
            ConnectionEpoch(1),
        )
    }

    fn subscription(id: u64) -> Request {
        Request::new(
            EventSubscription::new(RequestId(id), "state_changed").into(),
            ConnectionEpoch(1),
        )
    }

    #[test]
    fn test_track_and_remove() {
        let tracker = RequestTracker::new();
        tracker.track(&call(3));
        assert_eq!(tracker.len(), 1);

        let removed = tracker.remove(RequestId(3)).unwrap();
        assert_eq!(removed.id(), RequestId(3));
        assert!(tracker.is_empty());
        assert!(tracker.remove(RequestId(3)).is_none());
    }

    #[test]
    fn test_uncorrelated_requests_are_not_tracked() {
        let tracker = RequestTracker::new();
        tracker.track(&Request::new(
            Message::authentication("token"),
            ConnectionEpoch(1),
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retrack_replaces_entry() {
        let tracker = RequestTracker::new();
        let request = call(4);
        tracker.track(&request);
        assert!(tracker.mark_sent(RequestId(4), ConnectionEpoch(1)));
        assert!(tracker.in_flight(RequestId(4), ConnectionEpoch(1)));

        tracker.track(&request);
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.in_flight(RequestId(4), ConnectionEpoch(1)));
    }

    #[test]
    fn test_in_flight_is_epoch_qualified() {
        let tracker = RequestTracker::new();
        tracker.track(&call(5));
        assert!(!tracker.in_flight(RequestId(5), ConnectionEpoch(1)));

        tracker.mark_sent(RequestId(5), ConnectionEpoch(1));
        assert!(tracker.in_flight(RequestId(5), ConnectionEpoch(1)));
        assert!(!tracker.in_flight(RequestId(5), ConnectionEpoch(2)));
        assert!(!tracker.mark_sent(RequestId(6), ConnectionEpoch(1)));
    }

    #[test]
    fn test_take_unanswered_returns_only_written_requests() {
        let tracker = RequestTracker::new();
        tracker.track(&call(1));
        tracker.track(&subscription(2));
        tracker.track(&call(3));
        tracker.mark_sent(RequestId(1), ConnectionEpoch(1));
        tracker.mark_sent(RequestId(2), ConnectionEpoch(1));

        let current = Request::new(
            ServiceCall::new(RequestId(1), "light", "toggle").into(),
            ConnectionEpoch(2),
        );
        let stale = tracker.take_unanswered(ConnectionEpoch(2));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id(), RequestId(1));
        assert!(tracker.is_empty());

        tracker.track(&current);
        assert!(tracker.take_unanswered(ConnectionEpoch(2)).is_empty());
        assert_eq!(tracker.ids(), vec![RequestId(1)]);
    }

    #[test]
    fn test_rotated_keeps_creation_time() {
        let request = call(7);
        let rotated = request.rotated(RequestId(8), ConnectionEpoch(2));
        assert_eq!(rotated.id(), RequestId(8));
        assert_eq!(rotated.epoch(), ConnectionEpoch(2));
        assert_eq!(rotated.created_at(), request.created_at());
        assert!(rotated.last_update() >= request.last_update());
    }
}
