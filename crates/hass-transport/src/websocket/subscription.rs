//! Durable event subscription registry using `scc::HashMap`.
//!
//! Subscriptions outlive connections: every entry is sent again, with the
//! same id, after each reconnect. Each entry remembers the epoch it was last
//! written in so a subscription goes out at most once per connection.

use super::{
    message::EventSubscription,
    types::{ConnectionEpoch, RequestId},
};

struct Entry {
    subscription: EventSubscription,
    sent_in: Option<ConnectionEpoch>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: scc::HashMap<RequestId, Entry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns false if its id is already registered.
    pub fn insert(&self, subscription: EventSubscription) -> bool {
        let entry = Entry {
            subscription,
            sent_in: None,
        };
        self.subscriptions
            .insert_sync(entry.subscription.id, entry)
            .is_ok()
    }

    /// Move the subscription registered under `old` to `new`.
    ///
    /// The new id has not been written yet. Returns the updated subscription,
    /// or `None` if `old` is unknown.
    pub fn rekey(&self, old: RequestId, new: RequestId) -> Option<EventSubscription> {
        let (_, mut entry) = self.subscriptions.remove_sync(&old)?;
        entry.subscription.id = new;
        entry.sent_in = None;
        let subscription = entry.subscription.clone();
        let _ = self.subscriptions.insert_sync(new, entry);
        Some(subscription)
    }

    pub fn get(&self, id: RequestId) -> Option<EventSubscription> {
        self.subscriptions
            .get_sync(&id)
            .map(|entry| entry.get().subscription.clone())
    }

    /// Record that `id` was written on the channel of `epoch`.
    pub fn mark_sent(&self, id: RequestId, epoch: ConnectionEpoch) -> bool {
        self.subscriptions
            .update_sync(&id, |_, entry| entry.sent_in = Some(epoch))
            .is_some()
    }

    /// Allow `id` to be written again on the current channel, after the hub
    /// refused it.
    pub fn clear_sent(&self, id: RequestId) {
        let _ = self.subscriptions.update_sync(&id, |_, entry| entry.sent_in = None);
    }

    /// Whether `id` was already written on the channel of `epoch`.
    pub fn sent_in(&self, id: RequestId, epoch: ConnectionEpoch) -> bool {
        self.subscriptions
            .get_sync(&id)
            .is_some_and(|entry| entry.get().sent_in == Some(epoch))
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.subscriptions.get_sync(&id).is_some()
    }

    /// All subscriptions, oldest id first.
    pub fn all(&self) -> Vec<EventSubscription> {
        let mut subscriptions = Vec::with_capacity(self.subscriptions.len());
        self.subscriptions.retain_sync(|_, entry| {
            subscriptions.push(entry.subscription.clone());
            true
        });
        subscriptions.sort_unstable_by_key(|subscription| subscription.id);
        subscriptions
    }

    /// Highest registered id, 0 when empty. Ids allocated after a reset start
    /// above it.
    pub fn max_id(&self) -> u64 {
        let mut max = 0;
        self.subscriptions.retain_sync(|id, _| {
            max = max.max(id.get());
            true
        });
        max
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn clear(&self) {
        self.subscriptions.clear_sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: u64, event_type: &str) -> EventSubscription {
        EventSubscription::new(RequestId(id), event_type)
    }

    #[test]
    fn test_insert_and_list_in_id_order() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.insert(sub(9, "zha_event")));
        assert!(registry.insert(sub(2, "state_changed")));
        assert!(!registry.insert(sub(2, "call_service")));

        let all = registry.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], sub(2, "state_changed"));
        assert_eq!(all[1], sub(9, "zha_event"));
    }

    #[test]
    fn test_max_id() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.max_id(), 0);
        registry.insert(sub(4, "a"));
        registry.insert(sub(11, "b"));
        registry.insert(sub(7, "c"));
        assert_eq!(registry.max_id(), 11);
    }

    #[test]
    fn test_rekey_moves_entry() {
        let registry = SubscriptionRegistry::new();
        registry.insert(sub(3, "state_changed"));

        let moved = registry.rekey(RequestId(3), RequestId(12)).unwrap();
        assert_eq!(moved, sub(12, "state_changed"));
        assert!(!registry.contains(RequestId(3)));
        assert_eq!(registry.get(RequestId(12)), Some(sub(12, "state_changed")));
        assert_eq!(registry.len(), 1);

        assert!(registry.rekey(RequestId(3), RequestId(13)).is_none());
    }

    #[test]
    fn test_sent_epoch_is_per_connection() {
        let registry = SubscriptionRegistry::new();
        registry.insert(sub(1, "state_changed"));
        assert!(!registry.sent_in(RequestId(1), ConnectionEpoch(1)));

        assert!(registry.mark_sent(RequestId(1), ConnectionEpoch(1)));
        assert!(registry.sent_in(RequestId(1), ConnectionEpoch(1)));
        assert!(!registry.sent_in(RequestId(1), ConnectionEpoch(2)));

        registry.clear_sent(RequestId(1));
        assert!(!registry.sent_in(RequestId(1), ConnectionEpoch(1)));

        registry.mark_sent(RequestId(1), ConnectionEpoch(1));
        registry.rekey(RequestId(1), RequestId(5));
        assert!(!registry.sent_in(RequestId(5), ConnectionEpoch(1)));
        assert!(!registry.mark_sent(RequestId(1), ConnectionEpoch(1)));
    }

    #[test]
    fn test_clear() {
        let registry = SubscriptionRegistry::new();
        registry.insert(sub(1, "a"));
        registry.clear();
        assert!(registry.is_empty());
    }
}
