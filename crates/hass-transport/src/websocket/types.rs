//! Core type definitions for the hub protocol.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Identifier correlating a request with its `result`.
///
/// `0` is reserved for messages that are not correlated (the authentication
/// handshake).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// The id carried by uncorrelated messages.
    pub const UNCORRELATED: Self = Self(0);

    /// Get the inner value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns true unless this is [`RequestId::UNCORRELATED`].
    pub fn is_correlated(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Counts successful connections; requests remember the epoch their id was
/// allocated in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionEpoch(pub u64);

impl ConnectionEpoch {
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConnectionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe monotonically increasing request id source.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first id is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> RequestId {
        RequestId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Restart counting so that the next id is `floor + 1`.
    pub fn reset_to(&self, floor: u64) {
        self.last.store(floor, Ordering::SeqCst);
    }

    /// The most recently allocated id (0 when none was allocated yet).
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Session state of the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel.
    #[default]
    Disconnected,
    /// Connect loop running.
    Connecting,
    /// Channel open, handshake not completed.
    Connected,
    /// Channel open and the hub accepted the credential.
    Authenticated,
}

impl ConnectionState {
    /// Returns true when a channel is open.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Returns true when the hub accepted the credential.
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_id(), RequestId(1));
        assert_eq!(ids.next_id(), RequestId(2));
        assert_eq!(ids.last(), 2);
    }

    #[test]
    fn test_reset_restarts_after_floor() {
        let ids = IdAllocator::new();
        for _ in 0..41 {
            ids.next_id();
        }
        ids.reset_to(0);
        assert_eq!(ids.next_id(), RequestId(1));

        ids.reset_to(5);
        assert_eq!(ids.next_id(), RequestId(6));
    }

    #[test]
    fn test_concurrent_allocation_is_unique_and_monotonic() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    let mut local = Vec::with_capacity(500);
                    for _ in 0..500 {
                        local.push(ids.next_id().get());
                    }
                    local
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let local = handle.join().unwrap();
            assert!(local.windows(2).all(|w| w[0] < w[1]));
            for id in local {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(ids.last(), 4000);
    }

    #[test]
    fn test_uncorrelated_id() {
        assert!(!RequestId::UNCORRELATED.is_correlated());
        assert!(RequestId(3).is_correlated());
        assert_eq!(RequestId::from(9).to_string(), "9");
    }

    #[test]
    fn test_connection_state_flags() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connected.is_authenticated());
        assert!(ConnectionState::Authenticated.is_connected());
        assert!(ConnectionState::Authenticated.is_authenticated());
    }
}
