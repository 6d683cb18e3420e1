pub mod watcher;

pub use watcher::StoreWatcher;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

use crate::domain::{ChannelId, Decision, DecisionReason};
use crate::store::{SqliteStore, StoreError};

/// Result of classifying one intercept request against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The active session governing the outgoing channel, if any
    pub session_id: Option<i64>,
    pub decision: Decision,
    pub reason: DecisionReason,
}

/// Immutable, read-optimized projection of the active isolation rules.
///
/// An index is never mutated in place: every rule change builds a fresh
/// instance that replaces the shared one wholesale, so readers observe
/// either the old or the new rules, never a torn state.
#[derive(Debug, Default)]
pub struct PolicyIndex {
    /// isolated channel -> active session id
    active: HashMap<u64, i64>,
    /// (isolated channel, allowed incoming channel)
    allowed: HashSet<(u64, u64)>,
}

impl PolicyIndex {
    /// Index with no isolations; everything resumes.
    pub fn empty() -> Self {
        PolicyIndex::default()
    }

    /// Rebuild from the store. O(sessions + exceptions).
    pub fn load(store: &SqliteStore) -> Result<Self, StoreError> {
        let mut index = PolicyIndex::default();
        for session in store.list_active_sessions()? {
            index.active.insert(session.channel_id.as_u64(), session.id);
        }
        for (isolated, incoming) in store.active_exceptions()? {
            index.allowed.insert((isolated.as_u64(), incoming.as_u64()));
        }
        Ok(index)
    }

    /// Decide whether a forward from `incoming` into `outgoing` may proceed.
    ///
    /// Pure in-memory lookup; this is the hot path and must stay free of
    /// locks and allocation.
    #[inline]
    pub fn classify(&self, incoming: ChannelId, outgoing: ChannelId) -> Classification {
        match self.active.get(&outgoing.as_u64()) {
            None => Classification {
                session_id: None,
                decision: Decision::Resume,
                reason: DecisionReason::NotIsolated,
            },
            Some(&session_id) => {
                if self.allowed.contains(&(outgoing.as_u64(), incoming.as_u64())) {
                    Classification {
                        session_id: Some(session_id),
                        decision: Decision::Resume,
                        reason: DecisionReason::ExceptionMatch,
                    }
                } else {
                    Classification {
                        session_id: Some(session_id),
                        decision: Decision::Fail,
                        reason: DecisionReason::NoException,
                    }
                }
            }
        }
    }

    pub fn isolation_count(&self) -> usize {
        self.active.len()
    }

    pub fn exception_count(&self) -> usize {
        self.allowed.len()
    }

    #[cfg(test)]
    pub(crate) fn with_rules(
        sessions: impl IntoIterator<Item = (u64, i64)>,
        exceptions: impl IntoIterator<Item = (u64, u64)>,
    ) -> Self {
        PolicyIndex {
            active: sessions.into_iter().collect(),
            allowed: exceptions.into_iter().collect(),
        }
    }
}

/// Single-writer handle that swaps in fresh [`PolicyIndex`] snapshots.
///
/// Readers hold a `watch::Receiver` and clone the current `Arc` per
/// request; publication is the pointer swap.
pub struct IndexPublisher {
    tx: watch::Sender<Arc<PolicyIndex>>,
}

impl IndexPublisher {
    pub fn new(initial: PolicyIndex) -> (Self, watch::Receiver<Arc<PolicyIndex>>) {
        let (tx, rx) = watch::channel(Arc::new(initial));
        (IndexPublisher { tx }, rx)
    }

    /// Replace the shared snapshot.
    pub fn publish(&self, index: PolicyIndex) {
        // send only fails with no receivers; the supervisor keeps one alive
        let _ = self.tx.send(Arc::new(index));
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PolicyIndex>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISOLATED: u64 = 700_000_000_000_000_000;

    #[test]
    fn test_classify_not_isolated() {
        let index = PolicyIndex::empty();
        let c = index.classify(ChannelId(800), ChannelId(900));

        assert_eq!(c.decision, Decision::Resume);
        assert_eq!(c.reason, DecisionReason::NotIsolated);
        assert_eq!(c.session_id, None);
    }

    #[test]
    fn test_classify_no_exception() {
        let index = PolicyIndex::with_rules([(ISOLATED, 1)], []);
        let c = index.classify(ChannelId(800), ChannelId(ISOLATED));

        assert_eq!(c.decision, Decision::Fail);
        assert_eq!(c.reason, DecisionReason::NoException);
        assert_eq!(c.session_id, Some(1));
    }

    #[test]
    fn test_classify_exception_match() {
        let index = PolicyIndex::with_rules([(ISOLATED, 1)], [(ISOLATED, 800)]);
        let c = index.classify(ChannelId(800), ChannelId(ISOLATED));

        assert_eq!(c.decision, Decision::Resume);
        assert_eq!(c.reason, DecisionReason::ExceptionMatch);
        assert_eq!(c.session_id, Some(1));

        // the exception is directional: it does not whitelist other edges
        let other = index.classify(ChannelId(801), ChannelId(ISOLATED));
        assert_eq!(other.decision, Decision::Fail);
    }

    #[test]
    fn test_classify_self_loop_and_zero_ids() {
        let index = PolicyIndex::with_rules([(ISOLATED, 1)], [(ISOLATED, 800)]);

        // self-loop through an isolated channel fails unless excepted
        let loopback = index.classify(ChannelId(ISOLATED), ChannelId(ISOLATED));
        assert_eq!(loopback.decision, Decision::Fail);
        assert_eq!(loopback.reason, DecisionReason::NoException);

        // zero / unknown incoming ids are simply not excepted
        let zero = index.classify(ChannelId(0), ChannelId(ISOLATED));
        assert_eq!(zero.decision, Decision::Fail);
    }

    #[test]
    fn test_load_reflects_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.create_session(ChannelId(ISOLATED), None).unwrap();
        store.add_exception(session.id, ChannelId(800), None).unwrap();
        store.create_session(ChannelId(901), None).unwrap();
        store.end_session(ChannelId(901)).unwrap();

        let index = PolicyIndex::load(&store).unwrap();
        assert_eq!(index.isolation_count(), 1);
        assert_eq!(index.exception_count(), 1);

        let c = index.classify(ChannelId(800), ChannelId(ISOLATED));
        assert_eq!(c.decision, Decision::Resume);
        assert_eq!(c.reason, DecisionReason::ExceptionMatch);

        // ended session no longer isolates
        let c = index.classify(ChannelId(800), ChannelId(901));
        assert_eq!(c.reason, DecisionReason::NotIsolated);
    }

    #[test]
    fn test_publisher_swaps_snapshots() {
        let (publisher, rx) = IndexPublisher::new(PolicyIndex::empty());

        let before = rx.borrow().clone();
        assert_eq!(before.isolation_count(), 0);

        publisher.publish(PolicyIndex::with_rules([(ISOLATED, 1)], []));

        let after = rx.borrow().clone();
        assert_eq!(after.isolation_count(), 1);
        // the old snapshot is untouched; readers mid-classify keep a
        // consistent view
        assert_eq!(before.isolation_count(), 0);
    }
}
