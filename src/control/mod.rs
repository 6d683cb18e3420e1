use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::domain::{Attempt, ChannelId, Exception, Session};
use crate::policy::{IndexPublisher, PolicyIndex};
use crate::store::{SqliteStore, Statistics, StoreError};

/// Longest alias kept, in bytes.
pub const MAX_ALIAS_BYTES: usize = 256;

/// Serialized mutators and queries over the isolation rules.
///
/// The single writer to the store: every mutation runs under one lock so
/// that the store write and the snapshot publish form one critical section.
/// A failed store write returns before publish, leaving the snapshot on the
/// last durable state. Queries go straight to the store.
///
/// The lock guards the store's change counter as of the last published
/// snapshot, which is how [`refresh_if_changed`](Self::refresh_if_changed)
/// tells external mutations apart from its own.
pub struct ControlApi {
    store: Arc<SqliteStore>,
    publisher: IndexPublisher,
    /// change counter of the last published snapshot; doubles as the
    /// mutator lock
    published: Mutex<i64>,
}

impl ControlApi {
    /// Build the control surface and the initial snapshot from the store.
    pub fn new(
        store: Arc<SqliteStore>,
    ) -> Result<(Self, watch::Receiver<Arc<PolicyIndex>>), StoreError> {
        let counter = store.change_counter()?;
        let initial = PolicyIndex::load(&store)?;
        let (publisher, rx) = IndexPublisher::new(initial);
        Ok((
            ControlApi {
                store,
                publisher,
                published: Mutex::new(counter),
            },
            rx,
        ))
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PolicyIndex>> {
        self.publisher.subscribe()
    }

    /// Start isolating `channel`.
    pub fn isolate(&self, channel: ChannelId, alias: Option<&str>) -> Result<Session, StoreError> {
        let mut published = self.published.lock();
        let alias = normalize_alias(alias);
        let session = self.store.create_session(channel, alias.as_deref())?;
        self.republish(&mut published)?;
        info!(channel = %channel, session = session.id, "isolation started");
        Ok(session)
    }

    /// End the active isolation for `channel`.
    pub fn stop(&self, channel: ChannelId) -> Result<i64, StoreError> {
        let mut published = self.published.lock();
        let session_id = self.store.end_session(channel)?;
        self.republish(&mut published)?;
        info!(channel = %channel, session = session_id, "isolation stopped");
        Ok(session_id)
    }

    /// Permit forwards from `allowed` into the isolated channel.
    pub fn add_exception(
        &self,
        isolated: ChannelId,
        allowed: ChannelId,
        alias: Option<&str>,
    ) -> Result<Exception, StoreError> {
        let mut published = self.published.lock();
        let session = self
            .store
            .active_session(isolated)?
            .ok_or(StoreError::NotActive(isolated))?;
        let alias = normalize_alias(alias);
        let exception = self
            .store
            .add_exception(session.id, allowed, alias.as_deref())?;
        self.republish(&mut published)?;
        info!(channel = %isolated, allowed = %allowed, "exception added");
        Ok(exception)
    }

    /// Withdraw the permission for `allowed` on the isolated channel.
    pub fn remove_exception(
        &self,
        isolated: ChannelId,
        allowed: ChannelId,
    ) -> Result<(), StoreError> {
        let mut published = self.published.lock();
        let session = self
            .store
            .active_session(isolated)?
            .ok_or(StoreError::NotActive(isolated))?;
        self.store.remove_exception(session.id, allowed)?;
        self.republish(&mut published)?;
        info!(channel = %isolated, allowed = %allowed, "exception removed");
        Ok(())
    }

    /// Active sessions, newest first.
    pub fn list(&self) -> Result<Vec<Session>, StoreError> {
        self.store.list_active_sessions()
    }

    /// The active session on `channel` and its exceptions.
    pub fn exceptions(&self, channel: ChannelId) -> Result<(Session, Vec<Exception>), StoreError> {
        let session = self
            .store
            .active_session(channel)?
            .ok_or(StoreError::NotActive(channel))?;
        let exceptions = self.store.list_exceptions(session.id)?;
        Ok((session, exceptions))
    }

    /// All sessions, optionally filtered by channel.
    pub fn history(&self, channel: Option<ChannelId>) -> Result<Vec<Session>, StoreError> {
        self.store.session_history(channel)
    }

    /// A session and its attempts, most recent first.
    pub fn attempts(
        &self,
        session_id: i64,
        limit: Option<u32>,
    ) -> Result<(Session, Vec<Attempt>), StoreError> {
        let session = self.store.session(session_id)?;
        let attempts = self.store.attempts_for_session(session_id, limit)?;
        Ok((session, attempts))
    }

    pub fn stats(&self) -> Result<Statistics, StoreError> {
        self.store.statistics()
    }

    pub fn change_counter(&self) -> Result<i64, StoreError> {
        self.store.change_counter()
    }

    /// Republish the snapshot if the store's change counter moved past the
    /// last published one. Used by the store watcher to pick up mutations
    /// made by other processes.
    pub fn refresh_if_changed(&self) -> Result<bool, StoreError> {
        {
            let published = self.published.lock();
            if self.store.change_counter()? == *published {
                return Ok(false);
            }
        }

        let mut published = self.published.lock();
        // reread under the lock: an in-process writer may have published
        // in between
        if self.store.change_counter()? == *published {
            return Ok(false);
        }
        self.republish(&mut published)?;
        Ok(true)
    }

    fn republish(&self, published: &mut i64) -> Result<(), StoreError> {
        let counter = self.store.change_counter()?;
        self.publisher.publish(PolicyIndex::load(&self.store)?);
        *published = counter;
        Ok(())
    }
}

/// Trim and truncate an operator-supplied alias to [`MAX_ALIAS_BYTES`],
/// keeping a valid char boundary. Empty aliases collapse to `None`.
pub fn normalize_alias(alias: Option<&str>) -> Option<String> {
    let trimmed = alias?.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.len() <= MAX_ALIAS_BYTES {
        return Some(trimmed.to_owned());
    }

    let mut end = MAX_ALIAS_BYTES;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    Some(trimmed[..end].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, DecisionReason};

    const ISOLATED: ChannelId = ChannelId(700_000_000_000_000_000);
    const ALLOWED: ChannelId = ChannelId(800);

    fn control() -> (ControlApi, watch::Receiver<Arc<PolicyIndex>>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        ControlApi::new(store).unwrap()
    }

    #[test]
    fn test_isolate_publishes_snapshot() {
        let (control, rx) = control();

        control.isolate(ISOLATED, None).unwrap();

        let index = rx.borrow().clone();
        let c = index.classify(ALLOWED, ISOLATED);
        assert_eq!(c.decision, Decision::Fail);
        assert_eq!(c.reason, DecisionReason::NoException);
    }

    #[test]
    fn test_exception_lifecycle_via_classify() {
        let (control, rx) = control();

        control.isolate(ISOLATED, None).unwrap();
        control.add_exception(ISOLATED, ALLOWED, None).unwrap();
        assert_eq!(
            rx.borrow().classify(ALLOWED, ISOLATED).decision,
            Decision::Resume
        );

        control.remove_exception(ISOLATED, ALLOWED).unwrap();
        assert_eq!(
            rx.borrow().classify(ALLOWED, ISOLATED).decision,
            Decision::Fail
        );

        control.stop(ISOLATED).unwrap();
        let c = rx.borrow().classify(ALLOWED, ISOLATED);
        assert_eq!(c.decision, Decision::Resume);
        assert_eq!(c.reason, DecisionReason::NotIsolated);
    }

    #[test]
    fn test_idempotence_errors() {
        let (control, _rx) = control();

        control.isolate(ISOLATED, None).unwrap();
        let err = control.isolate(ISOLATED, None).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyActive { .. }));

        control.add_exception(ISOLATED, ALLOWED, None).unwrap();
        let err = control.add_exception(ISOLATED, ALLOWED, None).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateException { .. }));

        // state unchanged by the failed calls
        assert_eq!(control.list().unwrap().len(), 1);
        let (_, exceptions) = control.exceptions(ISOLATED).unwrap();
        assert_eq!(exceptions.len(), 1);
    }

    #[test]
    fn test_exception_requires_isolation() {
        let (control, _rx) = control();

        let err = control.add_exception(ISOLATED, ALLOWED, None).unwrap_err();
        assert!(matches!(err, StoreError::NotActive(c) if c == ISOLATED));

        let err = control.remove_exception(ISOLATED, ALLOWED).unwrap_err();
        assert!(matches!(err, StoreError::NotActive(_)));
    }

    #[test]
    fn test_history_after_stop() {
        let (control, _rx) = control();

        control.isolate(ISOLATED, Some("ring peer")).unwrap();
        control.add_exception(ISOLATED, ALLOWED, None).unwrap();
        control.stop(ISOLATED).unwrap();

        // one row, transitioned to ended, not two
        let history = control.history(Some(ISOLATED)).unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].is_active());
        assert_eq!(history[0].alias.as_deref(), Some("ring peer"));
    }

    #[test]
    fn test_refresh_if_changed() {
        let (control, rx) = control();

        assert!(!control.refresh_if_changed().unwrap());

        // simulate an external writer by mutating the store underneath
        control.store.create_session(ISOLATED, None).unwrap();
        assert!(control.refresh_if_changed().unwrap());
        assert_eq!(
            rx.borrow().classify(ALLOWED, ISOLATED).decision,
            Decision::Fail
        );
        assert!(!control.refresh_if_changed().unwrap());

        // in-process mutations publish synchronously, so refresh sees
        // nothing new afterwards
        control.add_exception(ISOLATED, ALLOWED, None).unwrap();
        assert!(!control.refresh_if_changed().unwrap());
    }

    #[test]
    fn test_normalize_alias() {
        assert_eq!(normalize_alias(None), None);
        assert_eq!(normalize_alias(Some("")), None);
        assert_eq!(normalize_alias(Some("   ")), None);
        assert_eq!(normalize_alias(Some("  peer  ")), Some("peer".to_owned()));

        let long = "x".repeat(300);
        assert_eq!(normalize_alias(Some(&long)).unwrap().len(), MAX_ALIAS_BYTES);

        // truncation respects char boundaries
        let multibyte = "é".repeat(200); // 400 bytes
        let normalized = normalize_alias(Some(&multibyte)).unwrap();
        assert!(normalized.len() <= MAX_ALIAS_BYTES);
        assert!(normalized.chars().all(|c| c == 'é'));
    }
}
