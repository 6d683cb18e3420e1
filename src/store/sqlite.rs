// src/store/sqlite.rs
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::info;

use crate::domain::{
    now_ms, Attempt, ChannelId, Decision, DecisionReason, Exception, NewAttempt, Session,
    SessionStatus,
};

use super::StoreError;

/// Schema version persisted in the one-row `meta` table.
///
/// Opening a database with a different version fails startup fatally;
/// there is no migration path below version 1.
pub const SCHEMA_VERSION: i64 = 1;

/// Schema initialization SQL.
///
/// Convention notes:
/// - Timestamps are epoch milliseconds (i64), UTC.
/// - Channel ids are stored as the i64 bit pattern of the u64 id.
/// - The partial unique index on `sessions` enforces at most one active
///   session per channel; `exceptions` carries a composite uniqueness on
///   (session_id, allowed_channel_id).
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL,
    alias TEXT,
    started_at INTEGER NOT NULL,  -- epoch ms
    ended_at INTEGER,             -- epoch ms, NULL while active
    status TEXT NOT NULL DEFAULT 'active',
    total_attempts INTEGER NOT NULL DEFAULT 0,
    total_resumed INTEGER NOT NULL DEFAULT 0,
    total_failed INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_channel
    ON sessions(channel_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_sessions_channel ON sessions(channel_id);

CREATE TABLE IF NOT EXISTS exceptions (
    exception_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(session_id),
    allowed_channel_id INTEGER NOT NULL,
    alias TEXT,
    created_at INTEGER NOT NULL,  -- epoch ms
    UNIQUE(session_id, allowed_channel_id)
);

CREATE TABLE IF NOT EXISTS attempts (
    attempt_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(session_id),
    observed_at INTEGER NOT NULL,  -- epoch ms
    incoming_channel_id INTEGER NOT NULL,
    outgoing_channel_id INTEGER NOT NULL,
    amount_msat INTEGER NOT NULL,
    incoming_htlc_index INTEGER NOT NULL,
    outgoing_htlc_index INTEGER NOT NULL,
    decision TEXT NOT NULL,
    reason TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attempts_session
    ON attempts(session_id, observed_at);

-- One-row metadata: schema version + rule change counter.
-- The counter moves on every rule mutation and is what the store watcher
-- polls to pick up writes from other processes.
CREATE TABLE IF NOT EXISTS meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    change_counter INTEGER NOT NULL DEFAULT 0
);
"#;

/// Global counters over sessions and attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Statistics {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub total_attempts: u64,
    pub resumed: u64,
    pub failed: u64,
}

/// Durable session, exception, and attempt log over a single SQLite file.
///
/// All access goes through one connection behind a mutex: mutators are
/// naturally serialized, and WAL mode keeps concurrent readers from other
/// processes (the operator CLI) unblocked.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure schema v1.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// In-memory store for tests and benches.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // WAL keeps concurrent readers (the operator CLI) unblocked while
        // the daemon writes; the pragma reports the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        let version: Option<i64> = conn
            .query_row("SELECT schema_version FROM meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO meta (id, schema_version, change_counter) VALUES (1, ?1, 0)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(found) if found == SCHEMA_VERSION => {}
            Some(found) => {
                return Err(StoreError::SchemaVersion {
                    found,
                    expected: SCHEMA_VERSION,
                })
            }
        }

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Start an isolation session for `channel_id`.
    pub fn create_session(
        &self,
        channel_id: ChannelId,
        alias: Option<&str>,
    ) -> Result<Session, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT session_id FROM sessions WHERE channel_id = ?1 AND status = 'active'",
                params![channel_id.to_db()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(session_id) = existing {
            return Err(StoreError::AlreadyActive {
                channel_id,
                session_id,
            });
        }

        let started_at = now_ms();
        tx.execute(
            "INSERT INTO sessions (channel_id, alias, started_at, status)
             VALUES (?1, ?2, ?3, 'active')",
            params![channel_id.to_db(), alias, started_at],
        )?;
        let id = tx.last_insert_rowid();

        bump_change_counter(&tx)?;
        tx.commit()?;

        Ok(Session {
            id,
            channel_id,
            alias: alias.map(str::to_owned),
            started_at,
            ended_at: None,
            status: SessionStatus::Active,
            total_attempts: 0,
            total_resumed: 0,
            total_failed: 0,
        })
    }

    /// End the active isolation session for `channel_id`.
    pub fn end_session(&self, channel_id: ChannelId) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let session_id: Option<i64> = tx
            .query_row(
                "SELECT session_id FROM sessions WHERE channel_id = ?1 AND status = 'active'",
                params![channel_id.to_db()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(session_id) = session_id else {
            return Err(StoreError::NotActive(channel_id));
        };

        tx.execute(
            "UPDATE sessions SET ended_at = ?1, status = 'ended' WHERE session_id = ?2",
            params![now_ms(), session_id],
        )?;

        bump_change_counter(&tx)?;
        tx.commit()?;

        Ok(session_id)
    }

    /// Whitelist `allowed` as an incoming edge on an active session.
    pub fn add_exception(
        &self,
        session_id: i64,
        allowed: ChannelId,
        alias: Option<&str>,
    ) -> Result<Exception, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match status.as_deref() {
            None => return Err(StoreError::SessionNotFound(session_id)),
            Some("active") => {}
            Some(_) => return Err(StoreError::SessionNotActive(session_id)),
        }

        let created_at = now_ms();
        let inserted = tx.execute(
            "INSERT INTO exceptions (session_id, allowed_channel_id, alias, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, allowed.to_db(), alias, created_at],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(StoreError::DuplicateException {
                    session_id,
                    allowed,
                });
            }
            Err(e) => return Err(e.into()),
        }

        bump_change_counter(&tx)?;
        tx.commit()?;

        Ok(Exception {
            session_id,
            allowed_channel_id: allowed,
            alias: alias.map(str::to_owned),
            created_at,
        })
    }

    /// Drop the whitelist entry for `allowed` on `session_id`.
    pub fn remove_exception(&self, session_id: i64, allowed: ChannelId) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM exceptions WHERE session_id = ?1 AND allowed_channel_id = ?2",
            params![session_id, allowed.to_db()],
        )?;
        if removed == 0 {
            return Err(StoreError::ExceptionNotFound {
                session_id,
                allowed,
            });
        }

        bump_change_counter(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Append one audit row and bump the owning session's counters.
    ///
    /// Callers on the decision path go through [`super::AttemptLog`], which
    /// swallows errors from here; retries are not the store's business.
    pub fn append_attempt(&self, attempt: &NewAttempt) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO attempts (session_id, observed_at, incoming_channel_id,
                 outgoing_channel_id, amount_msat, incoming_htlc_index,
                 outgoing_htlc_index, decision, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                attempt.session_id,
                attempt.observed_at,
                attempt.incoming_channel.to_db(),
                attempt.outgoing_channel.to_db(),
                attempt.amount_msat as i64,
                attempt.incoming_htlc_index as i64,
                attempt.outgoing_htlc_index as i64,
                attempt.decision.as_str(),
                attempt.reason.as_str(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        let counter_column = match attempt.decision {
            Decision::Resume => "total_resumed",
            Decision::Fail => "total_failed",
        };
        tx.execute(
            &format!(
                "UPDATE sessions SET total_attempts = total_attempts + 1,
                     {counter_column} = {counter_column} + 1
                 WHERE session_id = ?1"
            ),
            params![attempt.session_id],
        )?;

        tx.commit()?;
        Ok(id)
    }

    /// All sessions with status `active`, newest first.
    pub fn list_active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, channel_id, alias, started_at, ended_at, status,
                    total_attempts, total_resumed, total_failed
             FROM sessions WHERE status = 'active'
             ORDER BY started_at DESC, session_id DESC",
        )?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// The active session for `channel_id`, if any.
    pub fn active_session(&self, channel_id: ChannelId) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT session_id, channel_id, alias, started_at, ended_at, status,
                        total_attempts, total_resumed, total_failed
                 FROM sessions WHERE channel_id = ?1 AND status = 'active'",
                params![channel_id.to_db()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Look up one session by id.
    pub fn session(&self, session_id: i64) -> Result<Session, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT session_id, channel_id, alias, started_at, ended_at, status,
                    total_attempts, total_resumed, total_failed
             FROM sessions WHERE session_id = ?1",
            params![session_id],
            session_from_row,
        )
        .optional()?
        .ok_or(StoreError::SessionNotFound(session_id))
    }

    /// Exceptions scoped to a session, newest first.
    pub fn list_exceptions(&self, session_id: i64) -> Result<Vec<Exception>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, allowed_channel_id, alias, created_at
             FROM exceptions WHERE session_id = ?1
             ORDER BY created_at DESC, exception_id DESC",
        )?;
        let exceptions = stmt
            .query_map(params![session_id], |row| {
                Ok(Exception {
                    session_id: row.get(0)?,
                    allowed_channel_id: ChannelId::from_db(row.get(1)?),
                    alias: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(exceptions)
    }

    /// Every (isolated channel, allowed incoming channel) pair that is
    /// currently in force. One query so the policy index rebuild stays
    /// O(sessions + exceptions).
    pub fn active_exceptions(&self) -> Result<Vec<(ChannelId, ChannelId)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.channel_id, e.allowed_channel_id
             FROM exceptions e
             JOIN sessions s ON s.session_id = e.session_id
             WHERE s.status = 'active'",
        )?;
        let pairs = stmt
            .query_map([], |row| {
                Ok((
                    ChannelId::from_db(row.get(0)?),
                    ChannelId::from_db(row.get(1)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// All sessions, optionally filtered by channel, newest first.
    pub fn session_history(
        &self,
        channel_id: Option<ChannelId>,
    ) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, channel_id, alias, started_at, ended_at, status,
                    total_attempts, total_resumed, total_failed
             FROM sessions
             WHERE (?1 IS NULL OR channel_id = ?1)
             ORDER BY started_at DESC, session_id DESC",
        )?;
        let sessions = stmt
            .query_map(params![channel_id.map(ChannelId::to_db)], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Attempts for a session, most recent first. `None` means unbounded.
    pub fn attempts_for_session(
        &self,
        session_id: i64,
        limit: Option<u32>,
    ) -> Result<Vec<Attempt>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT attempt_id, session_id, observed_at, incoming_channel_id,
                    outgoing_channel_id, amount_msat, incoming_htlc_index,
                    outgoing_htlc_index, decision, reason
             FROM attempts WHERE session_id = ?1
             ORDER BY observed_at DESC, attempt_id DESC
             LIMIT ?2",
        )?;
        let attempts = stmt
            .query_map(
                params![session_id, limit.map(i64::from).unwrap_or(-1)],
                attempt_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attempts)
    }

    /// Global counters.
    pub fn statistics(&self) -> Result<Statistics, StoreError> {
        let conn = self.conn.lock();
        let (total_sessions, active_sessions): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(status = 'active'), 0) FROM sessions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (total_attempts, resumed, failed): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(decision = 'resume'), 0),
                    COALESCE(SUM(decision = 'fail'), 0)
             FROM attempts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(Statistics {
            total_sessions: total_sessions as u64,
            active_sessions: active_sessions as u64,
            total_attempts: total_attempts as u64,
            resumed: resumed as u64,
            failed: failed as u64,
        })
    }

    /// Monotonic counter of rule mutations, used by the store watcher to
    /// detect writes from other processes.
    pub fn change_counter(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let counter = conn.query_row("SELECT change_counter FROM meta WHERE id = 1", [], |row| {
            row.get(0)
        })?;
        Ok(counter)
    }
}

fn bump_change_counter(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE meta SET change_counter = change_counter + 1 WHERE id = 1",
        [],
    )?;
    Ok(())
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(5)?;
    Ok(Session {
        id: row.get(0)?,
        channel_id: ChannelId::from_db(row.get(1)?),
        alias: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Ended),
        total_attempts: row.get::<_, i64>(6)? as u64,
        total_resumed: row.get::<_, i64>(7)? as u64,
        total_failed: row.get::<_, i64>(8)? as u64,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<Attempt> {
    let decision: String = row.get(8)?;
    let reason: String = row.get(9)?;
    Ok(Attempt {
        id: row.get(0)?,
        session_id: row.get(1)?,
        observed_at: row.get(2)?,
        incoming_channel: ChannelId::from_db(row.get(3)?),
        outgoing_channel: ChannelId::from_db(row.get(4)?),
        amount_msat: row.get::<_, i64>(5)? as u64,
        incoming_htlc_index: row.get::<_, i64>(6)? as u64,
        outgoing_htlc_index: row.get::<_, i64>(7)? as u64,
        decision: Decision::parse(&decision).unwrap_or(Decision::Fail),
        reason: DecisionReason::parse(&reason).unwrap_or(DecisionReason::NoException),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attempt(session_id: i64, incoming: u64, decision: Decision, reason: DecisionReason) -> NewAttempt {
        NewAttempt {
            session_id,
            observed_at: now_ms(),
            incoming_channel: ChannelId(incoming),
            outgoing_channel: ChannelId(700_000_000_000_000_000),
            amount_msat: 1000,
            incoming_htlc_index: 1,
            outgoing_htlc_index: 0,
            decision,
            reason,
        }
    }

    #[test]
    fn test_create_and_end_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        let chan = ChannelId(700_000_000_000_000_000);

        let session = store.create_session(chan, Some("drain-peer")).unwrap();
        assert!(session.is_active());
        assert_eq!(session.channel_id, chan);
        assert_eq!(session.alias.as_deref(), Some("drain-peer"));

        // second isolation of the same channel conflicts
        let err = store.create_session(chan, None).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyActive { session_id, .. } if session_id == session.id));

        let ended = store.end_session(chan).unwrap();
        assert_eq!(ended, session.id);

        // no longer active
        assert!(store.active_session(chan).unwrap().is_none());
        let err = store.end_session(chan).unwrap_err();
        assert!(matches!(err, StoreError::NotActive(c) if c == chan));

        // re-isolating creates a fresh session
        let second = store.create_session(chan, None).unwrap();
        assert!(second.id > session.id);
    }

    #[test]
    fn test_exceptions_unique_per_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.create_session(ChannelId(700), None).unwrap();

        store
            .add_exception(session.id, ChannelId(800), Some("router"))
            .unwrap();
        let err = store
            .add_exception(session.id, ChannelId(800), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateException { .. }));

        let listed = store.list_exceptions(session.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].allowed_channel_id, ChannelId(800));

        store.remove_exception(session.id, ChannelId(800)).unwrap();
        let err = store
            .remove_exception(session.id, ChannelId(800))
            .unwrap_err();
        assert!(matches!(err, StoreError::ExceptionNotFound { .. }));
    }

    #[test]
    fn test_exception_requires_active_session() {
        let store = SqliteStore::open_in_memory().unwrap();

        let err = store.add_exception(42, ChannelId(800), None).unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(42)));

        let session = store.create_session(ChannelId(700), None).unwrap();
        store.end_session(ChannelId(700)).unwrap();
        let err = store
            .add_exception(session.id, ChannelId(800), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotActive(id) if id == session.id));
    }

    #[test]
    fn test_ended_session_keeps_exception_rows_but_not_policy() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.create_session(ChannelId(700), None).unwrap();
        store.add_exception(session.id, ChannelId(800), None).unwrap();

        store.end_session(ChannelId(700)).unwrap();

        // rows survive for audit
        assert_eq!(store.list_exceptions(session.id).unwrap().len(), 1);
        // but no longer feed policy
        assert!(store.active_exceptions().unwrap().is_empty());

        // history shows one session, transitioned to ended
        let history = store.session_history(Some(ChannelId(700))).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SessionStatus::Ended);
        assert!(history[0].ended_at.is_some());
    }

    #[test]
    fn test_attempts_and_session_counters() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store
            .create_session(ChannelId(700_000_000_000_000_000), None)
            .unwrap();

        store
            .append_attempt(&attempt(session.id, 800, Decision::Fail, DecisionReason::NoException))
            .unwrap();
        store
            .append_attempt(&attempt(
                session.id,
                800,
                Decision::Resume,
                DecisionReason::ExceptionMatch,
            ))
            .unwrap();

        let attempts = store.attempts_for_session(session.id, None).unwrap();
        assert_eq!(attempts.len(), 2);
        // most recent first
        assert_eq!(attempts[0].decision, Decision::Resume);
        assert_eq!(attempts[0].reason, DecisionReason::ExceptionMatch);
        assert_eq!(attempts[1].decision, Decision::Fail);

        let reloaded = store.session(session.id).unwrap();
        assert_eq!(reloaded.total_attempts, 2);
        assert_eq!(reloaded.total_resumed, 1);
        assert_eq!(reloaded.total_failed, 1);

        let limited = store.attempts_for_session(session.id, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_statistics() {
        let store = SqliteStore::open_in_memory().unwrap();
        let s1 = store.create_session(ChannelId(700), None).unwrap();
        store.create_session(ChannelId(701), None).unwrap();
        store.end_session(ChannelId(701)).unwrap();

        store
            .append_attempt(&attempt(s1.id, 800, Decision::Fail, DecisionReason::NoException))
            .unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.resumed, 0);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_change_counter_moves_on_rule_mutations_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        let before = store.change_counter().unwrap();

        let session = store.create_session(ChannelId(700), None).unwrap();
        store.add_exception(session.id, ChannelId(800), None).unwrap();
        store.remove_exception(session.id, ChannelId(800)).unwrap();
        store.end_session(ChannelId(700)).unwrap();
        assert_eq!(store.change_counter().unwrap(), before + 4);

        // attempt appends are audit, not rules
        let session = store.create_session(ChannelId(700), None).unwrap();
        let counter = store.change_counter().unwrap();
        store
            .append_attempt(&attempt(session.id, 800, Decision::Fail, DecisionReason::NoException))
            .unwrap();
        assert_eq!(store.change_counter().unwrap(), counter);
    }

    #[test]
    fn test_rules_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("isolator.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let session = store
                .create_session(ChannelId(700_000_000_000_000_000), Some("noisy peer"))
                .unwrap();
            store.add_exception(session.id, ChannelId(800), None).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let active = store.list_active_sessions().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].channel_id, ChannelId(700_000_000_000_000_000));
        assert_eq!(
            store.active_exceptions().unwrap(),
            vec![(ChannelId(700_000_000_000_000_000), ChannelId(800))]
        );
    }

    #[test]
    fn test_schema_version_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("isolator.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .conn
                .lock()
                .execute("UPDATE meta SET schema_version = 99 WHERE id = 1", [])
                .unwrap();
        }

        let err = SqliteStore::open(&path).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SchemaVersion {
                found: 99,
                expected: SCHEMA_VERSION
            }
        ));
    }
}
