// src/store/mod.rs
pub mod attempt_log;
pub mod sqlite;

pub use attempt_log::{AttemptLog, AttemptLogStats};
pub use sqlite::{SqliteStore, Statistics, SCHEMA_VERSION};

use thiserror::Error;

use crate::domain::ChannelId;

/// Errors surfaced by store operations.
///
/// The conflict and not-found variants are part of the control surface
/// contract; everything persistence-related collapses into `Sqlite`/`Io`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("channel {channel_id} is already isolated (session {session_id})")]
    AlreadyActive {
        channel_id: ChannelId,
        session_id: i64,
    },

    #[error("channel {0} is not currently isolated")]
    NotActive(ChannelId),

    #[error("session {0} not found")]
    SessionNotFound(i64),

    #[error("session {0} is not active")]
    SessionNotActive(i64),

    #[error("exception for channel {allowed} already exists on session {session_id}")]
    DuplicateException { session_id: i64, allowed: ChannelId },

    #[error("no exception for channel {allowed} on session {session_id}")]
    ExceptionNotFound { session_id: i64, allowed: ChannelId },

    #[error("incompatible database schema version {found} (expected {expected})")]
    SchemaVersion { found: i64, expected: i64 },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for conflicts with existing state (exit code 4 at the CLI).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyActive { .. } | StoreError::DuplicateException { .. }
        )
    }

    /// True when the named target does not exist (exit code 3 at the CLI).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotActive(_)
                | StoreError::SessionNotFound(_)
                | StoreError::SessionNotActive(_)
                | StoreError::ExceptionNotFound { .. }
        )
    }

    /// True for persistence failures (exit code 5 at the CLI).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(_) | StoreError::Io(_) | StoreError::SchemaVersion { .. }
        )
    }
}
