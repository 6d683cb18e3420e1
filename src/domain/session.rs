use serde::{Deserialize, Serialize};
use std::fmt;

use super::ChannelId;

/// Lifecycle state of an isolation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    /// Parse from the stored string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous interval during which a channel was (or is) isolated.
///
/// At most one session per channel may be active at any instant; the store
/// enforces this with a partial unique index. Sessions are never deleted,
/// only transitioned to `ended`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Store-assigned, monotonically increasing identifier
    pub id: i64,

    /// The isolated (destination) channel
    pub channel_id: ChannelId,

    /// Optional operator-supplied label, at most 256 bytes
    pub alias: Option<String>,

    /// Epoch milliseconds, UTC
    pub started_at: i64,

    /// Epoch milliseconds; set when the session ends
    pub ended_at: Option<i64>,

    pub status: SessionStatus,

    /// Attempts observed against this session
    pub total_attempts: u64,
    pub total_resumed: u64,
    pub total_failed: u64,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// A rule permitting forwards from one incoming channel into an isolated
/// channel, scoped to the owning session.
///
/// Ending the session keeps the row for audit but removes its effect on
/// policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exception {
    pub session_id: i64,
    pub allowed_channel_id: ChannelId,
    pub alias: Option<String>,

    /// Epoch milliseconds, UTC
    pub created_at: i64,
}
