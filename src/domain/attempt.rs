use serde::{Deserialize, Serialize};
use std::fmt;

use super::ChannelId;

/// Outcome of one interception decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The HTLC is allowed to proceed
    Resume,
    /// The HTLC is refused
    Fail,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Resume => "resume",
            Decision::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resume" => Some(Decision::Resume),
            "fail" => Some(Decision::Fail),
            _ => None,
        }
    }

    #[inline]
    pub fn is_resume(&self) -> bool {
        *self == Decision::Resume
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    /// Outgoing channel is isolated and the incoming edge is whitelisted
    ExceptionMatch,
    /// Outgoing channel is isolated and the incoming edge is not whitelisted
    NoException,
    /// Outgoing channel is not under isolation
    NotIsolated,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::ExceptionMatch => "exception-match",
            DecisionReason::NoException => "no-exception",
            DecisionReason::NotIsolated => "not-isolated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exception-match" => Some(DecisionReason::ExceptionMatch),
            "no-exception" => Some(DecisionReason::NoException),
            "not-isolated" => Some(DecisionReason::NotIsolated),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit row for one observed intercept request against an
/// isolated channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub session_id: i64,

    /// Epoch milliseconds, UTC
    pub observed_at: i64,

    pub incoming_channel: ChannelId,
    pub outgoing_channel: ChannelId,
    pub amount_msat: u64,
    pub incoming_htlc_index: u64,
    pub outgoing_htlc_index: u64,
    pub decision: Decision,
    pub reason: DecisionReason,
}

/// An attempt as produced by the engine, before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttempt {
    pub session_id: i64,
    pub observed_at: i64,
    pub incoming_channel: ChannelId,
    pub outgoing_channel: ChannelId,
    pub amount_msat: u64,
    pub incoming_htlc_index: u64,
    pub outgoing_htlc_index: u64,
    pub decision: Decision,
    pub reason: DecisionReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_roundtrip() {
        assert_eq!(Decision::parse("resume"), Some(Decision::Resume));
        assert_eq!(Decision::parse("fail"), Some(Decision::Fail));
        assert_eq!(Decision::parse("settle"), None);
        assert_eq!(Decision::Fail.to_string(), "fail");
    }

    #[test]
    fn test_reason_roundtrip() {
        for reason in [
            DecisionReason::ExceptionMatch,
            DecisionReason::NoException,
            DecisionReason::NotIsolated,
        ] {
            assert_eq!(DecisionReason::parse(reason.as_str()), Some(reason));
        }
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&DecisionReason::NoException).unwrap();
        assert_eq!(json, "\"no-exception\"");

        let parsed: Decision = serde_json::from_str("\"resume\"").unwrap();
        assert_eq!(parsed, Decision::Resume);
    }
}
