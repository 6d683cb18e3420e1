pub mod attempt;
pub mod channel;
pub mod session;

pub use attempt::{Attempt, Decision, DecisionReason, NewAttempt};
pub use channel::ChannelId;
pub use session::{Exception, Session, SessionStatus};

/// Current wall-clock time as epoch milliseconds (UTC).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
