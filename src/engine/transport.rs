use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ChannelId;

/// Wire failure code attached to outbound `fail` resolutions.
///
/// The value is the node's failure-code enumeration; policy refusals use
/// `TemporaryChannelFailure` so upstream nodes treat the refusal as
/// transient and routing gossip stays clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureCode(pub i32);

impl FailureCode {
    pub const TEMPORARY_CHANNEL_FAILURE: FailureCode = FailureCode(15);
}

/// Failure code emitted on every policy refusal.
pub const POLICY_FAILURE_CODE: FailureCode = FailureCode::TEMPORARY_CHANNEL_FAILURE;

/// Identifies one in-flight HTLC on its incoming channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitKey {
    pub chan_id: u64,
    pub htlc_id: u64,
}

/// One forwarding attempt pushed by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptRequest {
    pub incoming_circuit_key: CircuitKey,
    pub outgoing_channel: ChannelId,
    pub outgoing_htlc_index: u64,
    pub amount_msat: u64,
}

impl InterceptRequest {
    #[inline]
    pub fn incoming_channel(&self) -> ChannelId {
        ChannelId(self.incoming_circuit_key.chan_id)
    }
}

/// How to resolve an intercepted HTLC.
///
/// The wire contract also carries `settle`; this engine only ever emits
/// `resume` and `fail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveAction {
    Resume,
    Fail { code: FailureCode },
    Settle { preimage: Vec<u8> },
}

/// Outbound resolution, keyed by the request's circuit key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub incoming_circuit_key: CircuitKey,
    pub action: ResolveAction,
}

impl Resolution {
    pub fn resume(incoming_circuit_key: CircuitKey) -> Self {
        Resolution {
            incoming_circuit_key,
            action: ResolveAction::Resume,
        }
    }

    pub fn fail(incoming_circuit_key: CircuitKey, code: FailureCode) -> Self {
        Resolution {
            incoming_circuit_key,
            action: ResolveAction::Fail { code },
        }
    }
}

/// Errors crossing the intercept stream boundary.
///
/// These never reach the operator as one-shot failures; they feed the
/// engine's backoff loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open intercept stream: {0}")]
    Connect(String),

    #[error("intercept stream receive failed: {0}")]
    Recv(String),

    #[error("intercept stream send failed: {0}")]
    Send(String),

    #[error("intercept stream closed by peer")]
    Closed,
}

/// Factory for intercept streams.
///
/// Kept behind a trait so tests (and alternative nodes) substitute their
/// own stream without touching the engine.
#[async_trait]
pub trait InterceptTransport: Send + Sync {
    async fn open(&self) -> Result<Box<dyn InterceptStream>, TransportError>;
}

/// One open bidirectional intercept stream.
#[async_trait]
pub trait InterceptStream: Send {
    /// Receive the next request. `Ok(None)` is a clean end-of-stream.
    async fn recv(&mut self) -> Result<Option<InterceptRequest>, TransportError>;

    /// Send one resolution.
    async fn send(&mut self, resolution: Resolution) -> Result<(), TransportError>;

    /// Close the stream; further sends fail.
    async fn close(&mut self) -> Result<(), TransportError>;
}
