// src/lnd/rpc.rs
//! Ahead-of-time generated message types for the subset of the node's
//! `routerrpc` surface this daemon speaks: the `Router/HtlcInterceptor`
//! bidirectional stream. Field tags follow `router.proto`; unknown fields
//! on inbound messages are skipped by prost.

/// Identifies one HTLC on its incoming channel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CircuitKey {
    /// The id of the incoming channel.
    #[prost(uint64, tag = "1")]
    pub chan_id: u64,
    /// The index of the incoming htlc in the incoming channel.
    #[prost(uint64, tag = "2")]
    pub htlc_id: u64,
}

/// One forwarding attempt offered to the interceptor for a decision.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardHtlcInterceptRequest {
    /// The key of this forwarded htlc. It defines the incoming channel id
    /// and the index in this channel.
    #[prost(message, optional, tag = "1")]
    pub incoming_circuit_key: ::core::option::Option<CircuitKey>,
    /// The incoming htlc amount.
    #[prost(uint64, tag = "5")]
    pub incoming_amount_msat: u64,
    /// The incoming htlc expiry.
    #[prost(uint32, tag = "6")]
    pub incoming_expiry: u32,
    /// The htlc payment hash. This value is not guaranteed to be unique per
    /// request.
    #[prost(bytes = "vec", tag = "2")]
    pub payment_hash: ::prost::alloc::vec::Vec<u8>,
    /// The requested outgoing channel id for this forwarded htlc. Because
    /// of non-strict forwarding, this may not be the channel over which the
    /// packet will be forwarded eventually.
    #[prost(uint64, tag = "7")]
    pub outgoing_requested_chan_id: u64,
    /// The outgoing htlc amount.
    #[prost(uint64, tag = "3")]
    pub outgoing_amount_msat: u64,
    /// The outgoing htlc expiry.
    #[prost(uint32, tag = "4")]
    pub outgoing_expiry: u32,
}

/// The interceptor's verdict on one forwarding attempt.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardHtlcInterceptResponse {
    /// The key of this forwarded htlc. It defines the incoming channel id
    /// and the index in this channel.
    #[prost(message, optional, tag = "1")]
    pub incoming_circuit_key: ::core::option::Option<CircuitKey>,
    /// The resolve action for this intercepted htlc.
    #[prost(enumeration = "ResolveHoldForwardAction", tag = "2")]
    pub action: i32,
    /// The preimage in case the resolve action is Settle.
    #[prost(bytes = "vec", tag = "3")]
    pub preimage: ::prost::alloc::vec::Vec<u8>,
    /// An encrypted failure message in case the resolve action is Fail.
    #[prost(bytes = "vec", tag = "4")]
    pub failure_message: ::prost::alloc::vec::Vec<u8>,
    /// The failure code in case the resolve action is Fail.
    #[prost(enumeration = "FailureCode", tag = "5")]
    pub failure_code: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ResolveHoldForwardAction {
    Settle = 0,
    Fail = 1,
    Resume = 2,
}

impl ResolveHoldForwardAction {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ResolveHoldForwardAction::Settle => "SETTLE",
            ResolveHoldForwardAction::Fail => "FAIL",
            ResolveHoldForwardAction::Resume => "RESUME",
        }
    }
}

/// Failure codes as defined by the node's failure message enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FailureCode {
    Reserved = 0,
    IncorrectOrUnknownPaymentDetails = 1,
    IncorrectPaymentAmount = 2,
    FinalIncorrectCltvExpiry = 3,
    FinalIncorrectHtlcAmount = 4,
    FinalExpiryTooSoon = 5,
    InvalidRealm = 6,
    ExpiryTooSoon = 7,
    InvalidOnionVersion = 8,
    InvalidOnionHmac = 9,
    InvalidOnionKey = 10,
    AmountBelowMinimum = 11,
    FeeInsufficient = 12,
    IncorrectCltvExpiry = 13,
    ChannelDisabled = 14,
    TemporaryChannelFailure = 15,
    RequiredNodeFeatureMissing = 16,
    RequiredChannelFeatureMissing = 17,
    UnknownNextPeer = 18,
    TemporaryNodeFailure = 19,
    PermanentNodeFailure = 20,
    PermanentChannelFailure = 21,
    ExpiryTooFar = 22,
    MppTimeout = 23,
    InvalidOnionPayload = 24,
    InternalFailure = 997,
    UnknownFailure = 998,
    UnreadableFailure = 999,
}
