pub mod rpc;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataValue;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

use crate::config::Network;
use crate::engine::{
    CircuitKey, InterceptRequest, InterceptStream, InterceptTransport, Resolution, ResolveAction,
    TransportError,
};
use crate::domain::ChannelId;

/// gRPC method driven by this adapter.
const HTLC_INTERCEPTOR_PATH: &str = "/routerrpc.Router/HtlcInterceptor";

/// Buffer between the engine's send calls and the gRPC request stream.
const OUTBOUND_BUFFER: usize = 64;

/// Node credentials as read from disk.
///
/// The macaroon travels hex-encoded in gRPC metadata; the TLS certificate
/// pins the node's self-signed identity.
#[derive(Debug, Clone)]
pub struct NodeCredentials {
    pub tls_cert: Vec<u8>,
    pub macaroon_hex: String,
}

impl NodeCredentials {
    /// Read credentials from the conventional node directory layout:
    /// `<node-dir>/tls.cert` and
    /// `<node-dir>/data/chain/bitcoin/<network>/admin.macaroon`.
    pub fn discover(node_dir: &Path, network: Network) -> Result<Self, TransportError> {
        let tls_path = tls_cert_path(node_dir);
        let macaroon_path = macaroon_path(node_dir, network);

        let tls_cert = std::fs::read(&tls_path).map_err(|e| {
            TransportError::Connect(format!("cannot read {}: {e}", tls_path.display()))
        })?;
        let macaroon = std::fs::read(&macaroon_path).map_err(|e| {
            TransportError::Connect(format!("cannot read {}: {e}", macaroon_path.display()))
        })?;

        debug!(
            tls = %tls_path.display(),
            macaroon = %macaroon_path.display(),
            "node credentials loaded"
        );

        Ok(NodeCredentials {
            tls_cert,
            macaroon_hex: hex::encode(macaroon),
        })
    }
}

pub fn tls_cert_path(node_dir: &Path) -> PathBuf {
    node_dir.join("tls.cert")
}

pub fn macaroon_path(node_dir: &Path, network: Network) -> PathBuf {
    node_dir
        .join("data/chain/bitcoin")
        .join(network.as_str())
        .join("admin.macaroon")
}

/// Intercept transport speaking the node's `routerrpc` over TLS gRPC.
///
/// Credentials are re-read on every open so a node restart with a fresh
/// TLS certificate only costs one backoff cycle.
pub struct LndTransport {
    endpoint: String,
    node_dir: PathBuf,
    network: Network,
}

impl LndTransport {
    pub fn new(endpoint: impl Into<String>, node_dir: impl Into<PathBuf>, network: Network) -> Self {
        LndTransport {
            endpoint: endpoint.into(),
            node_dir: node_dir.into(),
            network,
        }
    }
}

#[async_trait]
impl InterceptTransport for LndTransport {
    async fn open(&self) -> Result<Box<dyn InterceptStream>, TransportError> {
        let credentials = NodeCredentials::discover(&self.node_dir, self.network)?;

        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&credentials.tls_cert))
            .domain_name("localhost");

        let channel: Channel = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| TransportError::Connect(format!("bad endpoint: {e}")))?
            .tls_config(tls)
            .map_err(|e| TransportError::Connect(format!("bad tls config: {e}")))?
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let macaroon = MetadataValue::try_from(credentials.macaroon_hex.as_str())
            .map_err(|e| TransportError::Connect(format!("bad macaroon metadata: {e}")))?;

        let (outbound_tx, outbound_rx) =
            mpsc::channel::<rpc::ForwardHtlcInterceptResponse>(OUTBOUND_BUFFER);
        let mut request = tonic::Request::new(ReceiverStream::new(outbound_rx));
        request.metadata_mut().insert("macaroon", macaroon);

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let codec: tonic::codec::ProstCodec<
            rpc::ForwardHtlcInterceptResponse,
            rpc::ForwardHtlcInterceptRequest,
        > = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(HTLC_INTERCEPTOR_PATH);

        let response = grpc
            .streaming(request, path, codec)
            .await
            .map_err(|status| TransportError::Connect(status.to_string()))?;

        info!(endpoint = %self.endpoint, "htlc interceptor stream established");

        Ok(Box::new(LndStream {
            inbound: response.into_inner(),
            outbound: Some(outbound_tx),
        }))
    }
}

struct LndStream {
    inbound: tonic::codec::Streaming<rpc::ForwardHtlcInterceptRequest>,
    outbound: Option<mpsc::Sender<rpc::ForwardHtlcInterceptResponse>>,
}

#[async_trait]
impl InterceptStream for LndStream {
    async fn recv(&mut self) -> Result<Option<InterceptRequest>, TransportError> {
        match self.inbound.message().await {
            Ok(Some(message)) => Ok(Some(request_from_proto(message))),
            Ok(None) => Ok(None),
            Err(status) => Err(TransportError::Recv(status.to_string())),
        }
    }

    async fn send(&mut self, resolution: Resolution) -> Result<(), TransportError> {
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::Closed);
        };
        outbound
            .send(resolution_to_proto(resolution))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // dropping the sender half-closes the request stream
        self.outbound.take();
        Ok(())
    }
}

fn request_from_proto(message: rpc::ForwardHtlcInterceptRequest) -> InterceptRequest {
    let key = message.incoming_circuit_key.unwrap_or_default();
    InterceptRequest {
        incoming_circuit_key: CircuitKey {
            chan_id: key.chan_id,
            htlc_id: key.htlc_id,
        },
        outgoing_channel: ChannelId(message.outgoing_requested_chan_id),
        // the wire carries no outgoing index at interception time
        outgoing_htlc_index: 0,
        amount_msat: message.outgoing_amount_msat,
    }
}

fn resolution_to_proto(resolution: Resolution) -> rpc::ForwardHtlcInterceptResponse {
    let mut response = rpc::ForwardHtlcInterceptResponse {
        incoming_circuit_key: Some(rpc::CircuitKey {
            chan_id: resolution.incoming_circuit_key.chan_id,
            htlc_id: resolution.incoming_circuit_key.htlc_id,
        }),
        action: rpc::ResolveHoldForwardAction::Resume as i32,
        preimage: Vec::new(),
        failure_message: Vec::new(),
        failure_code: 0,
    };

    match resolution.action {
        ResolveAction::Resume => {}
        ResolveAction::Fail { code } => {
            response.action = rpc::ResolveHoldForwardAction::Fail as i32;
            response.failure_code = code.0;
        }
        ResolveAction::Settle { preimage } => {
            response.action = rpc::ResolveHoldForwardAction::Settle as i32;
            response.preimage = preimage;
        }
    }

    response
}
