pub mod backoff;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use transport::{
    CircuitKey, FailureCode, InterceptRequest, InterceptStream, InterceptTransport, Resolution,
    ResolveAction, TransportError, POLICY_FAILURE_CODE,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{now_ms, Decision, NewAttempt};
use crate::policy::PolicyIndex;
use crate::store::AttemptLog;

/// Engine tunables. Defaults match the documented schedule: 1 s base
/// backoff doubling to a 60 s cap, 1 s drain window on shutdown.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub failure_code: FailureCode,
    pub drain_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            failure_code: POLICY_FAILURE_CODE,
            drain_timeout: Duration::from_secs(1),
            backoff: BackoffConfig::default(),
        }
    }
}

enum StreamEnd {
    Shutdown,
    Failed(TransportError),
}

/// Maintains the bidirectional intercept stream and applies the policy
/// index to every request.
///
/// Per stream, resolutions are emitted strictly in request-arrival order:
/// the engine is a single loop of recv → classify → send. Classification
/// reads whatever snapshot is installed at that instant; audit rows go to
/// the attempt log without ever blocking the decision.
pub struct InterceptEngine {
    transport: Arc<dyn InterceptTransport>,
    index_rx: watch::Receiver<Arc<PolicyIndex>>,
    attempts: AttemptLog,
    shutdown: watch::Receiver<bool>,
    config: EngineConfig,
}

impl InterceptEngine {
    pub fn new(
        transport: Arc<dyn InterceptTransport>,
        index_rx: watch::Receiver<Arc<PolicyIndex>>,
        attempts: AttemptLog,
        shutdown: watch::Receiver<bool>,
        config: EngineConfig,
    ) -> Self {
        InterceptEngine {
            transport,
            index_rx,
            attempts,
            shutdown,
            config,
        }
    }

    /// Drive the stream lifecycle until shutdown.
    ///
    /// Stream and connect errors are retried under the backoff schedule;
    /// they never escape this loop.
    pub async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            debug!("opening intercept stream");
            match self.transport.open().await {
                Ok(mut stream) => {
                    info!("intercept stream open");
                    let opened_at = Instant::now();

                    match self.serve(stream.as_mut()).await {
                        StreamEnd::Shutdown => {
                            self.drain(stream.as_mut()).await;
                            let _ = stream.close().await;
                            break;
                        }
                        StreamEnd::Failed(err) => {
                            let _ = stream.close().await;
                            if opened_at.elapsed() >= backoff.reset_after() {
                                backoff.reset();
                            }
                            let delay = backoff.next_delay();
                            warn!(
                                error = %err,
                                delay_ms = delay.as_millis() as u64,
                                "intercept stream failed, reconnecting"
                            );
                            if self.sleep_interruptible(delay).await {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "could not open intercept stream, retrying"
                    );
                    if self.sleep_interruptible(delay).await {
                        break;
                    }
                }
            }
        }

        info!("intercept engine stopped");
    }

    async fn serve(&mut self, stream: &mut dyn InterceptStream) -> StreamEnd {
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return StreamEnd::Shutdown;
                    }
                }
                received = stream.recv() => match received {
                    Ok(Some(request)) => {
                        if let Err(err) = self.resolve(stream, request).await {
                            return StreamEnd::Failed(err);
                        }
                    }
                    Ok(None) => return StreamEnd::Failed(TransportError::Closed),
                    Err(err) => return StreamEnd::Failed(err),
                }
            }
        }
    }

    async fn resolve(
        &mut self,
        stream: &mut dyn InterceptStream,
        request: InterceptRequest,
    ) -> Result<(), TransportError> {
        let index = self.index_rx.borrow().clone();
        let classification = index.classify(request.incoming_channel(), request.outgoing_channel);

        let resolution = match classification.decision {
            Decision::Resume => Resolution::resume(request.incoming_circuit_key),
            Decision::Fail => {
                Resolution::fail(request.incoming_circuit_key, self.config.failure_code)
            }
        };
        stream.send(resolution).await?;

        // only forwards into an isolated channel are audited; unconstrained
        // traffic would swamp the log
        if let Some(session_id) = classification.session_id {
            match classification.decision {
                Decision::Fail => info!(
                    incoming = %request.incoming_channel(),
                    outgoing = %request.outgoing_channel,
                    amount_msat = request.amount_msat,
                    "blocked forward into isolated channel"
                ),
                Decision::Resume => info!(
                    incoming = %request.incoming_channel(),
                    outgoing = %request.outgoing_channel,
                    amount_msat = request.amount_msat,
                    "allowed forward into isolated channel"
                ),
            }

            self.attempts.record(NewAttempt {
                session_id,
                observed_at: now_ms(),
                incoming_channel: request.incoming_channel(),
                outgoing_channel: request.outgoing_channel,
                amount_msat: request.amount_msat,
                incoming_htlc_index: request.incoming_circuit_key.htlc_id,
                outgoing_htlc_index: request.outgoing_htlc_index,
                decision: classification.decision,
                reason: classification.reason,
            });
        }

        Ok(())
    }

    /// One bounded pass over requests still in flight at shutdown,
    /// resolving them with `resume` so nothing black-holes.
    async fn drain(&mut self, stream: &mut dyn InterceptStream) {
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut drained = 0u64;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, stream.recv()).await {
                Ok(Ok(Some(request))) => {
                    if stream
                        .send(Resolution::resume(request.incoming_circuit_key))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    drained += 1;
                }
                _ => break,
            }
        }

        if drained > 0 {
            info!(drained, "drained in-flight requests with resume");
        }
    }

    /// Sleep for `delay`, returning early (true) when shutdown arrives.
    async fn sleep_interruptible(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return *self.shutdown.borrow(),
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return true;
                    }
                }
            }
        }
    }
}
