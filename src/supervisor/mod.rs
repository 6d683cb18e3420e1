use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::control::ControlApi;
use crate::engine::{Backoff, BackoffConfig, EngineConfig, InterceptEngine, InterceptTransport};
use crate::policy::StoreWatcher;
use crate::store::{AttemptLog, SqliteStore};

/// Process lifecycle: wire the store, control surface, watcher, attempt
/// writer and intercept engine together, then run until a signal arrives.
///
/// The engine handles stream-level failures itself; the supervisor only
/// restarts it (under its own backoff) if the task dies outright.
pub async fn run(config: Config, transport: Arc<dyn InterceptTransport>) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config.db_path())?);
    let (control, index_rx) = ControlApi::new(store.clone())?;
    let control = Arc::new(control);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let attempt_log = AttemptLog::new(config.attempt_queue_capacity);
    let writer = attempt_log.spawn_writer(store.clone(), shutdown_rx.clone());

    let watcher =
        StoreWatcher::new(control.clone(), config.watch_interval()).spawn(shutdown_rx.clone());

    let engine_task = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut restart = Backoff::new(BackoffConfig::default());
            loop {
                let engine = InterceptEngine::new(
                    transport.clone(),
                    index_rx.clone(),
                    attempt_log.clone(),
                    shutdown_rx.clone(),
                    EngineConfig::default(),
                );

                match tokio::spawn(engine.run()).await {
                    Ok(()) => break,
                    Err(join_err) => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        let delay = restart.next_delay();
                        error!(
                            error = %join_err,
                            delay_ms = delay.as_millis() as u64,
                            "intercept engine died, restarting"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            attempt_log
        })
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %config.db_path().display(),
        "channel isolator running"
    );

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    // engine drains its stream, then the writer flushes whatever is queued
    let attempt_log = engine_task.await?;
    writer.await?;
    watcher.await?;

    let stats = attempt_log.stats();
    info!(
        written = stats.written,
        dropped = stats.dropped,
        write_errors = stats.write_errors,
        "attempt log flushed"
    );
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
