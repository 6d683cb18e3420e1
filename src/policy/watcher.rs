use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use crate::control::ControlApi;

/// Watch the store for rule changes made by other processes and republish
/// the policy snapshot when the change counter moves.
///
/// In-process mutations through [`ControlApi`] publish synchronously; this
/// only exists because the operator CLI runs as a separate process against
/// the same database file.
pub struct StoreWatcher {
    control: Arc<ControlApi>,
    check_interval: Duration,
}

impl StoreWatcher {
    pub fn new(control: Arc<ControlApi>, check_interval: Duration) -> Self {
        StoreWatcher {
            control,
            check_interval,
        }
    }

    /// Start watching. The task exits on shutdown.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                match self.control.refresh_if_changed() {
                    Ok(true) => info!("external rule change detected, snapshot republished"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "error checking for rule changes"),
                }
            }
        })
    }
}
