use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::engine::ProvisioningEngine;

/// Periodically rebuilds the topology from the registered switches
pub struct TopologyRefresher {
    engine: Arc<ProvisioningEngine>,
    interval_secs: u64,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TopologyRefresher {
    pub fn new(engine: Arc<ProvisioningEngine>, interval_secs: u64) -> Self {
        Self {
            engine,
            interval_secs,
            stop_tx: None,
        }
    }

    /// Start the refresher
    pub fn start(&mut self) {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let engine = self.engine.clone();
        let interval_secs = self.interval_secs;

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The engine was just built from a fresh discovery
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.refresh_topology().await {
                            tracing::warn!("Error refreshing topology: {}", e);
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("Topology refresher stopped");
                        break;
                    }
                }
            }
        });
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}
