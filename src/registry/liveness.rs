//! Liveness monitor
//!
//! Every cycle each connected peer either gets a fresh ping or, if it never
//! answered the previous one, is evicted. There is no grace period beyond a
//! single missed answer. Peers registered without a connection are never
//! probed here.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::PeerRegistry;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: Vec<String>,
}

pub struct LivenessMonitor {
    registry: PeerRegistry,
    period: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: PeerRegistry, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Run one probe cycle
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for (peer_id, conn) in self.registry.connected().await {
            if conn.awaiting_answer() {
                if self.registry.evict(&peer_id, conn.id()).await {
                    report.evicted.push(peer_id);
                }
                continue;
            }

            // A failed ping leaves the probe pending, so the next cycle evicts
            if let Err(e) = conn.probe() {
                debug!(peer_id = %peer_id, error = %e, "Liveness probe not sent");
            }
            report.probed += 1;
        }

        report
    }

    /// Sweep forever on the configured period
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(period_secs = self.period.as_secs(), "Liveness monitor started");

            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = self.sweep().await;
                if !report.evicted.is_empty() {
                    info!(
                        evicted = report.evicted.len(),
                        probed = report.probed,
                        "Liveness sweep evicted peers"
                    );
                } else {
                    debug!(probed = report.probed, "Liveness sweep complete");
                }
            }
        })
    }
}
