//! Device liveness monitoring.
//!
//! A background task sweeps the router on a fixed cadence and evicts device
//! bindings that have stopped sending heartbeats.

use crate::router::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Liveness configuration.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// A device silent for longer than this is evicted.
    pub timeout: Duration,
    /// Upper bound on evictions per sweep. The rest wait for the next one.
    pub max_evictions_per_sweep: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(300),
            max_evictions_per_sweep: 1_000,
        }
    }
}

/// Periodic sweeper for stale device bindings.
#[derive(Clone)]
pub struct LivenessMonitor {
    router: Arc<Router>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    #[must_use]
    pub fn new(router: Arc<Router>, config: LivenessConfig) -> Self {
        Self { router, config }
    }

    #[must_use]
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Run one sweep now. Returns the number of devices evicted.
    pub fn sweep(&self) -> usize {
        let evicted = self.router.sweep_stale(
            Instant::now(),
            self.config.timeout,
            self.config.max_evictions_per_sweep.max(1),
        );
        if evicted > 0 {
            info!(evicted, "Liveness sweep evicted stale devices");
        } else {
            debug!("Liveness sweep found no stale devices");
        }
        evicted
    }

    /// Start sweeping in the background.
    ///
    /// The first sweep runs one interval after the call. A sweep that panics
    /// is logged and the schedule continues. Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        info!(
            interval_ms = period.as_millis() as u64,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Starting liveness monitor"
        );

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let monitor = self.clone();
                if let Err(err) = tokio::spawn(async move { monitor.sweep() }).await {
                    error!("Liveness sweep failed: {}", err);
                }
            }
        })
    }
}
