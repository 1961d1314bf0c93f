//! Bus liveness self-check.
//!
//! The worker publishes an `admin ping` addressed to itself and expects to
//! read it back. Pings are sent at the boot cadence until the first one comes
//! back, then at the pace cadence. Too many pings without an answer means the
//! bus is not delivering and the worker stops.

use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::constants::{commands, topics};
use crate::errors::{LcmError, LcmResult};
use crate::orchestration::SystemContext;
use crate::utils::time::epoch_seconds;

/// Ping bookkeeping shared by the heartbeat and the command router
#[derive(Debug, Default)]
pub struct Liveness {
    pings_not_received: AtomicU32,
    first_ping_received: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pings_not_received(&self) -> u32 {
        self.pings_not_received.load(Ordering::SeqCst)
    }

    pub fn first_ping_received(&self) -> bool {
        self.first_ping_received.load(Ordering::SeqCst)
    }

    fn ping_sent(&self) -> u32 {
        self.pings_not_received.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Our own ping came back
    pub fn ping_received(&self) {
        self.pings_not_received.store(0, Ordering::SeqCst);
        self.first_ping_received.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    ctx: Arc<SystemContext>,
    liveness: Arc<Liveness>,
}

impl Heartbeat {
    pub fn new(ctx: Arc<SystemContext>, liveness: Arc<Liveness>) -> Self {
        Self { ctx, liveness }
    }

    /// Send pings until the bus stops answering. Only returns on failure.
    pub async fn run(&self) -> LcmResult<()> {
        let settings = &self.ctx.config.heartbeat;
        loop {
            if self.liveness.pings_not_received() > settings.max_pings_not_received {
                error!(
                    worker_id = %self.ctx.worker_id,
                    missed = self.liveness.pings_not_received(),
                    "Bus is not delivering our pings"
                );
                return Err(LcmError::Liveness(
                    "It is not receiving pings from the bus".to_string(),
                ));
            }

            let params = json!({
                "from": self.ctx.worker_id,
                "to": self.ctx.worker_id,
                "worker_id": self.ctx.worker_id,
            });
            match self.ctx.bus.publish(topics::ADMIN, commands::PING, params).await {
                Ok(()) => {
                    let outstanding = self.liveness.ping_sent();
                    debug!(outstanding, "Ping sent");
                }
                Err(e) => {
                    warn!(error = %e, "Cannot publish ping");
                    self.liveness.ping_sent();
                }
            }

            let wait = if self.liveness.first_ping_received() {
                settings.pace_interval()
            } else {
                settings.boot_interval()
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Record the time of the last answered ping for external health checks
pub async fn touch_health_check(path: &str) {
    if let Err(e) = tokio::fs::write(path, epoch_seconds().to_string()).await {
        warn!(path, error = %e, "Cannot write health check file");
    }
}
