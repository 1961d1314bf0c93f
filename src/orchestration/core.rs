//! # LCM Core
//!
//! The process event loop: reads commands from the bus, hands them to the
//! [`CommandRouter`] and keeps the bus heartbeat going. Lifecycle jobs run as
//! independent tasks; the loop itself never waits on them.
//!
//! `run` returns when an `exit` command arrives, when bus reads fail too many
//! times in a row, or when the heartbeat stops getting answers.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::command_router::{CommandRouter, Routing};
use super::heartbeat::{Heartbeat, Liveness};
use super::SystemContext;
use crate::config::LcmConfig;
use crate::connectors::{K8sConnector, RoClient, VcaConnector};
use crate::constants::{topics, ResourceKind};
use crate::errors::{LcmError, LcmResult};

/// Topics this worker consumes
pub const SUBSCRIBED_TOPICS: [&str; 8] = [
    topics::ADMIN,
    topics::NS,
    topics::NSI,
    topics::VIM_ACCOUNT,
    topics::WIM_ACCOUNT,
    topics::SDN,
    topics::K8S_CLUSTER,
    topics::K8S_REPO,
];

#[derive(Debug)]
pub struct LcmCore {
    ctx: Arc<SystemContext>,
    router: CommandRouter,
    heartbeat: Heartbeat,
    liveness: Arc<Liveness>,
}

impl LcmCore {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        let liveness = Arc::new(Liveness::new());
        Self {
            router: CommandRouter::new(ctx.clone(), liveness.clone()),
            heartbeat: Heartbeat::new(ctx.clone(), liveness.clone()),
            liveness,
            ctx,
        }
    }

    /// Bootstrap against PostgreSQL with the given collaborators
    pub async fn from_config(
        config: LcmConfig,
        ro: Arc<dyn RoClient>,
        vca: Arc<dyn VcaConnector>,
        k8s: Arc<dyn K8sConnector>,
    ) -> LcmResult<Self> {
        config.validate()?;
        info!("🔧 Initializing LCM core from configuration");
        let ctx = SystemContext::with_postgres(config, ro, vca, k8s).await?;
        Ok(Self::new(Arc::new(ctx)))
    }

    pub fn context(&self) -> &Arc<SystemContext> {
        &self.ctx
    }

    pub fn liveness(&self) -> &Arc<Liveness> {
        &self.liveness
    }

    /// Handle one message; exposed for embedding and tests
    pub async fn dispatch(&self, message: &crate::messaging::BusMessage) -> Routing {
        self.router.route(message).await
    }

    /// Run until exit or a fatal bus condition
    pub async fn run(&self) -> LcmResult<()> {
        info!(worker_id = %self.ctx.worker_id, "🚀 LCM core started");
        let outcome = tokio::select! {
            read = self.read_loop() => read,
            beat = self.heartbeat.run() => beat,
        };
        match &outcome {
            Ok(()) => info!(worker_id = %self.ctx.worker_id, "LCM core stopped"),
            Err(e) => error!(worker_id = %self.ctx.worker_id, error = %e, "LCM core stopped"),
        }
        self.cancel_all();
        outcome
    }

    async fn read_loop(&self) -> LcmResult<()> {
        let settings = &self.ctx.config.message;
        let mut consecutive_errors: u32 = 0;
        loop {
            match self
                .ctx
                .bus
                .receive(&SUBSCRIBED_TOPICS, settings.batch_size)
                .await
            {
                Ok(messages) => {
                    consecutive_errors = 0;
                    if messages.is_empty() {
                        tokio::time::sleep(settings.poll_interval()).await;
                        continue;
                    }
                    for message in messages {
                        if let Err(e) = self.ctx.bus.ack(&message).await {
                            warn!(topic = %message.topic, error = %e, "Cannot acknowledge message");
                        }
                        if self.router.route(&message).await == Routing::Exit {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(error = %e, consecutive_errors, "Error reading from bus");
                    if consecutive_errors >= settings.max_consecutive_errors {
                        return Err(LcmError::Messaging(format!(
                            "{consecutive_errors} consecutive bus read failures: {e}"
                        )));
                    }
                    tokio::time::sleep(settings.poll_interval()).await;
                }
            }
        }
    }

    /// Cancel every job this process still runs
    fn cancel_all(&self) {
        for kind in ResourceKind::ALL {
            for resource_id in self.ctx.tasks.resources(kind) {
                self.ctx.tasks.cancel(kind, &resource_id, None, None);
            }
        }
    }
}
