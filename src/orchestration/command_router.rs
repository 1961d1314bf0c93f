//! Turns bus messages into registered lifecycle jobs.
//!
//! Every job is registered in the task registry before it is spawned, so a
//! later command on the same resource (a terminate after an instantiate, a
//! delete after a create) can find and cancel it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::heartbeat::{touch_health_check, Liveness};
use super::lifecycle::accounts::AccountCommand;
use super::lifecycle::{AccountLcm, NetsliceLcm, NsLcm};
use super::SystemContext;
use crate::constants::{collections, commands, topics, ResourceKind};
use crate::database::Filter;
use crate::messaging::BusMessage;
use crate::registry::{job_pair, JobGuard};
use crate::utils::json::str_of;

/// What the read loop does after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Continue,
    Exit,
}

#[derive(Debug)]
pub struct CommandRouter {
    ctx: Arc<SystemContext>,
    ns: NsLcm,
    nsi: NetsliceLcm,
    accounts: AccountLcm,
    liveness: Arc<Liveness>,
    next_order_id: AtomicU64,
}

impl CommandRouter {
    pub fn new(ctx: Arc<SystemContext>, liveness: Arc<Liveness>) -> Self {
        Self {
            ns: NsLcm::new(ctx.clone()),
            nsi: NetsliceLcm::new(ctx.clone()),
            accounts: AccountLcm::new(ctx.clone()),
            ctx,
            liveness,
            next_order_id: AtomicU64::new(1),
        }
    }

    pub async fn route(&self, message: &BusMessage) -> Routing {
        let command = message.command.as_str();
        debug!(topic = %message.topic, command, "Bus message received");

        if command.starts_with('#') {
            return Routing::Continue;
        }
        match command {
            "exit" => {
                info!("Exit command received");
                return Routing::Exit;
            }
            "echo" => {
                info!(params = %message.params, "echo");
                return Routing::Continue;
            }
            _ => {}
        }

        if message.topic == topics::ADMIN {
            if command == commands::PING {
                self.handle_ping(message).await;
            } else {
                warn!(command, "Unknown admin command");
            }
            return Routing::Continue;
        }

        if message.is_notification() {
            debug!(topic = %message.topic, command, "Notification ignored");
            return Routing::Continue;
        }

        match ResourceKind::from_topic(&message.topic) {
            Some(ResourceKind::Ns) => self.route_ns(message).await,
            Some(ResourceKind::Nsi) => self.route_nsi(message).await,
            Some(kind) => self.route_account(kind, message),
            None => error!(topic = %message.topic, command, "Unknown topic"),
        }
        Routing::Continue
    }

    async fn handle_ping(&self, message: &BusMessage) {
        let to = message
            .param_str("to")
            .or_else(|| message.param_str("worker_id"));
        if to != Some(self.ctx.worker_id.as_str()) {
            return;
        }
        self.liveness.ping_received();
        if let Some(path) = self.ctx.config.global.health_check_file.as_deref() {
            touch_health_check(path).await;
        }
    }

    /// Register a job and run it in the background
    fn spawn_job<F, Fut>(&self, kind: ResourceKind, resource_id: &str, op_id: &str, name: &str, job: F)
    where
        F: FnOnce(JobGuard) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (handle, guard) = job_pair(name);
        self.ctx
            .tasks
            .register(kind, resource_id, op_id, name, handle);
        tokio::spawn(job(guard));
    }

    async fn route_ns(&self, message: &BusMessage) {
        let command = message.command.as_str();
        if command == commands::SHOW {
            self.show_ns(message).await;
            return;
        }
        let (Some(nsr_id), Some(nslcmop_id)) =
            (message.param_str("nsInstanceId"), message.param_str("_id"))
        else {
            error!(command, "ns command without nsInstanceId or _id");
            return;
        };
        let (nsr, op) = (nsr_id.to_string(), nslcmop_id.to_string());
        let engine = self.ns.clone();
        match command {
            commands::INSTANTIATE => {
                self.spawn_job(ResourceKind::Ns, nsr_id, nslcmop_id, "ns_instantiate", |guard| async move {
                    engine.instantiate(&nsr, &op, guard).await
                })
            }
            commands::TERMINATE => {
                let cancelled = self.ctx.tasks.cancel(ResourceKind::Ns, nsr_id, None, None);
                if cancelled > 0 {
                    info!(nsr_id, cancelled, "Cancelled running ns jobs before terminate");
                }
                self.spawn_job(ResourceKind::Ns, nsr_id, nslcmop_id, "ns_terminate", |guard| async move {
                    engine.terminate(&nsr, &op, guard).await
                })
            }
            commands::ACTION => {
                self.spawn_job(ResourceKind::Ns, nsr_id, nslcmop_id, "ns_action", |guard| async move {
                    engine.action(&nsr, &op, guard).await
                })
            }
            commands::SCALE => {
                self.spawn_job(ResourceKind::Ns, nsr_id, nslcmop_id, "ns_scale", |guard| async move {
                    engine.scale(&nsr, &op, guard).await
                })
            }
            _ => error!(command, "Unknown ns command"),
        }
    }

    async fn show_ns(&self, message: &BusMessage) {
        let Some(nsr_id) = message.param_str("nsInstanceId") else {
            return;
        };
        match self
            .ctx
            .db
            .get_one(collections::NSRS, &Filter::by_id(nsr_id))
            .await
        {
            Ok(Some(nsr)) => info!(
                nsr_id,
                operational_status = str_of(&nsr, "operational-status").unwrap_or_default(),
                config_status = str_of(&nsr, "config-status").unwrap_or_default(),
                detailed_status = str_of(&nsr, "detailed-status").unwrap_or_default(),
                operations = ?self.ctx.tasks.operations(ResourceKind::Ns, nsr_id),
                "ns show"
            ),
            Ok(None) => warn!(nsr_id, "ns show: not found"),
            Err(e) => error!(nsr_id, error = %e, "ns show failed"),
        }
    }

    async fn route_nsi(&self, message: &BusMessage) {
        let command = message.command.as_str();
        if command == commands::SHOW {
            let nsir_id = message.param_str("netsliceInstanceId").unwrap_or_default();
            info!(
                nsir_id,
                operations = ?self.ctx.tasks.operations(ResourceKind::Nsi, nsir_id),
                "nsi show"
            );
            return;
        }
        let (Some(nsir_id), Some(nsilcmop_id)) = (
            message.param_str("netsliceInstanceId"),
            message.param_str("_id"),
        ) else {
            error!(command, "nsi command without netsliceInstanceId or _id");
            return;
        };
        let (nsir, op) = (nsir_id.to_string(), nsilcmop_id.to_string());
        let engine = self.nsi.clone();
        match command {
            commands::INSTANTIATE => self.spawn_job(
                ResourceKind::Nsi,
                nsir_id,
                nsilcmop_id,
                "nsi_instantiate",
                |guard| async move { engine.instantiate(&nsir, &op, guard).await },
            ),
            commands::TERMINATE => {
                self.ctx.tasks.cancel(ResourceKind::Nsi, nsir_id, None, None);
                self.spawn_job(
                    ResourceKind::Nsi,
                    nsir_id,
                    nsilcmop_id,
                    "nsi_terminate",
                    |guard| async move { engine.terminate(&nsir, &op, guard).await },
                )
            }
            _ => error!(command, "Unknown nsi command"),
        }
    }

    fn route_account(&self, kind: ResourceKind, message: &BusMessage) {
        let Some(command) = AccountCommand::from_command(&message.command) else {
            error!(topic = %kind, command = %message.command, "Unknown account command");
            return;
        };
        let Some(account_id) = message.param_str("_id") else {
            error!(topic = %kind, %command, "account command without _id");
            return;
        };
        if command == AccountCommand::Delete {
            self.ctx.tasks.cancel(kind, account_id, None, None);
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst).to_string();
        let engine = self.accounts.clone();
        let params = message.params.clone();
        let job_order = order_id.clone();
        self.spawn_job(
            kind,
            account_id,
            &order_id,
            &command.job_name(kind),
            |guard| async move { engine.run(kind, command, params, &job_order, guard).await },
        );
    }
}
