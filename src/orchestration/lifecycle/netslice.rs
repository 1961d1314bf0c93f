//! Netslice instantiate and terminate.
//!
//! A netslice owns no resources of its own here: each operation launches one
//! NS operation per constituent, registered in the task registry like any
//! dispatched NS job, then polls their operation records until all of them
//! reach a terminal state.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::ns::NsLcm;
use super::operation::{claim, finalize_service, run_guarded, OpProgress, ServiceOperation};
use crate::constants::{collections, commands, instance_state, OperationState, ResourceKind};
use crate::database::Filter;
use crate::errors::{LcmError, LcmResult};
use crate::orchestration::SystemContext;
use crate::registry::{job_pair, HaOpType, JobGuard};
use crate::utils::json::{deep_array, deep_str, str_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NsCommand {
    Instantiate,
    Terminate,
}

impl NsCommand {
    fn job_name(self) -> &'static str {
        match self {
            Self::Instantiate => "ns_instantiate",
            Self::Terminate => "ns_terminate",
        }
    }
}

/// NS operation launched on behalf of a netslice
#[derive(Debug, Clone)]
struct Launched {
    nsr_id: String,
    nslcmop_id: String,
}

/// Netslice lifecycle engine
#[derive(Debug, Clone)]
pub struct NetsliceLcm {
    ctx: Arc<SystemContext>,
    ns: NsLcm,
}

impl NetsliceLcm {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self {
            ns: NsLcm::new(ctx.clone()),
            ctx,
        }
    }

    #[instrument(skip(self, guard), fields(worker_id = %self.ctx.worker_id))]
    pub async fn instantiate(&self, nsir_id: &str, nsilcmop_id: &str, guard: JobGuard) {
        let op = ServiceOperation {
            kind: ResourceKind::Nsi,
            resource_id: nsir_id,
            op_id: nsilcmop_id,
            verb: commands::INSTANTIATED,
        };
        if !claim(&self.ctx, ResourceKind::Nsi, HaOpType::Lifecycle, Some(nsilcmop_id)).await {
            self.ctx.tasks.remove(ResourceKind::Nsi, nsir_id, nsilcmop_id, None);
            return;
        }
        info!(nsir_id, nsilcmop_id, "nsi_instantiate Enter");

        let token = guard.token();
        let mut progress = OpProgress::new("Waiting for related tasks");
        let result = run_guarded(
            &token,
            self.instantiate_workflow(nsir_id, nsilcmop_id, &mut progress),
        )
        .await;

        if let Err(e) = result {
            error!(nsir_id, nsilcmop_id, step = %progress.step, error = %e, "nsi_instantiate failed");
            if progress.resource_loaded {
                let detail = progress.error_detail(&e);
                progress.set_resource("detailed-status", detail);
                progress.set_resource("operational-status", "failed");
            }
            progress.fail(&e);
        }
        finalize_service(&self.ctx, op, &mut progress, Map::new()).await;
        drop(guard);
    }

    #[instrument(skip(self, guard), fields(worker_id = %self.ctx.worker_id))]
    pub async fn terminate(&self, nsir_id: &str, nsilcmop_id: &str, guard: JobGuard) {
        let op = ServiceOperation {
            kind: ResourceKind::Nsi,
            resource_id: nsir_id,
            op_id: nsilcmop_id,
            verb: commands::TERMINATED,
        };
        if !claim(&self.ctx, ResourceKind::Nsi, HaOpType::Lifecycle, Some(nsilcmop_id)).await {
            self.ctx.tasks.remove(ResourceKind::Nsi, nsir_id, nsilcmop_id, None);
            return;
        }
        info!(nsir_id, nsilcmop_id, "nsi_terminate Enter");

        let token = guard.token();
        let mut progress = OpProgress::new("Waiting for related tasks");
        let mut autoremove = false;
        let result = run_guarded(
            &token,
            self.terminate_workflow(nsir_id, nsilcmop_id, &mut progress, &mut autoremove),
        )
        .await;

        if let Err(e) = result {
            error!(nsir_id, nsilcmop_id, step = %progress.step, error = %e, "nsi_terminate failed");
            if progress.resource_loaded {
                let detail = progress.error_detail(&e);
                progress.set_resource("detailed-status", detail);
                progress.set_resource("operational-status", "failed");
            }
            progress.fail(&e);
        }
        let mut extra = Map::new();
        extra.insert("autoremove".into(), json!(autoremove));
        finalize_service(&self.ctx, op, &mut progress, extra).await;

        if autoremove && progress.state == Some(OperationState::Completed) {
            self.remove_records(nsir_id).await;
        }
        drop(guard);
    }

    async fn load(
        &self,
        nsir_id: &str,
        nsilcmop_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<(Value, Value)> {
        self.ctx
            .ha
            .waitfor_related_ha(ResourceKind::Nsi, HaOpType::Lifecycle, Some(nsilcmop_id))
            .await?;
        progress.step(format!("Getting nsilcmop={nsilcmop_id} from db"));
        let nsilcmop = self
            .ctx
            .db
            .get_required(collections::NSILCMOPS, &Filter::by_id(nsilcmop_id))
            .await?;
        progress.op_loaded = true;
        progress.step(format!("Getting nsir={nsir_id} from db"));
        let nsir = self
            .ctx
            .db
            .get_required(collections::NSIS, &Filter::by_id(nsir_id))
            .await?;
        progress.resource_loaded = true;
        self.ctx
            .tasks
            .wait_related(
                ResourceKind::Nsi,
                nsir_id,
                Some(nsilcmop_id),
                self.ctx.config.timeouts.related_tasks(),
            )
            .await;
        Ok((nsilcmop, nsir))
    }

    async fn write_nsir(&self, nsir_id: &str, progress: &OpProgress) -> LcmResult<()> {
        super::operation::persist(
            self.ctx.db.as_ref(),
            collections::NSIS,
            nsir_id,
            &progress.resource_update,
        )
        .await
    }

    async fn instantiate_workflow(
        &self,
        nsir_id: &str,
        nsilcmop_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let (nsilcmop, nsir) = self.load(nsir_id, nsilcmop_id, progress).await?;
        let timeout = nsilcmop
            .get("operationParams")
            .and_then(|params| params.get("timeout_nsi_deploy"))
            .and_then(Value::as_u64)
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| self.ctx.config.timeouts.nsi_deploy());

        progress.set_resource("_admin.nsilcmop", nsilcmop_id);
        progress.set_resource("_admin.nsiState", instance_state::INSTANTIATED);
        progress.set_resource("detailed-status", "creating");
        progress.set_resource("operational-status", "init");
        self.write_nsir(nsir_id, progress).await?;

        progress.step("Launching NS instantiation");
        let mut launched = Vec::new();
        for nslcmop_id in deep_array(&nsilcmop, "operationParams.nslcmops_ids") {
            let Some(nslcmop_id) = nslcmop_id.as_str() else {
                continue;
            };
            let nsr_id = self.ns_of_operation(nslcmop_id).await?;
            launched.push(Launched {
                nsr_id,
                nslcmop_id: nslcmop_id.to_string(),
            });
        }
        for ns in &launched {
            self.launch(NsCommand::Instantiate, ns);
        }

        progress.step("Waiting for NS instantiation");
        let errors = self
            .wait_ns_operations(nsir_id, &nsir, &launched, true, timeout, progress)
            .await?;
        if !errors.is_empty() {
            progress.step("instantiating");
            return Err(LcmError::domain(errors.join("; ")));
        }

        progress.set_resource("operational-status", "running");
        progress.set_resource("detailed-status", "done");
        progress.set_resource("config-status", "configured");
        progress.finish(OperationState::Completed, "done");
        Ok(())
    }

    async fn terminate_workflow(
        &self,
        nsir_id: &str,
        nsilcmop_id: &str,
        progress: &mut OpProgress,
        autoremove: &mut bool,
    ) -> LcmResult<()> {
        let (nsilcmop, nsir) = self.load(nsir_id, nsilcmop_id, progress).await?;
        if deep_str(&nsir, "_admin.nsiState") == Some(instance_state::NOT_INSTANTIATED) {
            info!(nsir_id, "Netslice not instantiated, nothing to terminate");
            return Ok(());
        }
        *autoremove = nsilcmop
            .get("operationParams")
            .and_then(|params| params.get("autoremove"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        progress.set_resource("_admin.nsilcmop", nsilcmop_id);
        progress.set_resource("operational-status", "terminating");
        progress.set_resource("config-status", "terminating");
        self.write_nsir(nsir_id, progress).await?;

        progress.step("Looking for shared NSs");
        let sharing: Vec<Value> = self
            .ctx
            .db
            .get_list(
                collections::NSIS,
                &Filter::new()
                    .ne("_id", nsir_id)
                    .ne("_admin.nsiState", instance_state::NOT_INSTANTIATED),
            )
            .await?;
        let is_shared = |nsr_id: &str| {
            sharing.iter().any(|other| {
                deep_array(other, "_admin.nsrs-detailed-list")
                    .iter()
                    .any(|entry| str_of(entry, "nsrId") == Some(nsr_id))
            })
        };

        let mut launched = Vec::new();
        for nslcmop_id in deep_array(&nsilcmop, "operationParams.nslcmops_ids") {
            let Some(nslcmop_id) = nslcmop_id.as_str() else {
                continue;
            };
            let nsr_id = self.ns_of_operation(nslcmop_id).await?;
            if is_shared(&nsr_id) {
                debug!(nsir_id, nsr_id = %nsr_id, "NS shared with another netslice, kept");
                continue;
            }
            launched.push(Launched {
                nsr_id,
                nslcmop_id: nslcmop_id.to_string(),
            });
        }
        let launched_ids: Vec<&str> = launched.iter().map(|ns| ns.nslcmop_id.as_str()).collect();
        progress.set_op("operationParams.nslcmops_ids", json!(launched_ids));
        super::operation::persist(
            self.ctx.db.as_ref(),
            collections::NSILCMOPS,
            nsilcmop_id,
            &progress.op_update,
        )
        .await?;

        progress.step("Launching NS termination");
        for ns in &launched {
            self.ctx.tasks.cancel(ResourceKind::Ns, &ns.nsr_id, None, None);
            self.launch(NsCommand::Terminate, ns);
        }

        progress.step("Waiting for NS termination");
        let errors = self
            .wait_ns_operations(
                nsir_id,
                &nsir,
                &launched,
                false,
                self.ctx.config.timeouts.nsi_terminate(),
                progress,
            )
            .await?;
        if !errors.is_empty() {
            progress.step("terminating");
            return Err(LcmError::domain(errors.join("; ")));
        }

        progress.set_resource("operational-status", "terminated");
        progress.set_resource("config-status", "terminated");
        progress.set_resource("detailed-status", "done");
        progress.set_resource("_admin.nsiState", instance_state::NOT_INSTANTIATED);
        progress.finish(OperationState::Completed, "done");
        Ok(())
    }

    async fn ns_of_operation(&self, nslcmop_id: &str) -> LcmResult<String> {
        let nslcmop = self
            .ctx
            .db
            .get_required(collections::NSLCMOPS, &Filter::by_id(nslcmop_id))
            .await?;
        str_of(&nslcmop, "nsInstanceId")
            .map(str::to_string)
            .ok_or_else(|| LcmError::domain(format!("nslcmop={nslcmop_id} has no nsInstanceId")))
    }

    /// Register and spawn one NS job the way the dispatcher does
    fn launch(&self, command: NsCommand, ns: &Launched) {
        let name = command.job_name();
        let (handle, guard) = job_pair(name);
        self.ctx
            .tasks
            .register(ResourceKind::Ns, &ns.nsr_id, &ns.nslcmop_id, name, handle);
        let engine = self.ns.clone();
        let Launched { nsr_id, nslcmop_id } = ns.clone();
        tokio::spawn(async move {
            match command {
                NsCommand::Instantiate => engine.instantiate(&nsr_id, &nslcmop_id, guard).await,
                NsCommand::Terminate => engine.terminate(&nsr_id, &nslcmop_id, guard).await,
            }
        });
    }

    /// Poll the launched NS operations, mirroring them into
    /// `_admin.nsrs-detailed-list`, until all are terminal. Returns one
    /// message per failed NS.
    async fn wait_ns_operations(
        &self,
        nsir_id: &str,
        nsir: &Value,
        launched: &[Launched],
        instantiated: bool,
        timeout: std::time::Duration,
        progress: &mut OpProgress,
    ) -> LcmResult<Vec<String>> {
        let deadline = Instant::now() + timeout;
        let mut entries: Vec<Value> = deep_array(nsir, "_admin.nsrs-detailed-list").to_vec();

        loop {
            let mut pending = 0;
            let mut errors = Vec::new();
            let mut changed = false;
            for ns in launched {
                let nslcmop = self
                    .ctx
                    .db
                    .get_required(collections::NSLCMOPS, &Filter::by_id(&ns.nslcmop_id))
                    .await?;
                let status = str_of(&nslcmop, "operationState").unwrap_or_default().to_string();
                let detail = str_of(&nslcmop, "detailed-status").unwrap_or_default().to_string();
                let state = status.parse::<OperationState>().ok();
                match state {
                    Some(state) if state.is_terminal() => {
                        if state.is_failure() {
                            errors.push(format!("NS {} {status}: {detail}", ns.nsr_id));
                        }
                    }
                    _ => pending += 1,
                }

                let entry = json!({
                    "nsrId": ns.nsr_id,
                    "status": status,
                    "detailed-status": detail,
                    "instantiated": instantiated,
                });
                let position = entries
                    .iter()
                    .position(|known| str_of(known, "nsrId") == Some(ns.nsr_id.as_str()));
                match position {
                    Some(position) if merged_differs(&entries[position], &entry) => {
                        merge_entry(&mut entries[position], &entry);
                        progress.set_resource(
                            format!("_admin.nsrs-detailed-list.{position}"),
                            entries[position].clone(),
                        );
                        changed = true;
                    }
                    Some(_) => {}
                    None => {
                        entries.push(entry.clone());
                        progress.set_resource(
                            format!("_admin.nsrs-detailed-list.{}", entries.len() - 1),
                            entry,
                        );
                        changed = true;
                    }
                }
            }
            if changed {
                self.write_nsir(nsir_id, progress).await?;
            }
            if pending == 0 {
                return Ok(errors);
            }
            if Instant::now() >= deadline {
                warn!(nsir_id, pending, "NS operations still running at netslice timeout");
                return Err(LcmError::timeout(if instantiated {
                    "Timeout waiting nsi to be ready."
                } else {
                    "Timeout waiting nsi to be terminated."
                }));
            }
            tokio::time::sleep(self.ctx.config.intervals.nsi_status()).await;
        }
    }

    /// Delete the netslice record and its operations
    async fn remove_records(&self, nsir_id: &str) {
        let db = self.ctx.db.as_ref();
        let outcome: LcmResult<()> = async {
            db.del_one(collections::NSIS, &Filter::by_id(nsir_id), false)
                .await?;
            db.del_list(
                collections::NSILCMOPS,
                &Filter::new().eq("netsliceInstanceId", nsir_id),
            )
            .await?;
            Ok(())
        }
        .await;
        match outcome {
            Ok(()) => info!(nsir_id, "Netslice records removed"),
            Err(e) => error!(nsir_id, error = %e, "Cannot remove netslice records"),
        }
    }
}

fn merged_differs(current: &Value, update: &Value) -> bool {
    update
        .as_object()
        .map(|fields| fields.iter().any(|(k, v)| current.get(k) != Some(v)))
        .unwrap_or(false)
}

fn merge_entry(current: &mut Value, update: &Value) {
    if let (Some(target), Some(fields)) = (current.as_object_mut(), update.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
}
