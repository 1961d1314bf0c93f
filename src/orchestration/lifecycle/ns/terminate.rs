use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::config_units::deployed_units;
use super::NsLcm;
use crate::connectors::{check_action_status, RoItem, RoStatus};
use crate::constants::{collections, commands, instance_state, OperationState, ResourceKind};
use crate::database::Filter;
use crate::errors::{LcmResult, RoError};
use crate::orchestration::lifecycle::operation::{
    claim, finalize_service, run_guarded, OpProgress, ServiceOperation,
};
use crate::registry::{HaOpType, JobGuard};
use crate::utils::json::{deep_array, deep_str, str_of};

/// Failures collected while tearing an NS down. Teardown keeps going past
/// them and reports them all at the end.
#[derive(Debug, Default)]
struct Teardown {
    failed: Vec<String>,
    ro_failed: bool,
    autoremove: bool,
}

/// Outcome of deleting one item at the orchestrator
enum RoDelete {
    Deleted(Value),
    AlreadyGone,
}

fn delete_failure(label: &str, error: &RoError) -> String {
    if error.is_conflict() {
        format!("{label} delete conflict: {error}")
    } else {
        format!("{label} delete error: {error}")
    }
}

impl NsLcm {
    /// Remove an NS: its configuration units, the orchestrator ns and the
    /// descriptors registered for it
    #[instrument(skip(self, guard), fields(worker_id = %self.ctx().worker_id))]
    pub async fn terminate(&self, nsr_id: &str, nslcmop_id: &str, guard: JobGuard) {
        let ctx = self.ctx();
        let op = ServiceOperation {
            kind: ResourceKind::Ns,
            resource_id: nsr_id,
            op_id: nslcmop_id,
            verb: commands::TERMINATED,
        };
        if !claim(ctx, ResourceKind::Ns, HaOpType::Lifecycle, Some(nslcmop_id)).await {
            ctx.tasks.remove(ResourceKind::Ns, nsr_id, nslcmop_id, None);
            return;
        }
        info!(nsr_id, nslcmop_id, "ns_terminate Enter");

        let token = guard.token();
        let mut progress = OpProgress::new("Waiting for related tasks");
        let mut teardown = Teardown::default();
        let result = run_guarded(
            &token,
            self.terminate_workflow(nsr_id, nslcmop_id, &mut progress, &mut teardown),
        )
        .await;

        if let Err(e) = result {
            error!(nsr_id, nslcmop_id, step = %progress.step, error = %e, "ns_terminate failed");
            progress.fail(&e);
        }

        let mut extra = Map::new();
        extra.insert("autoremove".into(), json!(teardown.autoremove));
        finalize_service(ctx, op, &mut progress, extra).await;

        if teardown.autoremove && progress.state == Some(OperationState::Completed) {
            self.remove_records(nsr_id).await;
        }
        drop(guard);
    }

    async fn terminate_workflow(
        &self,
        nsr_id: &str,
        nslcmop_id: &str,
        progress: &mut OpProgress,
        teardown: &mut Teardown,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        ctx.ha
            .waitfor_related_ha(ResourceKind::Ns, HaOpType::Lifecycle, Some(nslcmop_id))
            .await?;

        let nslcmop = self.load_op(nslcmop_id, progress).await?;
        let nsr = self.load_nsr(nsr_id, progress).await?;
        if deep_str(&nsr, "_admin.nsState") == Some(instance_state::NOT_INSTANTIATED) {
            info!(nsr_id, "NS not instantiated, nothing to terminate");
            return Ok(());
        }
        teardown.autoremove = nslcmop
            .get("operationParams")
            .and_then(|p| p.get("autoremove"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        progress.set_resource("_admin.nslcmop", nslcmop_id);
        progress.set_resource("operational-status", "terminating");
        progress.set_resource("config-status", "terminating");
        self.write_nsr(nsr_id, progress).await?;

        self.remove_config_units(nsr_id, &nsr, progress, teardown).await?;
        self.delete_ro_ns(nsr_id, &nsr, progress, teardown).await?;
        if !teardown.ro_failed {
            self.delete_ro_descriptors(nsr_id, &nsr, progress, teardown)
                .await?;
        }

        if teardown.failed.is_empty() {
            progress.set_resource("operational-status", "terminated");
            progress.set_resource("detailed-status", "Done");
            progress.set_resource("_admin.nsState", instance_state::NOT_INSTANTIATED);
            progress.finish(OperationState::Completed, "Done");
        } else {
            let joined = teardown.failed.join("; ");
            progress.set_resource("operational-status", "failed");
            progress.set_resource("detailed-status", format!("Deletion errors {joined}"));
            progress.finish(OperationState::Failed, joined);
        }
        Ok(())
    }

    async fn remove_config_units(
        &self,
        nsr_id: &str,
        nsr: &Value,
        progress: &mut OpProgress,
        teardown: &mut Teardown,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        let units = deployed_units(nsr);
        if units.iter().all(Option::is_none) {
            return Ok(());
        }
        progress.step("Deleting configuration units");

        let removals = units.iter().enumerate().filter_map(|(index, unit)| {
            unit.as_ref().map(|unit| async move {
                (
                    index,
                    ctx.vca.remove_unit(&unit.model, &unit.application).await,
                )
            })
        });
        match tokio::time::timeout(
            ctx.config.timeouts.vca_teardown(),
            futures::future::join_all(removals),
        )
        .await
        {
            Ok(outcomes) => {
                for (index, outcome) in outcomes {
                    match outcome {
                        Ok(()) => progress.set_resource(
                            format!("_admin.deployed.VCA.{index}"),
                            Value::Null,
                        ),
                        Err(e) => {
                            warn!(nsr_id, unit = index, error = %e, "Configuration unit removal failed");
                            teardown.failed.push(format!("VCA[{index}] Deletion failed: {e}"));
                        }
                    }
                }
            }
            Err(_) => teardown
                .failed
                .push("Timeout waiting for configuration units to be removed".to_string()),
        }

        if let Err(e) = ctx.vca.destroy_model(nsr_id).await {
            warn!(nsr_id, error = %e, "Configuration model removal failed");
            teardown.failed.push(format!("Model {nsr_id} deletion failed: {e}"));
        }
        self.write_nsr(nsr_id, progress).await
    }

    /// Delete one orchestrator item, treating 404 as already deleted.
    /// Other failures are collected and reported as `None`.
    async fn delete_ro_item(
        &self,
        item: RoItem,
        id: &str,
        label: &str,
        teardown: &mut Teardown,
    ) -> Option<RoDelete> {
        match self.ctx().ro.delete(item, id).await {
            Ok(reply) => Some(RoDelete::Deleted(reply)),
            Err(e) if e.is_not_found() => {
                debug!(%item, id, "Already deleted at RO");
                Some(RoDelete::AlreadyGone)
            }
            Err(e) => {
                warn!(%item, id, error = %e, "RO deletion failed");
                teardown.failed.push(delete_failure(label, &e));
                teardown.ro_failed = true;
                None
            }
        }
    }

    async fn delete_ro_ns(
        &self,
        nsr_id: &str,
        nsr: &Value,
        progress: &mut OpProgress,
        teardown: &mut Teardown,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        let Some(ro_nsr_id) = deep_str(nsr, "_admin.deployed.RO.nsr_id") else {
            return Ok(());
        };
        progress.step_with_status("Deleting ns from VIM");
        self.write_nsr(nsr_id, progress).await?;

        let label = format!("RO_ns_id={ro_nsr_id}");
        let Some(outcome) = self
            .delete_ro_item(RoItem::Ns, ro_nsr_id, &label, teardown)
            .await
        else {
            return Ok(());
        };

        if let RoDelete::Deleted(reply) = outcome {
            if let Some(action_id) = str_of(&reply, "action_id") {
                progress.set_resource("_admin.deployed.RO.nsr_delete_action_id", action_id);
                progress.set_resource("_admin.deployed.RO.nsr_status", "DELETING");
                self.write_nsr(nsr_id, progress).await?;
                if !self
                    .wait_ro_ns_deleted(nsr_id, ro_nsr_id, action_id, progress, teardown)
                    .await?
                {
                    return Ok(());
                }
            }
        }
        progress.set_resource("_admin.deployed.RO.nsr_id", Value::Null);
        progress.set_resource("_admin.deployed.RO.nsr_status", "DELETED");
        self.write_nsr(nsr_id, progress).await
    }

    /// Poll the deletion action. Returns whether the ns is gone.
    async fn wait_ro_ns_deleted(
        &self,
        nsr_id: &str,
        ro_nsr_id: &str,
        action_id: &str,
        progress: &mut OpProgress,
        teardown: &mut Teardown,
    ) -> LcmResult<bool> {
        let ctx = self.ctx();
        let waiting =
            format!("Waiting ns deleted from VIM. RO_id={ro_nsr_id} RO_delete_action={action_id}");
        progress.step_with_status(waiting.clone());
        let deadline = Instant::now() + ctx.config.timeouts.ns_terminate_ro();
        let mut last_detail: Option<String> = None;

        loop {
            let desc = match ctx.ro.show_action(ro_nsr_id, action_id).await {
                Ok(desc) => desc,
                Err(e) if e.is_not_found() => return Ok(true),
                Err(e) => return Err(e.into()),
            };
            let (status, info) = check_action_status(&desc);
            match status {
                RoStatus::Active => return Ok(true),
                RoStatus::Error => {
                    teardown.failed.push(format!("RO_ns_id={ro_nsr_id} delete error: {info}"));
                    teardown.ro_failed = true;
                    progress.set_resource("_admin.deployed.RO.nsr_status", "ERROR");
                    return Ok(false);
                }
                RoStatus::Build => {
                    let detail = format!("{waiting}; {info}");
                    if last_detail.as_deref() != Some(detail.as_str()) {
                        progress.set_resource("detailed-status", detail.clone());
                        self.write_nsr(nsr_id, progress).await?;
                        last_detail = Some(detail);
                    }
                }
            }
            if Instant::now() >= deadline {
                teardown.failed.push("Timeout waiting ns deleted from VIM".to_string());
                teardown.ro_failed = true;
                return Ok(false);
            }
            tokio::time::sleep(ctx.config.intervals.ro_status()).await;
        }
    }

    async fn delete_ro_descriptors(
        &self,
        nsr_id: &str,
        nsr: &Value,
        progress: &mut OpProgress,
        teardown: &mut Teardown,
    ) -> LcmResult<()> {
        if let Some(nsd_ro_id) = deep_str(nsr, "_admin.deployed.RO.nsd_id") {
            progress.step_with_status("Deleting nsd from RO");
            let label = format!("RO_nsd_id={nsd_ro_id}");
            if self
                .delete_ro_item(RoItem::Nsd, nsd_ro_id, &label, teardown)
                .await
                .is_some()
            {
                progress.set_resource("_admin.deployed.RO.nsd_id", Value::Null);
            }
        }

        for (position, entry) in deep_array(nsr, "_admin.deployed.RO.vnfd").iter().enumerate() {
            let Some(vnfd_ro_id) = str_of(entry, "id") else {
                continue;
            };
            let index = entry
                .get("member-vnf-index")
                .and_then(crate::utils::json::scalar_text)
                .unwrap_or_default();
            progress.step_with_status(format!(
                "Deleting member_vnf_index={index} RO_vnfd_id={vnfd_ro_id} from RO"
            ));
            let label = format!("RO_vnfd_id={vnfd_ro_id}");
            if self
                .delete_ro_item(RoItem::Vnfd, vnfd_ro_id, &label, teardown)
                .await
                .is_some()
            {
                progress.set_resource(format!("_admin.deployed.RO.vnfd.{position}.id"), Value::Null);
            }
        }
        self.write_nsr(nsr_id, progress).await
    }

    /// Delete the NS record with its operations and VNF records
    async fn remove_records(&self, nsr_id: &str) {
        let db = self.ctx().db.as_ref();
        let outcome: LcmResult<()> = async {
            db.del_list(collections::NSLCMOPS, &Filter::new().eq("nsInstanceId", nsr_id))
                .await?;
            db.del_one(collections::NSRS, &Filter::by_id(nsr_id), false)
                .await?;
            db.del_list(collections::VNFRS, &Filter::new().eq("nsr-id-ref", nsr_id))
                .await?;
            Ok(())
        }
        .await;
        match outcome {
            Ok(()) => info!(nsr_id, "NS records removed"),
            Err(e) => error!(nsr_id, error = %e, "Cannot remove NS records"),
        }
    }
}
