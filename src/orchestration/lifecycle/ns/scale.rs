use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::config_units::{
    deployed_units, execute_primitive, find_unit, map_primitive_params, PrimitiveOutcome,
    PrimitivePolicy,
};
use super::records::{scale_vdurs, sync_vnfrs, VnfrSync};
use super::NsLcm;
use crate::connectors::{check_action_status, check_ns_status, RoItem, RoStatus};
use crate::constants::{collections, commands, OperationState, ResourceKind};
use crate::database::{update_of, Filter};
use crate::errors::{LcmError, LcmResult};
use crate::orchestration::lifecycle::operation::{
    claim, finalize_service, persist, run_guarded, OpProgress, ServiceOperation,
};
use crate::registry::{HaOpType, JobGuard};
use crate::utils::json::{deep_array, deep_get, deep_str, scalar_text, str_of};
use crate::utils::time::epoch_seconds;

const SCALE_OUT: &str = "SCALE_OUT";
const SCALE_IN: &str = "SCALE_IN";

/// Where a scale operation was when it stopped, deciding which status of
/// the NS record reports a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ScalePhase {
    #[default]
    Preparing,
    Configuring,
    Provisioning,
}

/// Statuses of the NS record before scaling, restored afterwards
#[derive(Debug, Default)]
struct ScaleContext {
    phase: ScalePhase,
    old_operational_status: Option<Value>,
    old_config_status: Option<Value>,
}

/// A resolved scale request
struct ScalePlan {
    member_vnf_index: String,
    group_name: String,
    direction: &'static str,
    descriptor: Value,
    vnfr: Value,
    vnfd: Value,
    admin_position: usize,
    nb_scale_op: u64,
    create: IndexMap<String, u64>,
    delete: IndexMap<String, u64>,
    vdu_scaling_info: Value,
}

impl NsLcm {
    /// Add or remove VDU instances of one VNF following a scaling group
    #[instrument(skip(self, guard), fields(worker_id = %self.ctx().worker_id))]
    pub async fn scale(&self, nsr_id: &str, nslcmop_id: &str, guard: JobGuard) {
        let ctx = self.ctx();
        let op = ServiceOperation {
            kind: ResourceKind::Ns,
            resource_id: nsr_id,
            op_id: nslcmop_id,
            verb: commands::SCALED,
        };
        if !claim(ctx, ResourceKind::Ns, HaOpType::Lifecycle, Some(nslcmop_id)).await {
            ctx.tasks.remove(ResourceKind::Ns, nsr_id, nslcmop_id, None);
            return;
        }
        info!(nsr_id, nslcmop_id, "ns_scale Enter");

        let token = guard.token();
        let mut progress = OpProgress::new("Waiting for related tasks");
        let mut scaling = ScaleContext::default();
        let result = run_guarded(
            &token,
            self.scale_workflow(nsr_id, nslcmop_id, &mut progress, &mut scaling),
        )
        .await;

        if progress.resource_loaded {
            restore_statuses(&mut progress, &scaling);
        }
        if let Err(e) = result {
            error!(nsr_id, nslcmop_id, step = %progress.step, error = %e, "ns_scale failed");
            if progress.resource_loaded {
                match scaling.phase {
                    ScalePhase::Configuring => progress.set_resource("config-status", "failed"),
                    ScalePhase::Provisioning => {
                        progress.set_resource("operational-status", "failed")
                    }
                    ScalePhase::Preparing => {}
                }
                let detail = format!(
                    "FAILED scaling nslcmop={nslcmop_id} {}: {e}",
                    progress.step
                );
                progress.set_resource("detailed-status", detail);
            }
            progress.fail(&e);
        }
        finalize_service(ctx, op, &mut progress, Map::new()).await;
        drop(guard);
    }

    async fn scale_workflow(
        &self,
        nsr_id: &str,
        nslcmop_id: &str,
        progress: &mut OpProgress,
        scaling: &mut ScaleContext,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        ctx.ha
            .waitfor_related_ha(ResourceKind::Ns, HaOpType::Lifecycle, Some(nslcmop_id))
            .await?;

        let nslcmop = self.load_op(nslcmop_id, progress).await?;
        let nsr = self.load_nsr(nsr_id, progress).await?;
        scaling.old_operational_status = nsr.get("operational-status").cloned();
        scaling.old_config_status = nsr.get("config-status").cloned();
        ctx.tasks
            .wait_related(
                ResourceKind::Ns,
                nsr_id,
                Some(nslcmop_id),
                ctx.config.timeouts.related_tasks(),
            )
            .await;

        progress.step("Parsing scaling parameters");
        progress.set_resource("_admin.nslcmop", nslcmop_id);
        progress.set_resource("operational-status", "scaling");
        self.write_nsr(nsr_id, progress).await?;

        let ro_nsr_id = deep_str(&nsr, "_admin.deployed.RO.nsr_id")
            .ok_or_else(|| LcmError::domain(format!("nsr={nsr_id} is not deployed at RO")))?
            .to_string();
        let plan = self.plan_scale(nsr_id, &nsr, &nslcmop).await?;
        let deadline = Instant::now() + ctx.config.timeouts.scale();

        if plan.direction == SCALE_IN {
            scaling.phase = ScalePhase::Configuring;
            self.run_scaling_actions(nsr_id, &nsr, &plan, "pre-scale-in", progress)
                .await?;
        }

        scaling.phase = ScalePhase::Provisioning;
        self.scale_at_ro(nsr_id, &ro_nsr_id, &plan, deadline, progress)
            .await?;

        if plan.direction == SCALE_OUT {
            scaling.phase = ScalePhase::Configuring;
            self.run_scaling_actions(nsr_id, &nsr, &plan, "post-scale-out", progress)
                .await?;
        }

        progress.set_resource("detailed-status", "");
        progress.finish(OperationState::Completed, "done");
        Ok(())
    }

    async fn plan_scale(&self, nsr_id: &str, nsr: &Value, nslcmop: &Value) -> LcmResult<ScalePlan> {
        let db = self.ctx().db.as_ref();
        let scale_data = deep_get(nslcmop, "operationParams.scaleVnfData")
            .ok_or_else(|| LcmError::domain("Missing input parameter 'scaleVnfData'"))?;
        let direction = match str_of(scale_data, "scaleVnfType") {
            Some(SCALE_OUT) => SCALE_OUT,
            Some(SCALE_IN) => SCALE_IN,
            other => {
                return Err(LcmError::domain(format!(
                    "Invalid input parameter 'scaleVnfType':'{}'",
                    other.unwrap_or("None")
                )))
            }
        };
        let member_vnf_index = deep_get(scale_data, "scaleByStepData.member-vnf-index")
            .and_then(scalar_text)
            .unwrap_or_default();
        let group_name = deep_str(scale_data, "scaleByStepData.scaling-group-descriptor")
            .unwrap_or_default()
            .to_string();

        let vnfr = db
            .get_required(
                collections::VNFRS,
                &Filter::new()
                    .eq("member-vnf-index-ref", member_vnf_index.clone())
                    .eq("nsr-id-ref", nsr_id),
            )
            .await?;
        let vnfd_id = str_of(&vnfr, "vnfd-id").unwrap_or_default();
        let vnfd = db
            .get_required(collections::VNFDS, &Filter::by_id(vnfd_id))
            .await?;

        let descriptor = deep_array(&vnfd, "scaling-group-descriptor")
            .iter()
            .find(|group| str_of(group, "name") == Some(group_name.as_str()))
            .cloned()
            .ok_or_else(|| {
                LcmError::domain(format!(
                    "input parameter 'scaleByStepData':'scaling-group-descriptor':'{group_name}' \
                     is not present at vnfd:scaling-group-descriptor"
                ))
            })?;

        let groups = deep_array(nsr, "_admin.scaling-group");
        let (admin_position, mut nb_scale_op) = groups
            .iter()
            .position(|entry| {
                str_of(entry, "name") == Some(group_name.as_str())
                    && entry.get("member-vnf-index").and_then(scalar_text).as_deref()
                        == Some(member_vnf_index.as_str())
            })
            .map(|position| {
                let nb = groups[position]
                    .get("nb-scale-op")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                (position, nb)
            })
            .unwrap_or((groups.len(), 0));

        let max = descriptor.get("max-instance-count").and_then(Value::as_u64).unwrap_or(1);
        let min = descriptor.get("min-instance-count").and_then(Value::as_u64).unwrap_or(0);
        if direction == SCALE_OUT {
            if nb_scale_op >= max {
                return Err(LcmError::domain(format!(
                    "reached the limit of {nb_scale_op} (max-instance-count) scaling-out \
                     operations for the scaling-group-descriptor '{group_name}'"
                )));
            }
            nb_scale_op += 1;
        } else {
            if nb_scale_op <= min {
                return Err(LcmError::domain(format!(
                    "reached the limit of {nb_scale_op} (min-instance-count) scaling-in \
                     operations for the scaling-group-descriptor '{group_name}'"
                )));
            }
            nb_scale_op -= 1;
        }

        let mut create = IndexMap::new();
        let mut delete = IndexMap::new();
        let mut vdus = Vec::new();
        for vdu in deep_array(&descriptor, "vdu") {
            let vdu_id = str_of(vdu, "vdu-id-ref").unwrap_or_default().to_string();
            let count = vdu.get("count").and_then(Value::as_u64).unwrap_or(1);
            vdus.push(json!({ "vdu-id-ref": vdu_id, "count": count }));
            if direction == SCALE_OUT {
                *create.entry(vdu_id).or_insert(0) += count;
            } else {
                *delete.entry(vdu_id).or_insert(0) += count;
            }
        }
        let vdu_scaling_info = json!({
            "scaling_group_name": group_name,
            "scaling_direction": if direction == SCALE_OUT { "OUT" } else { "IN" },
            "vdu": vdus,
            "vdu-create": create,
            "vdu-delete": delete,
        });

        Ok(ScalePlan {
            member_vnf_index,
            group_name,
            direction,
            descriptor,
            vnfr,
            vnfd,
            admin_position,
            nb_scale_op,
            create,
            delete,
            vdu_scaling_info,
        })
    }

    /// Run the scaling-config-action primitives of the group bound to a
    /// trigger
    async fn run_scaling_actions(
        &self,
        nsr_id: &str,
        nsr: &Value,
        plan: &ScalePlan,
        trigger: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        let (moment, status) = if trigger.starts_with("pre") {
            ("pre-scale", "configuring pre-scaling")
        } else {
            ("post-scale", "configuring post-scaling")
        };
        let units = deployed_units(nsr);
        let vnf_params = plan
            .vnfr
            .get("additionalParamsForVnf")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut params = Map::new();
        params.insert("VDU_SCALE_INFO".into(), plan.vdu_scaling_info.clone());
        let policy = PrimitivePolicy {
            timeout: ctx.config.timeouts.primitive(),
            poll_interval: ctx.config.intervals.primitive_status(),
            retries: 0,
            retry_interval: ctx.config.intervals.primitive_status(),
        };

        for action in deep_array(&plan.descriptor, "scaling-config-action") {
            if str_of(action, "trigger") != Some(trigger) {
                continue;
            }
            let name = str_of(action, "vnf-config-primitive-name-ref").unwrap_or_default();
            progress.step(format!("executing {moment} scaling-config-action '{name}'"));
            progress.set_resource("config-status", status);
            self.write_nsr(nsr_id, progress).await?;

            let desc = deep_array(&plan.vnfd, "vnf-configuration.config-primitive")
                .iter()
                .find(|primitive| str_of(primitive, "name") == Some(name))
                .ok_or_else(|| {
                    LcmError::domain(format!(
                        "Invalid vnfd descriptor at scaling-group-descriptor[name='{}']:\
                         scaling-config-action[vnf-config-primitive-name-ref='{name}'] does not \
                         match any vnf-configuration:config-primitive",
                        plan.group_name
                    ))
                })?;
            let mapped = map_primitive_params(desc, &params, &vnf_params)?;
            let unit = find_unit(&units, Some(&plan.member_vnf_index), None, None, None)?;
            match execute_primitive(ctx.vca.as_ref(), unit, name, &mapped, policy).await? {
                PrimitiveOutcome::Completed(output) => {
                    debug!(nsr_id, primitive = name, output = %output, "Scaling action completed");
                }
                PrimitiveOutcome::Failed(output) => {
                    return Err(LcmError::domain(format!("terminated with error: {output}")));
                }
                PrimitiveOutcome::TimedOut(output) => {
                    return Err(LcmError::domain(format!(
                        "Timeout executing primitive {name}: {output}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn scale_at_ro(
        &self,
        nsr_id: &str,
        ro_nsr_id: &str,
        plan: &ScalePlan,
        deadline: Instant,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        let vnfr_id = str_of(&plan.vnfr, "_id").unwrap_or_default().to_string();
        let mut ro_scaling = Vec::new();
        for (vdu_id, count) in &plan.create {
            ro_scaling.push(json!({
                "osm_vdu_id": vdu_id,
                "member-vnf-index": plan.member_vnf_index,
                "type": "create",
                "count": count,
            }));
        }
        for (vdu_id, count) in &plan.delete {
            ro_scaling.push(json!({
                "osm_vdu_id": vdu_id,
                "member-vnf-index": plan.member_vnf_index,
                "type": "delete",
                "count": count,
            }));
        }

        progress.step("Sending scale order to VIM");
        let reply = ctx
            .ro
            .create_action(RoItem::Ns, ro_nsr_id, json!({ "vdu-scaling": ro_scaling }))
            .await?;
        progress.set_resource(
            format!("_admin.scaling-group.{}", plan.admin_position),
            json!({
                "name": plan.group_name,
                "member-vnf-index": plan.member_vnf_index,
                "nb-scale-op": plan.nb_scale_op,
                "time": epoch_seconds(),
            }),
        );
        self.write_nsr(nsr_id, progress).await?;

        if let Some(action_id) = str_of(&reply, "instance_action_id") {
            let waiting = format!("Waiting for VIM to scale. RO_task_id={action_id}");
            progress.step(waiting.clone());
            loop {
                let desc = ctx.ro.show_action(ro_nsr_id, action_id).await?;
                let (status, info) = check_action_status(&desc);
                match status {
                    RoStatus::Active => break,
                    RoStatus::Error => {
                        return Err(LcmError::domain(format!("RO_task={action_id} {info}")))
                    }
                    RoStatus::Build => {
                        let detail = format!("{waiting}; {info}");
                        if progress.resource_update.get("detailed-status")
                            != Some(&Value::String(detail.clone()))
                        {
                            progress.set_resource("detailed-status", detail);
                            self.write_nsr(nsr_id, progress).await?;
                        }
                    }
                }
                if Instant::now() >= deadline {
                    return Err(LcmError::timeout("Timeout waiting ns to be ready"));
                }
                tokio::time::sleep(ctx.config.intervals.ro_status()).await;
            }
        }

        progress.step(format!("Waiting ns ready at RO. RO_id={ro_nsr_id}"));
        let mut vnfrs: IndexMap<String, Value> = IndexMap::new();
        vnfrs.insert(plan.member_vnf_index.clone(), plan.vnfr.clone());
        let mut vdurs_scaled = false;
        loop {
            let desc = ctx.ro.show(RoItem::Ns, ro_nsr_id).await?;
            let (status, info) = check_ns_status(&desc);
            match status {
                RoStatus::Error => return Err(LcmError::domain(info)),
                RoStatus::Build => {}
                RoStatus::Active => {
                    if !vdurs_scaled {
                        let vdurs = scale_vdurs(&plan.vnfr, &plan.create, &plan.delete)?;
                        persist(
                            ctx.db.as_ref(),
                            collections::VNFRS,
                            &vnfr_id,
                            &update_of([("vdur", Value::Array(vdurs.clone()))]),
                        )
                        .await?;
                        if let Some(vnfr) = vnfrs
                            .get_mut(&plan.member_vnf_index)
                            .and_then(Value::as_object_mut)
                        {
                            vnfr.insert("vdur".into(), Value::Array(vdurs));
                        }
                        vdurs_scaled = true;
                    }
                    progress.step(
                        "Waiting for management IP address reported by the VIM. Updating VNFRs",
                    );
                    match sync_vnfrs(&mut vnfrs, &desc)? {
                        VnfrSync::Ready(updates) => {
                            for (id, update) in updates {
                                persist(ctx.db.as_ref(), collections::VNFRS, &id, &update).await?;
                            }
                            return Ok(());
                        }
                        VnfrSync::NoManagementIp(reason) => {
                            debug!(nsr_id, reason = %reason, "Management address pending");
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(LcmError::timeout("Timeout waiting ns to be ready"));
            }
            tokio::time::sleep(ctx.config.intervals.ro_status()).await;
        }
    }
}

fn restore_statuses(progress: &mut OpProgress, scaling: &ScaleContext) {
    let operational = match scaling.old_operational_status.as_ref() {
        Some(Value::String(s)) if s == "failed" => json!("running"),
        Some(value) => value.clone(),
        None => json!("running"),
    };
    progress.set_resource("operational-status", operational);
    if let Some(config) = scaling.old_config_status.clone() {
        progress.set_resource("config-status", config);
    }
}
