use serde_json::{Map, Value};
use tracing::{error, info, instrument};

use super::config_units::{
    deployed_units, execute_primitive, find_unit, map_primitive_params, PrimitiveOutcome,
    PrimitivePolicy,
};
use super::NsLcm;
use crate::constants::{collections, commands, OperationState, ResourceKind};
use crate::database::Filter;
use crate::errors::{LcmError, LcmResult};
use crate::orchestration::lifecycle::operation::{
    claim, finalize_service, run_guarded, OpProgress, ServiceOperation,
};
use crate::registry::{HaOpType, JobGuard};
use crate::utils::json::{deep_array, deep_get, scalar_text, str_of};

/// Target of a primitive as requested in `operationParams`
#[derive(Debug, Default)]
struct ActionTarget {
    member_vnf_index: Option<String>,
    vdu_id: Option<String>,
    vdu_name: Option<String>,
    vdu_count_index: Option<u64>,
    primitive: String,
    params: Map<String, Value>,
}

impl ActionTarget {
    fn from_params(params: &Value) -> LcmResult<Self> {
        let text = |key: &str| params.get(key).and_then(scalar_text);
        let primitive = text("primitive")
            .ok_or_else(|| LcmError::domain("Missing input parameter 'primitive'"))?;
        Ok(Self {
            member_vnf_index: text("member_vnf_index"),
            vdu_id: text("vdu_id"),
            vdu_name: text("vdu_name"),
            vdu_count_index: params.get("vdu_count_index").and_then(Value::as_u64),
            primitive,
            params: params
                .get("primitive_params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }

    fn level(&self) -> &'static str {
        match (&self.member_vnf_index, &self.vdu_id) {
            (None, _) => "ns",
            (Some(_), None) => "vnf",
            (Some(_), Some(_)) => "vdu",
        }
    }
}

impl NsLcm {
    /// Execute a configuration primitive on a deployed unit of the NS
    #[instrument(skip(self, guard), fields(worker_id = %self.ctx().worker_id))]
    pub async fn action(&self, nsr_id: &str, nslcmop_id: &str, guard: JobGuard) {
        let ctx = self.ctx();
        let op = ServiceOperation {
            kind: ResourceKind::Ns,
            resource_id: nsr_id,
            op_id: nslcmop_id,
            verb: commands::ACTIONED,
        };
        if !claim(ctx, ResourceKind::Ns, HaOpType::Lifecycle, Some(nslcmop_id)).await {
            ctx.tasks.remove(ResourceKind::Ns, nsr_id, nslcmop_id, None);
            return;
        }
        info!(nsr_id, nslcmop_id, "ns_action Enter");

        let token = guard.token();
        let mut progress = OpProgress::new("Waiting for related tasks");
        let result = run_guarded(
            &token,
            self.action_workflow(nsr_id, nslcmop_id, &mut progress),
        )
        .await;

        if let Err(e) = result {
            error!(nsr_id, nslcmop_id, step = %progress.step, error = %e, "ns_action failed");
            progress.fail(&e);
        }
        // The NS record is only read by an action
        progress.resource_loaded = false;
        finalize_service(ctx, op, &mut progress, Map::new()).await;
        drop(guard);
    }

    async fn action_workflow(
        &self,
        nsr_id: &str,
        nslcmop_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        ctx.ha
            .waitfor_related_ha(ResourceKind::Ns, HaOpType::Lifecycle, Some(nslcmop_id))
            .await?;

        let nslcmop = self.load_op(nslcmop_id, progress).await?;
        let nsr = self.load_nsr(nsr_id, progress).await?;
        ctx.tasks
            .wait_related(
                ResourceKind::Ns,
                nsr_id,
                Some(nslcmop_id),
                ctx.config.timeouts.related_tasks(),
            )
            .await;

        let target = ActionTarget::from_params(
            nslcmop.get("operationParams").unwrap_or(&Value::Null),
        )?;

        progress.step("Looking for the deployed configuration unit");
        let units = deployed_units(&nsr);
        let unit = find_unit(
            &units,
            target.member_vnf_index.as_deref(),
            target.vdu_id.as_deref(),
            target.vdu_name.as_deref(),
            target.vdu_count_index,
        )?;

        progress.step("Looking for the primitive descriptor");
        let (desc, instantiation) = match target.member_vnf_index.as_deref() {
            None => {
                let desc = deep_array(&nsr, "nsd.ns-configuration.config-primitive")
                    .iter()
                    .find(|p| str_of(p, "name") == Some(target.primitive.as_str()))
                    .cloned();
                let params = nsr
                    .get("additionalParamsForNs")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                (desc, params)
            }
            Some(member_vnf_index) => {
                let vnfr = ctx
                    .db
                    .get_required(
                        collections::VNFRS,
                        &Filter::new()
                            .eq("member-vnf-index-ref", member_vnf_index)
                            .eq("nsr-id-ref", nsr_id),
                    )
                    .await?;
                let vnfd = ctx
                    .db
                    .get_required(
                        collections::VNFDS,
                        &Filter::by_id(str_of(&vnfr, "vnfd-id").unwrap_or_default()),
                    )
                    .await?;
                let configuration = match target.vdu_id.as_deref() {
                    Some(vdu_id) => deep_array(&vnfd, "vdu")
                        .iter()
                        .find(|vdu| str_of(vdu, "id") == Some(vdu_id))
                        .and_then(|vdu| vdu.get("vdu-configuration")),
                    None => vnfd.get("vnf-configuration"),
                };
                let desc = configuration
                    .and_then(|c| deep_get(c, "config-primitive"))
                    .and_then(Value::as_array)
                    .and_then(|primitives| {
                        primitives
                            .iter()
                            .find(|p| str_of(p, "name") == Some(target.primitive.as_str()))
                    })
                    .cloned();
                let params = vnfr
                    .get("additionalParamsForVnf")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                (desc, params)
            }
        };
        let desc = desc.ok_or_else(|| {
            LcmError::domain(format!(
                "Primitive {} not found at [{}-configuration]:config-primitive ",
                target.primitive,
                target.level()
            ))
        })?;

        let params = map_primitive_params(&desc, &target.params, &instantiation)?;
        progress.step(format!("Executing primitive {}", target.primitive));
        let policy = PrimitivePolicy {
            timeout: ctx.config.timeouts.primitive(),
            poll_interval: ctx.config.intervals.primitive_status(),
            retries: 0,
            retry_interval: ctx.config.intervals.primitive_status(),
        };
        match execute_primitive(ctx.vca.as_ref(), unit, &target.primitive, &params, policy).await? {
            PrimitiveOutcome::Completed(output) => {
                progress.finish(OperationState::Completed, output)
            }
            PrimitiveOutcome::Failed(output) => progress.finish(OperationState::Failed, output),
            PrimitiveOutcome::TimedOut(output) => progress.finish(
                OperationState::Failed,
                format!("Timeout executing primitive {}: {output}", target.primitive),
            ),
        }
        Ok(())
    }
}
