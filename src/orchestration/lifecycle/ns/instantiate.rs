use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::config_units::{
    application_name, initial_config_primitives, Aggregate, DeployedUnit, UnitTracker,
};
use super::records::{sync_nsr, sync_vnfrs, VnfrSync};
use super::translate::{ns_params_to_ro, nsd_to_ro, referenced_vims, vnfd_to_ro, AccountDirectory};
use super::NsLcm;
use crate::connectors::{check_ns_status, DeployUnitRequest, RoItem, RoStatus};
use crate::constants::{collections, commands, instance_state, OperationState, ResourceKind};
use crate::errors::{LcmError, LcmResult};
use crate::orchestration::lifecycle::operation::{
    claim, finalize_service, persist, run_guarded, OpProgress, ServiceOperation,
};
use crate::registry::{HaOpType, JobGuard};
use crate::utils::json::{deep_get, deep_str, scalar_text, str_of, truncate_chars};

/// Inputs of one instantiation, read once from the store
struct Deployment {
    nsr: Value,
    nsd: Value,
    ns_params: Value,
    vnfrs: IndexMap<String, Value>,
    vnfds: HashMap<String, Value>,
    deadline: Instant,
}

fn text(value: &Value, key: &str) -> String {
    value.get(key).and_then(scalar_text).unwrap_or_default()
}

impl NsLcm {
    /// Deploy an NS: register descriptors at the resource orchestrator,
    /// create the NS there, wait for it, then deploy and wait for its
    /// configuration units
    #[instrument(skip(self, guard), fields(worker_id = %self.ctx().worker_id))]
    pub async fn instantiate(&self, nsr_id: &str, nslcmop_id: &str, guard: JobGuard) {
        let ctx = self.ctx();
        let op = ServiceOperation {
            kind: ResourceKind::Ns,
            resource_id: nsr_id,
            op_id: nslcmop_id,
            verb: commands::INSTANTIATED,
        };
        if !claim(ctx, ResourceKind::Ns, HaOpType::Lifecycle, Some(nslcmop_id)).await {
            ctx.tasks.remove(ResourceKind::Ns, nsr_id, nslcmop_id, None);
            return;
        }
        info!(nsr_id, nslcmop_id, "ns_instantiate Enter");

        let token = guard.token();
        let mut progress = OpProgress::new("Waiting for related tasks");
        let result = run_guarded(
            &token,
            self.instantiate_workflow(nsr_id, nslcmop_id, &mut progress),
        )
        .await;

        if let Err(e) = result {
            error!(nsr_id, nslcmop_id, step = %progress.step, error = %e, "ns_instantiate failed");
            if progress.resource_loaded {
                let detail = progress.error_detail(&e);
                progress.set_resource("detailed-status", detail);
                progress.set_resource("operational-status", "failed");
            }
            progress.fail(&e);
        }
        finalize_service(ctx, op, &mut progress, Map::new()).await;
        drop(guard);
    }

    async fn instantiate_workflow(
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

        let ns_params = nslcmop
            .get("operationParams")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let timeout = ns_params
            .get("timeout_ns_deploy")
            .and_then(Value::as_u64)
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| ctx.config.timeouts.ns_deploy());
        let nsd = nsr
            .get("nsd")
            .cloned()
            .ok_or_else(|| LcmError::domain(format!("nsr={nsr_id} has no nsd")))?;

        progress.step("Getting vnfrs from db");
        let vnfrs = self.load_vnfrs(nsr_id).await?;
        progress.step("Getting vnfds from db");
        let vnfds = self.load_vnfds(&vnfrs).await?;

        let mut deployment = Deployment {
            nsr,
            nsd,
            ns_params,
            vnfrs,
            vnfds,
            deadline: Instant::now() + timeout,
        };

        progress.set_resource("_admin.nslcmop", nslcmop_id);
        progress.set_resource("_admin.nsState", instance_state::INSTANTIATED);
        progress.set_resource("detailed-status", "creating");
        progress.set_resource("operational-status", "init");
        self.write_nsr(nsr_id, progress).await?;

        let nsd_ro_id = self.register_descriptors(nsr_id, &deployment, progress).await?;
        let ro_nsr_id = self
            .create_ro_ns(nsr_id, &nsd_ro_id, &deployment, progress)
            .await?;
        self.wait_ro_ns_ready(nsr_id, &ro_nsr_id, &mut deployment, progress)
            .await?;
        self.deploy_config_units(nsr_id, nslcmop_id, &deployment, progress)
            .await
    }

    /// Register one VNF descriptor per member and the NS descriptor at the
    /// orchestrator, reusing copies registered by an earlier attempt.
    /// Returns the orchestrator id of the NS descriptor.
    async fn register_descriptors(
        &self,
        nsr_id: &str,
        deployment: &Deployment,
        progress: &mut OpProgress,
    ) -> LcmResult<String> {
        let ro = self.ctx().ro.as_ref();
        let mut ro_vnfds: Vec<Value> = deep_get(&deployment.nsr, "_admin.deployed.RO.vnfd")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut member_ro_ids: HashMap<String, String> = HashMap::new();
        let mut ordinal = 0;

        for member in deployment
            .nsd
            .get("constituent-vnfd")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let index = text(member, "member-vnf-index");
            let vnfd_ref = text(member, "vnfd-id-ref");
            let vnfd = deployment.vnfds.get(&vnfd_ref).ok_or_else(|| {
                LcmError::domain(format!(
                    "vnfd={vnfd_ref} of member_vnf_index={index} not found"
                ))
            })?;
            progress.step_with_status(format!(
                "Creating vnfd='{vnfd_ref}' member_vnf_index='{index}' at RO"
            ));

            let osm_id = format!("{nsr_id}.{ordinal}.{}", truncate_chars(&index, 23));
            ordinal += 1;
            member_ro_ids.insert(index.clone(), osm_id.clone());

            let position = match ro_vnfds
                .iter()
                .position(|entry| text(entry, "member-vnf-index") == index)
            {
                Some(position) => position,
                None => {
                    ro_vnfds.push(Value::Null);
                    ro_vnfds.len() - 1
                }
            };

            let existing = ro.get_list(RoItem::Vnfd, json!({ "osm_id": osm_id })).await?;
            let ro_id = match existing.first() {
                Some(found) => {
                    let ro_id = text(found, "uuid");
                    debug!(vnfd_ref = %vnfd_ref, member_vnf_index = %index, ro_id = %ro_id, "vnfd exists at RO");
                    ro_id
                }
                None => {
                    let additional = deployment
                        .vnfrs
                        .get(&index)
                        .and_then(|vnfr| vnfr.get("additionalParamsForVnf"));
                    let descriptor = vnfd_to_ro(vnfd, &osm_id, additional)?;
                    let created = ro.create(RoItem::Vnfd, descriptor).await?;
                    let ro_id = text(&created, "uuid");
                    debug!(vnfd_ref = %vnfd_ref, member_vnf_index = %index, ro_id = %ro_id, "vnfd created at RO");
                    ro_id
                }
            };
            let entry = json!({ "member-vnf-index": index, "id": ro_id });
            ro_vnfds[position] = entry.clone();
            progress.set_resource(format!("_admin.deployed.RO.vnfd.{position}"), entry);
            self.write_nsr(nsr_id, progress).await?;
        }

        let nsd_ref = text(&deployment.nsd, "id");
        progress.step_with_status(format!("Creating nsd={nsd_ref} at RO"));
        let osm_id = format!("{nsr_id}.{ordinal}.{}", truncate_chars(&nsd_ref, 23));
        let existing = ro.get_list(RoItem::Nsd, json!({ "osm_id": osm_id })).await?;
        let nsd_ro_id = match existing.first() {
            Some(found) => text(found, "uuid"),
            None => {
                let descriptor = nsd_to_ro(&deployment.nsd, &osm_id, &member_ro_ids);
                let created = ro.create(RoItem::Nsd, descriptor).await?;
                text(&created, "uuid")
            }
        };
        progress.set_resource("_admin.deployed.RO.nsd_id", nsd_ro_id.clone());
        self.write_nsr(nsr_id, progress).await?;
        Ok(nsd_ro_id)
    }

    /// Reuse the orchestrator ns of an earlier attempt unless it is in
    /// error or gone; otherwise create it
    async fn create_ro_ns(
        &self,
        nsr_id: &str,
        nsd_ro_id: &str,
        deployment: &Deployment,
        progress: &mut OpProgress,
    ) -> LcmResult<String> {
        let ctx = self.ctx();
        let ro = ctx.ro.as_ref();
        let mut ro_nsr_id =
            deep_str(&deployment.nsr, "_admin.deployed.RO.nsr_id").map(str::to_string);

        if let Some(existing) = ro_nsr_id.clone() {
            progress.step_with_status("Looking for existing ns at RO");
            match ro.show(RoItem::Ns, &existing).await {
                Ok(desc) => {
                    let (status, _) = check_ns_status(&desc);
                    progress.set_resource("_admin.deployed.RO.nsr_status", status.to_string());
                    if status == RoStatus::Error {
                        progress.step_with_status(format!(
                            "Deleting ns at RO. RO_ns_id={existing}"
                        ));
                        ro.delete(RoItem::Ns, &existing).await?;
                        progress.set_resource("_admin.deployed.RO.nsr_id", Value::Null);
                        ro_nsr_id = None;
                    }
                }
                Err(e) if e.is_not_found() => {
                    progress.set_resource("_admin.deployed.RO.nsr_id", Value::Null);
                    ro_nsr_id = None;
                }
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(existing) = ro_nsr_id {
            return Ok(existing);
        }

        progress.step_with_status("Checking dependencies");
        for vim_id in referenced_vims(&deployment.ns_params) {
            ctx.tasks
                .wait_related(
                    ResourceKind::Vim,
                    &vim_id,
                    None,
                    ctx.config.timeouts.related_tasks(),
                )
                .await;
        }

        progress.step_with_status("Checking instantiation parameters");
        let mut keys = vec![ctx.vca.public_key().await?];
        if let Some(extra) = ctx.config.vca.public_key.as_ref() {
            keys.push(extra.clone());
        }
        let accounts = AccountDirectory::load(ctx.db.as_ref(), &deployment.ns_params).await?;
        let params = ns_params_to_ro(
            &deployment.ns_params,
            &deployment.nsd,
            &deployment.vnfds,
            &keys,
            &accounts,
        )?;
        let mut descriptor = params.as_object().cloned().unwrap_or_default();
        descriptor.insert("name".into(), json!(text(&deployment.nsr, "name")));
        descriptor.insert("scenario".into(), json!(nsd_ro_id));

        progress.step_with_status("Deploying ns at VIM");
        let created = ro.create(RoItem::Ns, Value::Object(descriptor)).await?;
        let ro_nsr_id = text(&created, "uuid");
        progress.set_resource("_admin.deployed.RO.nsr_id", ro_nsr_id.clone());
        progress.set_resource("_admin.deployed.RO.nsr_status", RoStatus::Build.to_string());
        self.write_nsr(nsr_id, progress).await?;
        info!(nsr_id, ro_nsr_id = %ro_nsr_id, "ns created at RO");
        Ok(ro_nsr_id)
    }

    /// Poll the orchestrator until the ns is ACTIVE and every VNF record
    /// has its addresses, then copy network status into the NS record
    async fn wait_ro_ns_ready(
        &self,
        nsr_id: &str,
        ro_nsr_id: &str,
        deployment: &mut Deployment,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        let waiting = format!("Waiting ns ready at RO. RO_id={ro_nsr_id}");
        progress.step(waiting.clone());
        let mut last_detail: Option<String> = None;

        let desc = loop {
            let desc = ctx.ro.show(RoItem::Ns, ro_nsr_id).await?;
            let (status, info) = check_ns_status(&desc);
            progress.set_resource("_admin.deployed.RO.nsr_status", status.to_string());
            let detail = match status {
                RoStatus::Error => return Err(LcmError::domain(info)),
                RoStatus::Build => format!("{waiting}; {info}"),
                RoStatus::Active => {
                    progress.step(
                        "Waiting for management IP address reported by the VIM. Updating VNFRs",
                    );
                    match sync_vnfrs(&mut deployment.vnfrs, &desc)? {
                        VnfrSync::Ready(updates) => {
                            for (vnfr_id, update) in updates {
                                persist(ctx.db.as_ref(), collections::VNFRS, &vnfr_id, &update)
                                    .await?;
                            }
                            break desc;
                        }
                        VnfrSync::NoManagementIp(reason) => {
                            debug!(nsr_id, reason = %reason, "Management address pending");
                            progress.step.clone()
                        }
                    }
                }
            };
            if last_detail.as_deref() != Some(detail.as_str()) {
                progress.set_resource("detailed-status", detail.clone());
                self.write_nsr(nsr_id, progress).await?;
                last_detail = Some(detail);
            }
            if Instant::now() >= deployment.deadline {
                return Err(LcmError::timeout("Timeout waiting ns to be ready"));
            }
            tokio::time::sleep(ctx.config.intervals.ro_status()).await;
        };

        progress.step("Updating NSR");
        let links = sync_nsr(&deployment.nsr, &desc)?;
        progress.resource_update.extend(links);
        progress.set_resource("operational-status", "running");
        self.write_nsr(nsr_id, progress).await
    }

    /// Units to deploy for the NS, its VNFs and their VDUs, in that
    /// descriptor order
    fn plan_config_units(
        &self,
        nsr_id: &str,
        deployment: &Deployment,
    ) -> LcmResult<Vec<(DeployedUnit, DeployUnitRequest)>> {
        let ns_name = text(&deployment.nsr, "name");
        let mut planned: Vec<(DeployedUnit, DeployUnitRequest)> = Vec::new();
        let mut plan = |vnf_index: Option<String>,
                        vdu_id: Option<String>,
                        vdu_name: Option<String>,
                        vdu_count_index: Option<u64>,
                        configuration: &Value,
                        mut instantiation: Map<String, Value>,
                        rw_mgmt_ip: Option<String>|
         -> LcmResult<()> {
            let Some(charm) = deep_str(configuration, "juju.charm") else {
                return Ok(());
            };
            let native = deep_get(configuration, "juju.proxy") == Some(&Value::Bool(false));
            if let Some(ip) = rw_mgmt_ip.as_ref() {
                instantiation.insert("rw_mgmt_ip".into(), json!(ip));
            }
            let primitives = initial_config_primitives(configuration, &instantiation)?;
            let application = application_name(
                &ns_name,
                vnf_index.as_deref().unwrap_or(""),
                vdu_id.as_deref().unwrap_or(""),
                planned.len(),
            );
            let unit = DeployedUnit {
                member_vnf_index: vnf_index,
                vdu_id,
                vdu_name,
                vdu_count_index,
                model: nsr_id.to_string(),
                application: application.clone(),
                operational_status: "init".into(),
                detailed_status: String::new(),
                charm: charm.to_string(),
                native,
            };
            let request = DeployUnitRequest {
                model: nsr_id.to_string(),
                application,
                charm: charm.to_string(),
                params: json!({
                    "rw_mgmt_ip": rw_mgmt_ip,
                    "initial-config-primitive": primitives,
                }),
                machine: if native { rw_mgmt_ip } else { None },
            };
            planned.push((unit, request));
            Ok(())
        };

        for member in deployment
            .nsd
            .get("constituent-vnfd")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let index = text(member, "member-vnf-index");
            let vnfd_ref = text(member, "vnfd-id-ref");
            let (Some(vnfd), Some(vnfr)) =
                (deployment.vnfds.get(&vnfd_ref), deployment.vnfrs.get(&index))
            else {
                continue;
            };
            let vnf_params = vnfr
                .get("additionalParamsForVnf")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            if let Some(configuration) = vnfd.get("vnf-configuration") {
                plan(
                    Some(index.clone()),
                    None,
                    None,
                    None,
                    configuration,
                    vnf_params.clone(),
                    str_of(vnfr, "ip-address").map(str::to_string),
                )?;
            }

            let vdus = vnfd.get("vdu").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
            for (vdu_index, vdu) in vdus.iter().enumerate() {
                let Some(configuration) = vdu.get("vdu-configuration") else {
                    continue;
                };
                if deep_str(configuration, "juju.charm").is_none() {
                    continue;
                }
                let vdu_id = text(vdu, "id");
                let vdur = deep_get(vnfr, &format!("vdur.{vdu_index}"))
                    .filter(|vdur| text(vdur, "vdu-id-ref") == vdu_id)
                    .ok_or_else(|| {
                        LcmError::domain(format!(
                            "Mismatch vdur, vdu {vdu_id} at index {vdu_index} for vnf {index}"
                        ))
                    })?;
                plan(
                    Some(index.clone()),
                    Some(vdu_id),
                    str_of(vdur, "name").map(str::to_string),
                    Some(vdur.get("count-index").and_then(Value::as_u64).unwrap_or(0)),
                    configuration,
                    vnf_params.clone(),
                    str_of(vdur, "ip-address").map(str::to_string),
                )?;
            }
        }

        if let Some(configuration) = deployment.nsd.get("ns-configuration") {
            let ns_params = deployment
                .nsr
                .get("additionalParamsForNs")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            plan(None, None, None, None, configuration, ns_params, None)?;
        }
        Ok(planned)
    }

    async fn deploy_config_units(
        &self,
        nsr_id: &str,
        nslcmop_id: &str,
        deployment: &Deployment,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let ctx = self.ctx();
        progress.step("Looking for needed vnfd to configure with proxy charm");
        let planned = self.plan_config_units(nsr_id, deployment)?;

        if planned.is_empty() {
            progress.set_resource("config-status", "configured");
            progress.set_resource("detailed-status", "done");
            progress.finish(OperationState::Completed, "done");
            return Ok(());
        }

        progress.step("Creating configuration model");
        ctx.vca.create_model(nsr_id).await?;
        let (mut units, requests): (Vec<DeployedUnit>, Vec<DeployUnitRequest>) =
            planned.into_iter().unzip();
        for (index, unit) in units.iter().enumerate() {
            progress.set_resource(
                format!("_admin.deployed.VCA.{index}"),
                serde_json::to_value(unit)?,
            );
        }
        self.write_nsr(nsr_id, progress).await?;

        let mut tracker = UnitTracker::new(&units, ctx.config.timeouts.vca_on_error());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        for (index, request) in requests.into_iter().enumerate() {
            progress.step(format!("Deploying configuration unit {}", request.application));
            if let Err(e) = ctx.vca.deploy_unit(request, events_tx.clone()).await {
                error!(nsr_id, unit = index, error = %e, "Configuration unit deployment failed");
                tracker.mark(index, "error", &e.to_string());
                units[index].operational_status = "error".into();
                units[index].detailed_status = e.to_string();
                progress.set_resource(
                    format!("_admin.deployed.VCA.{index}"),
                    serde_json::to_value(&units[index])?,
                );
            }
        }
        drop(events_tx);

        let initial = format!("configuring: init: {}", units.len());
        progress.step("Waiting for configuration units to be active");
        progress.set_resource("config-status", initial.clone());
        progress.set_resource("detailed-status", initial.clone());
        progress.set_op("detailed-status", initial.clone());
        let mut last_summary = initial;
        let mut events_open = true;

        loop {
            self.write_nsr(nsr_id, progress).await?;
            self.write_op(nslcmop_id, progress).await?;

            match tracker.evaluate(Instant::now()) {
                Aggregate::AllActive => break,
                Aggregate::Failed(text) => {
                    progress.set_resource("config-status", "failed");
                    progress.set_resource("detailed-status", text.clone());
                    progress.finish(OperationState::FailedTemp, text);
                    return Ok(());
                }
                Aggregate::Pending(summary) => {
                    if summary != last_summary {
                        progress.set_resource("config-status", summary.clone());
                        progress.set_resource("detailed-status", summary.clone());
                        progress.set_op("detailed-status", summary.clone());
                        last_summary = summary;
                    }
                }
            }

            let now = Instant::now();
            if now >= deployment.deadline {
                return Err(LcmError::timeout("Timeout waiting ns to be configured"));
            }
            let wake = (now + ctx.config.intervals.ro_status()).min(deployment.deadline);
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Some(index) = tracker.apply(&event) {
                            units[index].operational_status = event.status.clone();
                            units[index].detailed_status = event.message.clone();
                            progress.set_resource(
                                format!("_admin.deployed.VCA.{index}"),
                                serde_json::to_value(&units[index])?,
                            );
                        }
                    }
                    None => events_open = false,
                },
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        progress.set_resource("config-status", "configured");
        progress.set_resource("detailed-status", "done");
        progress.finish(OperationState::Completed, "done");
        Ok(())
    }
}
