//! # Network Service Lifecycle
//!
//! [`NsLcm`] runs the four NS operations. Each entry point follows the same
//! shape:
//!
//! 1. claim the operation through the HA lock (a lost race ends quietly)
//! 2. run the workflow under [`run_guarded`](super::operation::run_guarded),
//!    accumulating record updates in an [`OpProgress`]
//! 3. map a failure onto the records, then persist, publish the result and
//!    deregister through [`finalize_service`](super::operation::finalize_service)
//!
//! The job guard handed in by the dispatcher is held until the end so the
//! registry sees the job as running for its whole life.

pub mod action;
pub mod config_units;
pub mod instantiate;
pub mod records;
pub mod scale;
pub mod terminate;
pub mod translate;

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::operation::{persist, OpProgress};
use crate::constants::{collections, ResourceKind};
use crate::database::Filter;
use crate::errors::LcmResult;
use crate::orchestration::SystemContext;
use crate::utils::json::{scalar_text, str_of};

/// NS lifecycle engine
#[derive(Debug, Clone)]
pub struct NsLcm {
    ctx: Arc<SystemContext>,
}

impl NsLcm {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }

    pub(crate) fn ctx(&self) -> &SystemContext {
        &self.ctx
    }

    async fn load_op(&self, op_id: &str, progress: &mut OpProgress) -> LcmResult<Value> {
        progress.step(format!("Getting nslcmop={op_id} from db"));
        let op = self
            .ctx
            .db
            .get_required(collections::NSLCMOPS, &Filter::by_id(op_id))
            .await?;
        progress.op_loaded = true;
        Ok(op)
    }

    async fn load_nsr(&self, nsr_id: &str, progress: &mut OpProgress) -> LcmResult<Value> {
        progress.step(format!("Getting nsr={nsr_id} from db"));
        let nsr = self
            .ctx
            .db
            .get_required(collections::NSRS, &Filter::by_id(nsr_id))
            .await?;
        progress.resource_loaded = true;
        Ok(nsr)
    }

    /// VNF records of an NS keyed by member-vnf-index
    async fn load_vnfrs(&self, nsr_id: &str) -> LcmResult<IndexMap<String, Value>> {
        let vnfrs = self
            .ctx
            .db
            .get_list(collections::VNFRS, &Filter::new().eq("nsr-id-ref", nsr_id))
            .await?;
        Ok(vnfrs
            .into_iter()
            .map(|vnfr| {
                let index = vnfr
                    .get("member-vnf-index-ref")
                    .and_then(scalar_text)
                    .unwrap_or_default();
                (index, vnfr)
            })
            .collect())
    }

    /// VNF descriptors used by the records, keyed by descriptor id
    async fn load_vnfds(
        &self,
        vnfrs: &IndexMap<String, Value>,
    ) -> LcmResult<HashMap<String, Value>> {
        let mut vnfds: HashMap<String, Value> = HashMap::new();
        let mut seen = Vec::new();
        for vnfr in vnfrs.values() {
            let Some(vnfd_id) = str_of(vnfr, "vnfd-id") else {
                continue;
            };
            if seen.iter().any(|known| known == vnfd_id) {
                continue;
            }
            seen.push(vnfd_id.to_string());
            let vnfd = self
                .ctx
                .db
                .get_required(collections::VNFDS, &Filter::by_id(vnfd_id))
                .await?;
            let key = str_of(&vnfd, "id").unwrap_or(vnfd_id).to_string();
            vnfds.insert(key, vnfd);
        }
        Ok(vnfds)
    }

    async fn write_nsr(&self, nsr_id: &str, progress: &OpProgress) -> LcmResult<()> {
        persist(
            self.ctx.db.as_ref(),
            ResourceKind::Ns.collection(),
            nsr_id,
            &progress.resource_update,
        )
        .await
    }

    async fn write_op(&self, op_id: &str, progress: &OpProgress) -> LcmResult<()> {
        persist(
            self.ctx.db.as_ref(),
            collections::NSLCMOPS,
            op_id,
            &progress.op_update,
        )
        .await
    }
}
