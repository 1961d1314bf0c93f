//! Test harness wiring the engines to the in-memory store and bus, plus
//! record builders for a one-VNF network service.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use osm_lcm::config::LcmConfig;
use osm_lcm::constants::{collections, ResourceKind};
use osm_lcm::database::{DocumentStore, InMemoryStore};
use osm_lcm::messaging::{BusMessage, InMemoryBus};
use osm_lcm::orchestration::{AccountLcm, LcmCore, NetsliceLcm, NsLcm, SystemContext};
use osm_lcm::registry::{job_pair, JobGuard};

use super::fakes::{FakeK8s, FakeRo, FakeVca};

pub const WORKER_ID: &str = "lcm-test-worker";

/// Defaults scaled down so polling loops turn over in milliseconds
pub fn fast_config() -> LcmConfig {
    let mut config = LcmConfig::default();
    config.global.worker_id = Some(WORKER_ID.to_string());
    config.message.poll_interval_ms = 5;
    config.intervals.ro_status = 5;
    config.intervals.ha_related = 5;
    config.intervals.nsi_status = 5;
    config.intervals.primitive_status = 5;
    config.timeouts.related_tasks = 1;
    config.timeouts.ns_deploy = 5;
    config.timeouts.ns_terminate_ro = 2;
    config.timeouts.nsi_deploy = 5;
    config.timeouts.nsi_terminate = 5;
    config.timeouts.scale = 5;
    config.timeouts.primitive = 2;
    config.timeouts.vca_on_error = 1;
    config.timeouts.vca_teardown = 2;
    config.timeouts.k8s_repo_add = 2;
    config.heartbeat.boot_interval_ms = 10;
    config.heartbeat.pace_interval_ms = 10;
    config
}

pub struct Harness {
    pub ctx: Arc<SystemContext>,
    pub db: Arc<InMemoryStore>,
    pub bus: Arc<InMemoryBus>,
    pub ro: Arc<FakeRo>,
    pub vca: Arc<FakeVca>,
    pub k8s: Arc<FakeK8s>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: LcmConfig) -> Self {
        let db = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let ro = Arc::new(FakeRo::new());
        let vca = Arc::new(FakeVca::new());
        let k8s = Arc::new(FakeK8s::new());
        let ctx = Arc::new(SystemContext::new(
            config,
            db.clone(),
            bus.clone(),
            ro.clone(),
            vca.clone(),
            k8s.clone(),
        ));
        Self {
            ctx,
            db,
            bus,
            ro,
            vca,
            k8s,
        }
    }

    pub fn ns(&self) -> NsLcm {
        NsLcm::new(self.ctx.clone())
    }

    pub fn netslice(&self) -> NetsliceLcm {
        NetsliceLcm::new(self.ctx.clone())
    }

    pub fn accounts(&self) -> AccountLcm {
        AccountLcm::new(self.ctx.clone())
    }

    pub fn core(&self) -> LcmCore {
        LcmCore::new(self.ctx.clone())
    }

    /// Register a job the way the dispatcher does and hand back its guard
    pub fn register(&self, kind: ResourceKind, resource_id: &str, op_id: &str, name: &str) -> JobGuard {
        let (handle, guard) = job_pair(name);
        self.ctx
            .tasks
            .register(kind, resource_id, op_id, name, handle);
        guard
    }

    pub async fn seed(&self, collection: &str, doc: Value) {
        self.db
            .create(collection, doc)
            .await
            .expect("fixture insert");
    }

    pub fn doc(&self, collection: &str, id: &str) -> Value {
        self.db
            .snapshot(collection, id)
            .unwrap_or_else(|| panic!("{collection}/{id} missing"))
    }

    pub async fn notifications(&self, topic: &str, command: &str) -> Vec<BusMessage> {
        self.bus.published_matching(topic, command).await
    }

    /// Poll until a notification shows up; panics after a few seconds
    pub async fn wait_for_notification(&self, topic: &str, command: &str) -> BusMessage {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(message) = self.notifications(topic, command).await.pop() {
                return message;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no {topic}/{command} notification published"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until the registry has no jobs left for a resource
    pub async fn wait_idle(&self, kind: ResourceKind, resource_id: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self.ctx.tasks.operations(kind, resource_id).is_empty() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "jobs of {kind} {resource_id} still registered"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn vim_account(id: &str) -> Value {
    json!({
        "_id": id,
        "name": "openstack-site",
        "vim_type": "openstack",
        "vim_url": "http://10.0.0.1:5000/v3",
        "vim_user": "admin",
        "vim_password": "secret",
        "vim_tenant_name": "osm",
        "_admin": {
            "operationalState": "ENABLED",
            "deployed": { "RO": format!("ro-{id}"), "RO-account": format!("ro-account-{id}") },
            "operations": [],
        },
    })
}

/// Account record with one pending operation in HA slot 0
pub fn pending_account(id: &str, extra: Value) -> Value {
    let mut account = json!({
        "_id": id,
        "name": format!("{id}-name"),
        "_admin": {
            "operationalState": "PROCESSING",
            "operations": [{
                "lcmOperationType": "create",
                "operationState": "PROCESSING",
                "startTime": 1000.0,
            }],
        },
    });
    if let (Some(fields), Some(extra)) = (account.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            fields.insert(key.clone(), value.clone());
        }
    }
    account
}

/// VNF descriptor with one VDU; `charm` adds a VNF-level proxy charm with a
/// `touch` primitive
pub fn vnfd(charm: bool) -> Value {
    let mut vnfd = json!({
        "_id": "vnfd-1",
        "id": "hackfest-vnf",
        "vdu": [{ "id": "mgmtVM", "name": "mgmtVM", "count": 1 }],
        "scaling-group-descriptor": [{
            "name": "scale-mgmt",
            "max-instance-count": 2,
            "min-instance-count": 0,
            "vdu": [{ "vdu-id-ref": "mgmtVM", "count": 1 }],
        }],
    });
    if charm {
        vnfd["vnf-configuration"] = json!({
            "juju": { "charm": "simple" },
            "config-primitive": [{
                "name": "touch",
                "parameter": [{ "name": "filename", "default-value": "/home/ubuntu/touched" }],
            }],
        });
    }
    vnfd
}

pub fn nsr(id: &str) -> Value {
    json!({
        "_id": id,
        "name": "demo",
        "nsd": {
            "id": "hackfest-ns",
            "constituent-vnfd": [{ "member-vnf-index": "1", "vnfd-id-ref": "hackfest-vnf" }],
        },
        "vld": [],
        "_admin": {
            "nsState": "NOT_INSTANTIATED",
            "deployed": { "RO": { "vnfd": [] }, "VCA": [] },
        },
    })
}

pub fn vnfr(id: &str, nsr_id: &str) -> Value {
    json!({
        "_id": id,
        "nsr-id-ref": nsr_id,
        "member-vnf-index-ref": "1",
        "vnfd-id": "vnfd-1",
        "vdur": [{ "vdu-id-ref": "mgmtVM", "count-index": 0, "interfaces": [] }],
        "vld": [],
    })
}

pub fn nslcmop(id: &str, nsr_id: &str, operation: &str, params: Value) -> Value {
    json!({
        "_id": id,
        "nsInstanceId": nsr_id,
        "lcmOperationType": operation,
        "operationState": "PROCESSING",
        "startTime": 1000.0,
        "operationParams": params,
    })
}

/// What the orchestrator reports for the deployed one-VNF service
pub fn active_ns_view() -> Value {
    json!({
        "nets": [],
        "vnfs": [{
            "member_vnf_index": "1",
            "ip_address": "10.0.0.5",
            "vms": [{
                "vdu_osm_id": "mgmtVM",
                "vim_vm_id": "vm-1",
                "ip_address": "10.0.0.5",
                "vim_name": "demo-1-mgmtVM-1",
                "status": "ACTIVE",
                "interfaces": [],
            }],
        }],
    })
}

/// Seed the VIM, descriptor and records of an NS ready to instantiate
pub async fn seed_ns(h: &Harness, nsr_id: &str, charm: bool) {
    h.seed(collections::VIM_ACCOUNTS, vim_account("vim-1")).await;
    h.seed(collections::VNFDS, vnfd(charm)).await;
    h.seed(collections::NSRS, nsr(nsr_id)).await;
    h.seed(collections::VNFRS, vnfr(&format!("{nsr_id}-vnfr-1"), nsr_id))
        .await;
    h.ro.set_ns_view(active_ns_view());
}

/// Seed an NS and run a successful instantiation of it
pub async fn instantiated_ns(h: &Harness, nsr_id: &str, charm: bool) {
    seed_ns(h, nsr_id, charm).await;
    let op_id = format!("{nsr_id}-op-instantiate");
    h.seed(
        collections::NSLCMOPS,
        nslcmop(&op_id, nsr_id, "instantiate", json!({ "vimAccountId": "vim-1", "nsName": "demo" })),
    )
    .await;
    let guard = h.register(ResourceKind::Ns, nsr_id, &op_id, "ns_instantiate");
    h.ns().instantiate(nsr_id, &op_id, guard).await;
    assert_eq!(h.doc(collections::NSLCMOPS, &op_id)["operationState"], "COMPLETED");
}
