//! NS instantiation against fake collaborators.

mod common;

use common::*;
use serde_json::json;

use osm_lcm::connectors::RoItem;
use osm_lcm::constants::{collections, topics, ResourceKind};

const NSR: &str = "nsr-1";
const OP: &str = "nslcmop-1";

async fn start(h: &Harness, params: serde_json::Value) {
    h.seed(collections::NSLCMOPS, nslcmop(OP, NSR, "instantiate", params))
        .await;
    let guard = h.register(ResourceKind::Ns, NSR, OP, "ns_instantiate");
    h.ns().instantiate(NSR, OP, guard).await;
}

fn default_params() -> serde_json::Value {
    json!({ "vimAccountId": "vim-1", "nsName": "demo" })
}

#[tokio::test]
async fn deploys_at_ro_then_configures_units() {
    let h = Harness::new();
    seed_ns(&h, NSR, true).await;
    start(&h, default_params()).await;

    let op = h.doc(collections::NSLCMOPS, OP);
    assert_eq!(op["operationState"], "COMPLETED");
    assert_eq!(op["detailed-status"], "done");
    assert_eq!(op["_admin"]["worker"], WORKER_ID);

    let nsr = h.doc(collections::NSRS, NSR);
    assert_eq!(nsr["operational-status"], "running");
    assert_eq!(nsr["config-status"], "configured");
    assert_eq!(nsr["_admin"]["nsState"], "INSTANTIATED");
    assert!(nsr["_admin"]["nslcmop"].is_null());
    assert!(nsr["_admin"]["deployed"]["RO"]["nsr_id"].is_string());
    assert_eq!(nsr["_admin"]["deployed"]["RO"]["vnfd"][0]["member-vnf-index"], "1");
    assert_eq!(nsr["_admin"]["deployed"]["VCA"][0]["operational-status"], "active");
    assert_eq!(nsr["_admin"]["deployed"]["VCA"][0]["member-vnf-index"], "1");

    let vnfr = h.doc(collections::VNFRS, "nsr-1-vnfr-1");
    assert_eq!(vnfr["ip-address"], "10.0.0.5");
    assert_eq!(vnfr["vdur"][0]["vim-id"], "vm-1");

    let calls = h.ro.calls();
    let position = |call: &str| calls.iter().position(|c| c == call).expect(call);
    assert!(position("create vnfd") < position("create nsd"));
    assert!(position("create nsd") < position("create ns"));
    assert!(h.vca.calls().contains(&format!("create_model {NSR}")));

    let published = h.wait_for_notification(topics::NS, "instantiated").await;
    assert_eq!(published.params["nsr_id"], NSR);
    assert_eq!(published.params["nslcmop_id"], OP);
    assert_eq!(published.params["operationState"], "COMPLETED");
    assert!(h.ctx.tasks.operations(ResourceKind::Ns, NSR).is_empty());
}

#[tokio::test]
async fn without_charms_completes_once_ro_is_ready() {
    let h = Harness::new();
    seed_ns(&h, NSR, false).await;
    start(&h, default_params()).await;

    assert_eq!(h.doc(collections::NSLCMOPS, OP)["operationState"], "COMPLETED");
    assert!(h.vca.calls().iter().all(|call| !call.starts_with("create_model")));
    assert_eq!(h.doc(collections::NSRS, NSR)["config-status"], "configured");
}

#[tokio::test]
async fn reuses_descriptors_registered_by_an_earlier_attempt() {
    let h = Harness::new();
    seed_ns(&h, NSR, false).await;
    h.ro.seed(RoItem::Vnfd, "vnfd-earlier", "nsr-1.0.1");
    h.ro.seed(RoItem::Nsd, "nsd-earlier", "nsr-1.1.hackfest-ns");
    start(&h, default_params()).await;

    let calls = h.ro.calls();
    assert!(!calls.contains(&"create vnfd".to_string()));
    assert!(!calls.contains(&"create nsd".to_string()));
    let nsr = h.doc(collections::NSRS, NSR);
    assert_eq!(nsr["_admin"]["deployed"]["RO"]["vnfd"][0]["id"], "vnfd-earlier");
    assert_eq!(nsr["_admin"]["deployed"]["RO"]["nsd_id"], "nsd-earlier");
}

#[tokio::test]
async fn vm_error_at_ro_fails_the_operation() {
    let h = Harness::new();
    seed_ns(&h, NSR, false).await;
    let mut view = active_ns_view();
    view["vnfs"][0]["vms"][0]["status"] = json!("ERROR");
    view["vnfs"][0]["vms"][0]["error_msg"] = json!("quota exceeded");
    h.ro.set_ns_view(view);
    start(&h, default_params()).await;

    let op = h.doc(collections::NSLCMOPS, OP);
    assert_eq!(op["operationState"], "FAILED");
    let detail = op["detailed-status"].as_str().unwrap();
    assert!(detail.starts_with("FAILED Waiting ns ready at RO"), "{detail}");
    assert!(detail.contains("quota exceeded"));

    let nsr = h.doc(collections::NSRS, NSR);
    assert_eq!(nsr["operational-status"], "failed");
    assert!(nsr["detailed-status"].as_str().unwrap().starts_with("ERROR "));

    let published = h.wait_for_notification(topics::NS, "instantiated").await;
    assert_eq!(published.params["operationState"], "FAILED");
}

#[tokio::test]
async fn missing_vim_account_is_rejected() {
    let h = Harness::new();
    seed_ns(&h, NSR, false).await;
    start(&h, json!({ "nsName": "demo" })).await;

    let op = h.doc(collections::NSLCMOPS, OP);
    assert_eq!(op["operationState"], "FAILED");
    assert!(op["detailed-status"]
        .as_str()
        .unwrap()
        .contains("Invalid instantiate parameter: missing vimAccountId"));
    assert!(!h.ro.calls().contains(&"create ns".to_string()));
}

#[tokio::test]
async fn gives_up_when_ns_never_becomes_active() {
    let h = Harness::new();
    seed_ns(&h, NSR, false).await;
    let mut view = active_ns_view();
    view["vnfs"][0]["vms"][0]["status"] = json!("BUILD");
    h.ro.set_ns_view(view);
    start(
        &h,
        json!({ "vimAccountId": "vim-1", "nsName": "demo", "timeout_ns_deploy": 1 }),
    )
    .await;

    let op = h.doc(collections::NSLCMOPS, OP);
    assert_eq!(op["operationState"], "FAILED");
    assert!(op["detailed-status"]
        .as_str()
        .unwrap()
        .contains("Timeout waiting ns to be ready"));
}

#[tokio::test]
async fn operation_claimed_by_another_worker_is_skipped() {
    let h = Harness::new();
    seed_ns(&h, NSR, false).await;
    let mut op = nslcmop(OP, NSR, "instantiate", default_params());
    op["_admin"] = json!({ "worker": "someone-else" });
    h.seed(collections::NSLCMOPS, op).await;

    let guard = h.register(ResourceKind::Ns, NSR, OP, "ns_instantiate");
    h.ns().instantiate(NSR, OP, guard).await;

    assert!(h.ro.calls().is_empty());
    assert_eq!(h.doc(collections::NSLCMOPS, OP)["operationState"], "PROCESSING");
    assert!(h.notifications(topics::NS, "instantiated").await.is_empty());
    assert!(h.ctx.tasks.operations(ResourceKind::Ns, NSR).is_empty());
}

#[tokio::test]
async fn cancelled_job_stops_with_a_failure() {
    let h = Harness::new();
    seed_ns(&h, NSR, false).await;
    let mut view = active_ns_view();
    view["vnfs"][0]["vms"][0]["status"] = json!("BUILD");
    h.ro.set_ns_view(view);
    h.seed(collections::NSLCMOPS, nslcmop(OP, NSR, "instantiate", default_params()))
        .await;

    let guard = h.register(ResourceKind::Ns, NSR, OP, "ns_instantiate");
    let engine = h.ns();
    let job = tokio::spawn(async move { engine.instantiate(NSR, OP, guard).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.ctx.tasks.cancel(ResourceKind::Ns, NSR, None, None), 1);
    job.await.unwrap();

    let op = h.doc(collections::NSLCMOPS, OP);
    assert_eq!(op["operationState"], "FAILED");
    assert!(op["detailed-status"]
        .as_str()
        .unwrap()
        .contains("Operation was cancelled"));
}
