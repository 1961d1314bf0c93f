//! Netslice operations fan out to NS jobs and mirror their progress.

mod common;

use common::*;
use serde_json::{json, Value};

use osm_lcm::constants::{collections, topics, ResourceKind};

const NSI: &str = "nsi-1";
const NSR: &str = "nsr-1";

fn nsi(id: &str, state: &str, detailed_list: Value) -> Value {
    json!({
        "_id": id,
        "name": format!("{id}-slice"),
        "_admin": { "nsiState": state, "nsrs-detailed-list": detailed_list },
    })
}

fn nsilcmop(id: &str, operation: &str, params: Value) -> Value {
    json!({
        "_id": id,
        "netsliceInstanceId": NSI,
        "lcmOperationType": operation,
        "operationState": "PROCESSING",
        "startTime": 1000.0,
        "operationParams": params,
    })
}

async fn instantiate_slice(h: &Harness, ns_params: Value) {
    seed_ns(h, NSR, false).await;
    h.seed(collections::NSLCMOPS, nslcmop("ns-op-1", NSR, "instantiate", ns_params))
        .await;
    h.seed(collections::NSIS, nsi(NSI, "NOT_INSTANTIATED", json!([])))
        .await;
    h.seed(
        collections::NSILCMOPS,
        nsilcmop("nsi-op-1", "instantiate", json!({ "nslcmops_ids": ["ns-op-1"] })),
    )
    .await;
    let guard = h.register(ResourceKind::Nsi, NSI, "nsi-op-1", "nsi_instantiate");
    h.netslice().instantiate(NSI, "nsi-op-1", guard).await;
}

#[tokio::test]
async fn instantiate_launches_and_tracks_each_ns() {
    let h = Harness::new();
    instantiate_slice(&h, json!({ "vimAccountId": "vim-1", "nsName": "demo" })).await;

    let op = h.doc(collections::NSILCMOPS, "nsi-op-1");
    assert_eq!(op["operationState"], "COMPLETED");
    assert_eq!(h.doc(collections::NSLCMOPS, "ns-op-1")["operationState"], "COMPLETED");

    let nsir = h.doc(collections::NSIS, NSI);
    assert_eq!(nsir["operational-status"], "running");
    assert_eq!(nsir["_admin"]["nsiState"], "INSTANTIATED");
    let entry = &nsir["_admin"]["nsrs-detailed-list"][0];
    assert_eq!(entry["nsrId"], NSR);
    assert_eq!(entry["status"], "COMPLETED");
    assert_eq!(entry["instantiated"], true);

    let published = h.wait_for_notification(topics::NSI, "instantiated").await;
    assert_eq!(published.params["nsir_id"], NSI);
    assert_eq!(published.params["nsilcmop_id"], "nsi-op-1");
    h.wait_idle(ResourceKind::Ns, NSR).await;
}

#[tokio::test]
async fn failed_ns_fails_the_slice() {
    let h = Harness::new();
    instantiate_slice(&h, json!({ "nsName": "demo" })).await;

    let op = h.doc(collections::NSILCMOPS, "nsi-op-1");
    assert_eq!(op["operationState"], "FAILED");
    let detail = op["detailed-status"].as_str().unwrap();
    assert!(detail.starts_with("FAILED instantiating: NS nsr-1 FAILED"), "{detail}");
    assert_eq!(h.doc(collections::NSIS, NSI)["operational-status"], "failed");
}

#[tokio::test]
async fn terminate_with_autoremove_clears_slice_records() {
    let h = Harness::new();
    instantiate_slice(&h, json!({ "vimAccountId": "vim-1", "nsName": "demo" })).await;

    h.seed(collections::NSLCMOPS, nslcmop("ns-op-t", NSR, "terminate", json!({})))
        .await;
    h.seed(
        collections::NSILCMOPS,
        nsilcmop(
            "nsi-op-t",
            "terminate",
            json!({ "nslcmops_ids": ["ns-op-t"], "autoremove": true }),
        ),
    )
    .await;
    let guard = h.register(ResourceKind::Nsi, NSI, "nsi-op-t", "nsi_terminate");
    h.netslice().terminate(NSI, "nsi-op-t", guard).await;

    let published = h.wait_for_notification(topics::NSI, "terminated").await;
    assert_eq!(published.params["operationState"], "COMPLETED");
    assert_eq!(published.params["autoremove"], true);
    assert_eq!(h.doc(collections::NSLCMOPS, "ns-op-t")["operationState"], "COMPLETED");
    assert_eq!(h.doc(collections::NSRS, NSR)["_admin"]["nsState"], "NOT_INSTANTIATED");
    assert_eq!(h.db.count(collections::NSIS), 0);
    assert_eq!(h.db.count(collections::NSILCMOPS), 0);
}

#[tokio::test]
async fn shared_ns_is_left_running() {
    let h = Harness::new();
    instantiate_slice(&h, json!({ "vimAccountId": "vim-1", "nsName": "demo" })).await;
    h.seed(
        collections::NSIS,
        nsi("nsi-2", "INSTANTIATED", json!([{ "nsrId": NSR, "status": "COMPLETED" }])),
    )
    .await;

    h.seed(collections::NSLCMOPS, nslcmop("ns-op-t", NSR, "terminate", json!({})))
        .await;
    h.seed(
        collections::NSILCMOPS,
        nsilcmop("nsi-op-t", "terminate", json!({ "nslcmops_ids": ["ns-op-t"] })),
    )
    .await;
    let guard = h.register(ResourceKind::Nsi, NSI, "nsi-op-t", "nsi_terminate");
    h.netslice().terminate(NSI, "nsi-op-t", guard).await;

    let op = h.doc(collections::NSILCMOPS, "nsi-op-t");
    assert_eq!(op["operationState"], "COMPLETED");
    assert_eq!(op["operationParams"]["nslcmops_ids"], json!([]));
    assert_eq!(h.doc(collections::NSLCMOPS, "ns-op-t")["operationState"], "PROCESSING");
    assert_eq!(h.doc(collections::NSRS, NSR)["_admin"]["nsState"], "INSTANTIATED");
    assert_eq!(h.doc(collections::NSIS, NSI)["_admin"]["nsiState"], "NOT_INSTANTIATED");
}

#[tokio::test]
async fn terminate_of_never_instantiated_slice_is_a_no_op() {
    let h = Harness::new();
    h.seed(collections::NSIS, nsi(NSI, "NOT_INSTANTIATED", json!([])))
        .await;
    h.seed(
        collections::NSILCMOPS,
        nsilcmop("nsi-op-t", "terminate", json!({ "nslcmops_ids": [] })),
    )
    .await;
    let guard = h.register(ResourceKind::Nsi, NSI, "nsi-op-t", "nsi_terminate");
    h.netslice().terminate(NSI, "nsi-op-t", guard).await;

    assert!(h.notifications(topics::NSI, "terminated").await.is_empty());
    assert!(h.ctx.tasks.operations(ResourceKind::Nsi, NSI).is_empty());
}
