//! VIM, WIM, SDN and K8s account operations.

mod common;

use common::*;
use serde_json::{json, Value};

use osm_lcm::constants::{collections, topics, ResourceKind};
use osm_lcm::orchestration::lifecycle::accounts::AccountCommand;

async fn run(h: &Harness, kind: ResourceKind, command: AccountCommand, account_id: &str) {
    run_with(h, kind, command, json!({ "_id": account_id, "op_id": format!("{account_id}:0") }))
        .await;
}

async fn run_with(h: &Harness, kind: ResourceKind, command: AccountCommand, content: Value) {
    let account_id = content["_id"].as_str().unwrap().to_string();
    let guard = h.register(kind, &account_id, "1", &command.job_name(kind));
    h.accounts().run(kind, command, content, "1", guard).await;
}

fn vim_fields() -> Value {
    json!({
        "vim_type": "openstack",
        "vim_url": "http://10.0.0.1:5000/v3",
        "vim_user": "admin",
        "vim_password": "secret",
        "vim_tenant_name": "osm",
        "config": { "insecure": true },
    })
}

#[tokio::test]
async fn vim_create_registers_vim_and_tenant_account() {
    let h = Harness::new();
    h.seed(collections::VIM_ACCOUNTS, pending_account("vim-1", vim_fields()))
        .await;
    run(&h, ResourceKind::Vim, AccountCommand::Create, "vim-1").await;

    assert_eq!(h.ro.calls(), vec!["create vim", "attach vim_account"]);
    let vim = h.doc(collections::VIM_ACCOUNTS, "vim-1");
    assert_eq!(vim["_admin"]["operationalState"], "ENABLED");
    assert_eq!(vim["_admin"]["detailed-status"], "Done");
    assert!(vim["_admin"]["deployed"]["RO"].is_string());
    assert!(vim["_admin"]["deployed"]["RO-account"].is_string());
    let slot = &vim["_admin"]["operations"][0];
    assert_eq!(slot["operationState"], "COMPLETED");
    assert_eq!(slot["worker"], WORKER_ID);

    let published = h.wait_for_notification(topics::VIM_ACCOUNT, "created").await;
    assert_eq!(published.params["_id"], "vim-1");
    assert_eq!(published.params["op_id"], "vim-1:0");
    assert_eq!(published.params["operationState"], "COMPLETED");
    assert!(h.ctx.tasks.operations(ResourceKind::Vim, "vim-1").is_empty());
}

#[tokio::test]
async fn vim_create_needs_a_deployed_sdn_controller() {
    let h = Harness::new();
    let mut fields = vim_fields();
    fields["config"]["sdn-controller"] = json!("sdn-1");
    h.seed(collections::VIM_ACCOUNTS, pending_account("vim-1", fields))
        .await;
    h.seed(
        collections::SDNS,
        json!({ "_id": "sdn-1", "_admin": { "operations": [] } }),
    )
    .await;
    run(&h, ResourceKind::Vim, AccountCommand::Create, "vim-1").await;

    let vim = h.doc(collections::VIM_ACCOUNTS, "vim-1");
    assert_eq!(vim["_admin"]["operationalState"], "ERROR");
    let detail = vim["_admin"]["detailed-status"].as_str().unwrap();
    assert!(detail.contains("sdn-controller=sdn-1 is not available. Not deployed at RO"), "{detail}");
    assert_eq!(vim["_admin"]["operations"][0]["operationState"], "FAILED");
    assert!(h.ro.calls().is_empty());

    let published = h.wait_for_notification(topics::VIM_ACCOUNT, "created").await;
    assert_eq!(published.params["operationState"], "FAILED");
}

#[tokio::test]
async fn vim_create_with_deployed_sdn_controller_succeeds() {
    let h = Harness::new();
    let mut fields = vim_fields();
    fields["config"]["sdn-controller"] = json!("sdn-1");
    h.seed(collections::VIM_ACCOUNTS, pending_account("vim-1", fields))
        .await;
    h.seed(
        collections::SDNS,
        json!({
            "_id": "sdn-1",
            "_admin": {
                "deployed": { "RO": "ro-sdn-1" },
                "operations": [{ "operationState": "COMPLETED", "startTime": 1.0 }],
            },
        }),
    )
    .await;
    run(&h, ResourceKind::Vim, AccountCommand::Create, "vim-1").await;

    let vim = h.doc(collections::VIM_ACCOUNTS, "vim-1");
    assert_eq!(vim["_admin"]["operationalState"], "ENABLED");
}

#[tokio::test]
async fn encrypted_password_without_key_fails() {
    let h = Harness::new();
    let mut fields = vim_fields();
    fields["schema_version"] = json!("1.1");
    fields["vim_password"] = json!("bm90LXJlYWxseS1lbmNyeXB0ZWQtYXQtYWxsLXJlYWxseQ==");
    h.seed(collections::VIM_ACCOUNTS, pending_account("vim-1", fields))
        .await;
    run(&h, ResourceKind::Vim, AccountCommand::Create, "vim-1").await;

    let vim = h.doc(collections::VIM_ACCOUNTS, "vim-1");
    assert_eq!(vim["_admin"]["operationalState"], "ERROR");
    assert!(vim["_admin"]["detailed-status"]
        .as_str()
        .unwrap()
        .starts_with("ERROR Creating vim_account at RO"));
}

#[tokio::test]
async fn vim_delete_tolerates_missing_ro_objects_and_removes_record() {
    let h = Harness::new();
    let mut vim = vim_account("vim-1");
    vim["_admin"]["operations"] = json!([{ "operationState": "PROCESSING", "startTime": 1000.0 }]);
    h.seed(collections::VIM_ACCOUNTS, vim).await;
    run(&h, ResourceKind::Vim, AccountCommand::Delete, "vim-1").await;

    assert_eq!(h.ro.calls(), vec!["detach vim_account", "delete vim"]);
    assert_eq!(h.db.count(collections::VIM_ACCOUNTS), 0);
    let published = h.wait_for_notification(topics::VIM_ACCOUNT, "deleted").await;
    assert_eq!(published.params["operationState"], "COMPLETED");
}

#[tokio::test]
async fn vim_edit_pushes_changes_to_ro() {
    let h = Harness::new();
    let mut vim = vim_account("vim-1");
    vim["_admin"]["operations"] = json!([{ "operationState": "PROCESSING", "startTime": 1000.0 }]);
    h.seed(collections::VIM_ACCOUNTS, vim).await;
    run_with(
        &h,
        ResourceKind::Vim,
        AccountCommand::Edit,
        json!({ "_id": "vim-1", "op_id": "vim-1:0", "vim_url": "http://10.0.0.2:5000/v3", "vim_password": "rotated" }),
    )
    .await;

    assert_eq!(h.ro.calls(), vec!["edit vim", "edit vim_account"]);
    let published = h.wait_for_notification(topics::VIM_ACCOUNT, "edited").await;
    assert_eq!(published.params["operationState"], "COMPLETED");
}

#[tokio::test]
async fn wim_create_registers_wim_and_account() {
    let h = Harness::new();
    h.seed(
        collections::WIM_ACCOUNTS,
        pending_account("wim-1", json!({ "wim_type": "onos", "wim_url": "http://10.0.0.9", "user": "u", "password": "p" })),
    )
    .await;
    run(&h, ResourceKind::Wim, AccountCommand::Create, "wim-1").await;

    assert_eq!(h.ro.calls(), vec!["create wim", "attach wim_account"]);
    let wim = h.doc(collections::WIM_ACCOUNTS, "wim-1");
    assert_eq!(wim["_admin"]["operationalState"], "ENABLED");
    h.wait_for_notification(topics::WIM_ACCOUNT, "created").await;
}

#[tokio::test]
async fn sdn_create_then_delete() {
    let h = Harness::new();
    h.seed(
        collections::SDNS,
        pending_account("sdn-1", json!({ "type": "onos", "ip": "10.0.0.3", "port": 8181, "password": "p", "description": "lab" })),
    )
    .await;
    run(&h, ResourceKind::Sdn, AccountCommand::Create, "sdn-1").await;

    let sdn = h.doc(collections::SDNS, "sdn-1");
    assert_eq!(sdn["_admin"]["operationalState"], "ENABLED");
    assert!(sdn["_admin"]["deployed"]["RO"].is_string());

    run_with(
        &h,
        ResourceKind::Sdn,
        AccountCommand::Delete,
        json!({ "_id": "sdn-1" }),
    )
    .await;
    assert_eq!(h.ro.calls(), vec!["create sdn", "delete sdn"]);
    assert_eq!(h.db.count(collections::SDNS), 0);
}

#[tokio::test]
async fn k8s_cluster_create_initializes_helm_and_adds_repositories() {
    let h = Harness::new();
    h.seed(
        collections::K8S_REPOS,
        json!({ "_id": "repo-1", "name": "stable", "url": "https://charts.example.org", "_admin": {} }),
    )
    .await;
    h.seed(
        collections::K8S_CLUSTERS,
        pending_account("k8s-1", json!({ "credentials": { "users": [{ "token": "abc" }] } })),
    )
    .await;
    run(&h, ResourceKind::K8sCluster, AccountCommand::Create, "k8s-1").await;

    assert_eq!(
        h.k8s.calls(),
        vec!["init_env k8s-1", "repo_add helm-k8s-1 stable"]
    );
    let cluster = h.doc(collections::K8S_CLUSTERS, "k8s-1");
    assert_eq!(cluster["_admin"]["helm-chart"]["id"], "helm-k8s-1");
    assert_eq!(cluster["_admin"]["helm-chart"]["created"], true);
    assert_eq!(cluster["_admin"]["operationalState"], "ENABLED");
    let repo = h.doc(collections::K8S_REPOS, "repo-1");
    assert_eq!(repo["_admin"]["cluster-inserted"], json!(["helm-k8s-1"]));
}

#[tokio::test]
async fn k8s_cluster_delete_resets_and_unlinks_repositories() {
    let h = Harness::new();
    h.seed(
        collections::K8S_REPOS,
        json!({ "_id": "repo-1", "name": "stable", "url": "https://charts.example.org",
                "_admin": { "cluster-inserted": ["helm-k8s-1", "helm-k8s-2"] } }),
    )
    .await;
    h.seed(
        collections::K8S_CLUSTERS,
        json!({ "_id": "k8s-1", "_admin": { "helm-chart": { "id": "helm-k8s-1" }, "operations": [] } }),
    )
    .await;
    run_with(
        &h,
        ResourceKind::K8sCluster,
        AccountCommand::Delete,
        json!({ "_id": "k8s-1" }),
    )
    .await;

    assert_eq!(h.k8s.calls(), vec!["reset helm-k8s-1"]);
    assert_eq!(h.db.count(collections::K8S_CLUSTERS), 0);
    let repo = h.doc(collections::K8S_REPOS, "repo-1");
    assert_eq!(repo["_admin"]["cluster-inserted"], json!(["helm-k8s-2"]));
}

#[tokio::test]
async fn k8s_repo_create_and_delete_follow_clusters() {
    let h = Harness::new();
    h.seed(
        collections::K8S_CLUSTERS,
        json!({ "_id": "k8s-1", "_admin": { "helm-chart": { "id": "helm-k8s-1" } } }),
    )
    .await;
    h.seed(
        collections::K8S_CLUSTERS,
        json!({ "_id": "k8s-2", "_admin": {} }),
    )
    .await;
    h.seed(
        collections::K8S_REPOS,
        pending_account("repo-1", json!({ "url": "https://charts.example.org" })),
    )
    .await;
    run(&h, ResourceKind::K8sRepo, AccountCommand::Create, "repo-1").await;

    let repo = h.doc(collections::K8S_REPOS, "repo-1");
    assert_eq!(repo["_admin"]["cluster-inserted"], json!(["helm-k8s-1"]));
    assert_eq!(repo["_admin"]["operationalState"], "ENABLED");

    run_with(
        &h,
        ResourceKind::K8sRepo,
        AccountCommand::Delete,
        json!({ "_id": "repo-1" }),
    )
    .await;
    assert_eq!(
        h.k8s.calls(),
        vec!["repo_add helm-k8s-1 repo-1-name", "repo_remove helm-k8s-1 repo-1-name"]
    );
    assert_eq!(h.db.count(collections::K8S_REPOS), 0);
}

#[tokio::test]
async fn k8s_cluster_edit_is_not_supported() {
    let h = Harness::new();
    h.seed(collections::K8S_CLUSTERS, pending_account("k8s-1", json!({})))
        .await;
    run(&h, ResourceKind::K8sCluster, AccountCommand::Edit, "k8s-1").await;

    let published = h.wait_for_notification(topics::K8S_CLUSTER, "edited").await;
    assert_eq!(published.params["operationState"], "FAILED");
    let slot = &h.doc(collections::K8S_CLUSTERS, "k8s-1")["_admin"]["operations"][0];
    assert!(slot["detailed-status"]
        .as_str()
        .unwrap()
        .contains("command 'edit' not supported for k8scluster"));
}

#[tokio::test]
async fn operation_owned_by_another_worker_is_left_alone() {
    let h = Harness::new();
    let mut vim = pending_account("vim-1", vim_fields());
    vim["_admin"]["operations"][0]["worker"] = json!("other-worker");
    h.seed(collections::VIM_ACCOUNTS, vim).await;
    run(&h, ResourceKind::Vim, AccountCommand::Create, "vim-1").await;

    assert!(h.ro.calls().is_empty());
    assert!(h.notifications(topics::VIM_ACCOUNT, "created").await.is_empty());
    assert_eq!(
        h.doc(collections::VIM_ACCOUNTS, "vim-1")["_admin"]["operationalState"],
        "PROCESSING"
    );
}
