//! In-process stand-ins for the RO, VCA and K8s collaborators.
//!
//! Each fake records the calls it receives so tests can assert on the order
//! of external side effects, and exposes a few knobs to inject failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;

use osm_lcm::connectors::ro::RoResult;
use osm_lcm::connectors::vca::VcaResult;
use osm_lcm::connectors::{
    DeployUnitRequest, K8sConnector, PrimitiveStatus, RoClient, RoItem, UnitStatusEvent,
    VcaConnector,
};
use osm_lcm::errors::{K8sError, RoError, VcaError};

#[derive(Debug, Default)]
struct RoState {
    next_id: u64,
    items: Vec<(RoItem, Value)>,
    calls: Vec<String>,
    ns_view: Option<Value>,
    action_view: Option<Value>,
    failures: HashMap<(RoItem, &'static str), RoError>,
}

#[derive(Debug, Default)]
pub struct FakeRo {
    state: Mutex<RoState>,
}

impl FakeRo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls received so far, as `"<verb> <item>"`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, item: RoItem) -> usize {
        self.state
            .lock()
            .items
            .iter()
            .filter(|(kind, _)| *kind == item)
            .count()
    }

    /// Descriptor answered by `show(Ns, ..)` for any existing ns
    pub fn set_ns_view(&self, view: Value) {
        self.state.lock().ns_view = Some(view);
    }

    pub fn set_action_view(&self, view: Value) {
        self.state.lock().action_view = Some(view);
    }

    /// Make every `verb` call on `item` fail with `error`
    pub fn fail_on(&self, item: RoItem, verb: &'static str, error: RoError) {
        self.state.lock().failures.insert((item, verb), error);
    }

    /// Pre-register an object, as left behind by an earlier attempt
    pub fn seed(&self, item: RoItem, uuid: &str, osm_id: &str) {
        self.state
            .lock()
            .items
            .push((item, json!({ "uuid": uuid, "osm_id": osm_id })));
    }

    fn enter(&self, verb: &'static str, item: RoItem) -> RoResult<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("{verb} {item}"));
        match state.failures.get(&(item, verb)) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn next_uuid(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }
}

#[async_trait]
impl RoClient for FakeRo {
    async fn create(&self, item: RoItem, descriptor: Value) -> RoResult<Value> {
        self.enter("create", item)?;
        let uuid = self.next_uuid(item.as_str());
        let mut stored = descriptor.as_object().cloned().unwrap_or_default();
        if let Some(id) = descriptor.get("id").cloned() {
            stored.insert("osm_id".into(), id);
        }
        stored.insert("uuid".into(), json!(uuid));
        self.state.lock().items.push((item, Value::Object(stored)));
        Ok(json!({ "uuid": uuid }))
    }

    async fn show(&self, item: RoItem, id: &str) -> RoResult<Value> {
        self.enter("show", item)?;
        let state = self.state.lock();
        let found = state
            .items
            .iter()
            .find(|(kind, doc)| *kind == item && doc["uuid"] == json!(id))
            .map(|(_, doc)| doc.clone())
            .ok_or_else(|| RoError::not_found(format!("{item} {id} not found")))?;
        if item == RoItem::Ns {
            return Ok(state
                .ns_view
                .clone()
                .unwrap_or_else(|| json!({ "nets": [], "vnfs": [] })));
        }
        Ok(found)
    }

    async fn get_list(&self, item: RoItem, filter: Value) -> RoResult<Vec<Value>> {
        self.enter("list", item)?;
        let wanted: Map<String, Value> = filter.as_object().cloned().unwrap_or_default();
        Ok(self
            .state
            .lock()
            .items
            .iter()
            .filter(|(kind, doc)| {
                *kind == item && wanted.iter().all(|(key, value)| doc.get(key) == Some(value))
            })
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn edit(&self, item: RoItem, _id: &str, _descriptor: Value) -> RoResult<Value> {
        self.enter("edit", item)?;
        Ok(json!({}))
    }

    async fn delete(&self, item: RoItem, id: &str) -> RoResult<Value> {
        self.enter("delete", item)?;
        let mut state = self.state.lock();
        let before = state.items.len();
        state
            .items
            .retain(|(kind, doc)| !(*kind == item && doc["uuid"] == json!(id)));
        if state.items.len() == before {
            return Err(RoError::not_found(format!("{item} {id} not found")));
        }
        if item == RoItem::Ns {
            return Ok(json!({ "action_id": "delete-action" }));
        }
        Ok(json!({ "result": format!("{item} {id} deleted") }))
    }

    async fn attach(&self, item: RoItem, _id: &str, _descriptor: Value) -> RoResult<Value> {
        self.enter("attach", item)?;
        Ok(json!({ "uuid": self.next_uuid("account") }))
    }

    async fn detach(&self, item: RoItem, _id: &str) -> RoResult<Value> {
        self.enter("detach", item)?;
        Ok(json!({}))
    }

    async fn create_action(&self, item: RoItem, _id: &str, _descriptor: Value) -> RoResult<Value> {
        self.enter("action", item)?;
        Ok(json!({ "instance_action_id": "scale-action" }))
    }

    async fn show_action(&self, _ns_id: &str, _action_id: &str) -> RoResult<Value> {
        self.enter("show_action", RoItem::Ns)?;
        Ok(self
            .state
            .lock()
            .action_view
            .clone()
            .unwrap_or_else(|| json!({ "actions": [{ "status": "DONE" }] })))
    }
}

#[derive(Debug)]
struct VcaState {
    calls: Vec<String>,
    unit_status: String,
    primitive_status: PrimitiveStatus,
    primitive_output: Value,
    hang_primitive_status: bool,
    fail_remove: bool,
}

#[derive(Debug)]
pub struct FakeVca {
    state: Mutex<VcaState>,
}

impl Default for FakeVca {
    fn default() -> Self {
        Self {
            state: Mutex::new(VcaState {
                calls: Vec::new(),
                unit_status: "active".into(),
                primitive_status: PrimitiveStatus::Completed,
                primitive_output: json!({ "output": "ok" }),
                hang_primitive_status: false,
                fail_remove: false,
            }),
        }
    }
}

impl FakeVca {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Status pushed for every deployed unit
    pub fn set_unit_status(&self, status: &str) {
        self.state.lock().unit_status = status.to_string();
    }

    pub fn set_primitive_result(&self, status: PrimitiveStatus, output: Value) {
        let mut state = self.state.lock();
        state.primitive_status = status;
        state.primitive_output = output;
    }

    /// Status queries never answer, like a controller that stopped responding
    pub fn hang_primitive_status(&self) {
        self.state.lock().hang_primitive_status = true;
    }

    pub fn fail_unit_removal(&self) {
        self.state.lock().fail_remove = true;
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl VcaConnector for FakeVca {
    async fn create_model(&self, model: &str) -> VcaResult<()> {
        self.record(format!("create_model {model}"));
        Ok(())
    }

    async fn destroy_model(&self, model: &str) -> VcaResult<()> {
        self.record(format!("destroy_model {model}"));
        Ok(())
    }

    async fn deploy_unit(
        &self,
        request: DeployUnitRequest,
        events: mpsc::UnboundedSender<UnitStatusEvent>,
    ) -> VcaResult<()> {
        self.record(format!("deploy_unit {}", request.application));
        let status = self.state.lock().unit_status.clone();
        let _ = events.send(UnitStatusEvent {
            model: request.model,
            application: request.application,
            status,
            message: "Ready!".into(),
        });
        Ok(())
    }

    async fn remove_unit(&self, _model: &str, application: &str) -> VcaResult<()> {
        self.record(format!("remove_unit {application}"));
        if self.state.lock().fail_remove {
            return Err(VcaError::Rpc("controller unreachable".into()));
        }
        Ok(())
    }

    async fn execute_primitive(
        &self,
        _model: &str,
        application: &str,
        primitive: &str,
        _params: &Map<String, Value>,
    ) -> VcaResult<String> {
        self.record(format!("execute_primitive {application} {primitive}"));
        Ok(format!("{primitive}-run"))
    }

    async fn primitive_status(&self, _model: &str, _primitive_id: &str) -> VcaResult<PrimitiveStatus> {
        let hang = self.state.lock().hang_primitive_status;
        if hang {
            futures::future::pending::<()>().await;
        }
        Ok(self.state.lock().primitive_status)
    }

    async fn primitive_output(&self, _model: &str, _primitive_id: &str) -> VcaResult<Value> {
        Ok(self.state.lock().primitive_output.clone())
    }

    async fn public_key(&self) -> VcaResult<String> {
        Ok("ssh-rsa AAAAfake vca@osm".into())
    }
}

#[derive(Debug, Default)]
pub struct FakeK8s {
    calls: Mutex<Vec<String>>,
}

impl FakeK8s {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl K8sConnector for FakeK8s {
    async fn init_env(&self, cluster_id: &str, _credentials: &Value) -> Result<String, K8sError> {
        self.calls.lock().push(format!("init_env {cluster_id}"));
        Ok(format!("helm-{cluster_id}"))
    }

    async fn reset(&self, cluster_uuid: &str) -> Result<(), K8sError> {
        self.calls.lock().push(format!("reset {cluster_uuid}"));
        Ok(())
    }

    async fn repo_add(&self, cluster_uuid: &str, name: &str, _url: &str) -> Result<(), K8sError> {
        self.calls.lock().push(format!("repo_add {cluster_uuid} {name}"));
        Ok(())
    }

    async fn repo_remove(&self, cluster_uuid: &str, name: &str) -> Result<(), K8sError> {
        self.calls.lock().push(format!("repo_remove {cluster_uuid} {name}"));
        Ok(())
    }
}
