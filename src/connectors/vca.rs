//! Configuration-unit contract.
//!
//! Status changes are pushed to the sender handed to
//! [`VcaConnector::deploy_unit`]; the instantiate workflow owns the receiving
//! end and correlates events back to its deployed units.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::errors::VcaError;

pub type VcaResult<T> = Result<T, VcaError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatusEvent {
    pub model: String,
    pub application: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployUnitRequest {
    pub model: String,
    pub application: String,
    pub charm: String,
    /// Initial configuration, including `rw_mgmt_ip` for proxy units
    pub params: Value,
    /// Host to install on for native units; `None` for proxy units
    pub machine: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PrimitiveStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[async_trait]
pub trait VcaConnector: Send + Sync + std::fmt::Debug {
    async fn create_model(&self, model: &str) -> VcaResult<()>;

    async fn destroy_model(&self, model: &str) -> VcaResult<()>;

    /// Start deploying a unit; status updates are sent on `events` until the
    /// unit is removed or the receiver is dropped
    async fn deploy_unit(
        &self,
        request: DeployUnitRequest,
        events: mpsc::UnboundedSender<UnitStatusEvent>,
    ) -> VcaResult<()>;

    async fn remove_unit(&self, model: &str, application: &str) -> VcaResult<()>;

    /// Start a primitive; returns the id used to poll it
    async fn execute_primitive(
        &self,
        model: &str,
        application: &str,
        primitive: &str,
        params: &Map<String, Value>,
    ) -> VcaResult<String>;

    async fn primitive_status(&self, model: &str, primitive_id: &str) -> VcaResult<PrimitiveStatus>;

    async fn primitive_output(&self, model: &str, primitive_id: &str) -> VcaResult<Value>;

    /// Public key the configuration units use to reach VDUs
    async fn public_key(&self) -> VcaResult<String>;
}
