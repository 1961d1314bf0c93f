//! Kubernetes cluster contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::K8sError;

#[async_trait]
pub trait K8sConnector: Send + Sync + std::fmt::Debug {
    /// Prepare a cluster for helm deployments; returns the connector's id for it
    async fn init_env(&self, cluster_id: &str, credentials: &Value) -> Result<String, K8sError>;

    /// Undo `init_env`
    async fn reset(&self, cluster_uuid: &str) -> Result<(), K8sError>;

    async fn repo_add(&self, cluster_uuid: &str, name: &str, url: &str) -> Result<(), K8sError>;

    async fn repo_remove(&self, cluster_uuid: &str, name: &str) -> Result<(), K8sError>;
}
