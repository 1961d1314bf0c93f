use serde_json::{json, Value};
use tracing::{debug, warn};

use super::AccountLcm;
use crate::constants::{collections, ResourceKind};
use crate::database::Filter;
use crate::errors::{LcmError, LcmResult};
use crate::orchestration::lifecycle::operation::OpProgress;
use crate::utils::json::{deep_array, deep_str, str_of};

impl AccountLcm {
    /// Add the repository to every cluster with a helm environment. A
    /// cluster that fails or times out is skipped.
    pub(super) async fn k8s_repo_create(
        &self,
        repo_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let repo = self
            .load_account(ResourceKind::K8sRepo, repo_id, progress)
            .await?;
        let name = str_of(&repo, "name").unwrap_or_default();
        let url = str_of(&repo, "url")
            .ok_or_else(|| LcmError::domain(format!("k8srepo={repo_id} has no url")))?;

        progress.step("Adding repository to clusters");
        let clusters = self
            .ctx
            .db
            .get_list(collections::K8S_CLUSTERS, &Filter::new())
            .await?;
        let mut inserted: Vec<Value> = deep_array(&repo, "_admin.cluster-inserted").to_vec();
        for cluster in &clusters {
            let Some(cluster_uuid) = deep_str(cluster, "_admin.helm-chart.id") else {
                continue;
            };
            if inserted.iter().any(|id| id.as_str() == Some(cluster_uuid)) {
                continue;
            }
            let added = tokio::time::timeout(
                self.ctx.config.timeouts.k8s_repo_add(),
                self.ctx.k8s.repo_add(cluster_uuid, name, url),
            )
            .await;
            match added {
                Ok(Ok(())) => {
                    debug!(repo_id, cluster_uuid, "helm repository added");
                    inserted.push(json!(cluster_uuid));
                }
                Ok(Err(e)) => warn!(repo_id, cluster_uuid, error = %e, "Cannot add helm repository"),
                Err(_) => warn!(repo_id, cluster_uuid, "Timeout adding helm repository"),
            }
        }
        progress.set_resource("_admin.cluster-inserted", Value::Array(inserted));
        Self::enable(progress);
        Ok(())
    }

    pub(super) async fn k8s_repo_delete(
        &self,
        repo_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let repo = self
            .load_account(ResourceKind::K8sRepo, repo_id, progress)
            .await?;
        let name = str_of(&repo, "name").unwrap_or_default();

        progress.step("Removing repository from clusters");
        for cluster_uuid in deep_array(&repo, "_admin.cluster-inserted")
            .iter()
            .filter_map(Value::as_str)
        {
            if let Err(e) = self.ctx.k8s.repo_remove(cluster_uuid, name).await {
                warn!(repo_id, cluster_uuid, error = %e, "Cannot remove helm repository");
            }
        }
        self.remove_account(ResourceKind::K8sRepo, repo_id, progress)
            .await
    }
}
