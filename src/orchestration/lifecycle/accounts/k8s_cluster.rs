use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{schema_version, AccountLcm};
use crate::constants::{collections, ResourceKind};
use crate::database::{doc_id, update_of, Filter};
use crate::errors::LcmResult;
use crate::orchestration::lifecycle::operation::OpProgress;
use crate::utils::json::{deep_array, deep_str, str_of};

/// Credential keys holding encrypted values, at any depth
const SECRET_KEYS: [&str; 3] = ["password", "secret", "token"];

impl AccountLcm {
    /// Copy of the cluster credentials with every secret decrypted
    fn decrypt_credentials(
        &self,
        value: &Value,
        schema: Option<&str>,
        salt: &str,
    ) -> LcmResult<Value> {
        Ok(match value {
            Value::Object(fields) => {
                let mut plain = Map::new();
                for (key, item) in fields {
                    let decrypted = match item {
                        Value::String(secret) if SECRET_KEYS.contains(&key.as_str()) => {
                            json!(self.ctx.db.decrypt(secret, schema, salt)?)
                        }
                        other => self.decrypt_credentials(other, schema, salt)?,
                    };
                    plain.insert(key.clone(), decrypted);
                }
                Value::Object(plain)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.decrypt_credentials(item, schema, salt))
                    .collect::<LcmResult<_>>()?,
            ),
            other => other.clone(),
        })
    }

    pub(super) async fn k8s_cluster_create(
        &self,
        cluster_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let cluster = self
            .load_account(ResourceKind::K8sCluster, cluster_id, progress)
            .await?;

        progress.step("Initializing helm environment");
        let credentials = self.decrypt_credentials(
            cluster.get("credentials").unwrap_or(&Value::Null),
            schema_version(&cluster),
            cluster_id,
        )?;
        let cluster_uuid = self.ctx.k8s.init_env(cluster_id, &credentials).await?;
        progress.set_resource("_admin.helm-chart.id", cluster_uuid.clone());
        progress.set_resource("_admin.helm-chart.created", true);
        Self::enable(progress);
        self.write_account(ResourceKind::K8sCluster, cluster_id, progress)
            .await?;
        info!(cluster_id, cluster_uuid = %cluster_uuid, "helm environment initialized");

        progress.step("Adding helm repositories");
        let repos = self
            .ctx
            .db
            .get_list(collections::K8S_REPOS, &Filter::new())
            .await?;
        for repo in repos {
            let (Some(repo_id), Some(name), Some(url)) =
                (doc_id(&repo), str_of(&repo, "name"), str_of(&repo, "url"))
            else {
                continue;
            };
            if let Err(e) = self.ctx.k8s.repo_add(&cluster_uuid, name, url).await {
                warn!(cluster_id, repo = name, error = %e, "Cannot add helm repository");
                continue;
            }
            let mut inserted: Vec<Value> = deep_array(&repo, "_admin.cluster-inserted").to_vec();
            inserted.push(json!(cluster_uuid));
            self.ctx
                .db
                .set_by_id(
                    collections::K8S_REPOS,
                    repo_id,
                    &update_of([("_admin.cluster-inserted", Value::Array(inserted))]),
                )
                .await?;
        }
        Ok(())
    }

    pub(super) async fn k8s_cluster_delete(
        &self,
        cluster_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let cluster = self
            .load_account(ResourceKind::K8sCluster, cluster_id, progress)
            .await?;
        if let Some(cluster_uuid) = deep_str(&cluster, "_admin.helm-chart.id") {
            progress.step("Resetting helm environment");
            self.ctx.k8s.reset(cluster_uuid).await?;

            progress.step("Updating helm repositories");
            let repos = self
                .ctx
                .db
                .get_list(collections::K8S_REPOS, &Filter::new())
                .await?;
            for repo in repos {
                let inserted = deep_array(&repo, "_admin.cluster-inserted");
                if !inserted.iter().any(|id| id.as_str() == Some(cluster_uuid)) {
                    continue;
                }
                let Some(repo_id) = doc_id(&repo) else {
                    continue;
                };
                let remaining: Vec<Value> = inserted
                    .iter()
                    .filter(|id| id.as_str() != Some(cluster_uuid))
                    .cloned()
                    .collect();
                self.ctx
                    .db
                    .set_by_id(
                        collections::K8S_REPOS,
                        repo_id,
                        &update_of([("_admin.cluster-inserted", Value::Array(remaining))]),
                    )
                    .await?;
            }
        }
        self.remove_account(ResourceKind::K8sCluster, cluster_id, progress)
            .await
    }
}
