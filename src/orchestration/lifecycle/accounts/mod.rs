//! # Account Lifecycle
//!
//! Create, edit and delete of infrastructure accounts. Every account
//! operation follows the same frame:
//!
//! 1. strip `op_id` from the command content and claim it through the HA
//!    lock (a lost race ends quietly)
//! 2. run the kind-specific workflow under
//!    [`run_guarded`](super::operation::run_guarded)
//! 3. persist `_admin.operationalState` and `_admin.detailed-status` on the
//!    account record, register the outcome in its HA slot, publish the
//!    `<command>d` notification and deregister the job
//!
//! Secrets are decrypted with the account id as salt just before they are
//! handed to a collaborator and never written back.

mod k8s_cluster;
mod k8s_repo;
mod sdn;
mod vim;
mod wim;

use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::operation::{claim, persist, persist_best_effort, run_guarded, OpProgress};
use crate::constants::{account_state, commands, OperationState, ResourceKind};
use crate::database::{doc_id, Filter};
use crate::errors::{LcmError, LcmResult};
use crate::logging::log_operation;
use crate::orchestration::SystemContext;
use crate::registry::{HaOpType, JobGuard};
use crate::utils::json::str_of;

/// Account command accepted on an account topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountCommand {
    Create,
    Edit,
    Delete,
}

impl AccountCommand {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            commands::CREATE => Some(Self::Create),
            commands::EDIT => Some(Self::Edit),
            commands::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => commands::CREATE,
            Self::Edit => commands::EDIT,
            Self::Delete => commands::DELETE,
        }
    }

    /// Notification published when the command finishes
    pub fn verb(self) -> &'static str {
        match self {
            Self::Create => commands::CREATED,
            Self::Edit => commands::EDITED,
            Self::Delete => commands::DELETED,
        }
    }

    pub fn op_type(self) -> HaOpType {
        match self {
            Self::Create => HaOpType::Create,
            Self::Edit => HaOpType::Edit,
            Self::Delete => HaOpType::Delete,
        }
    }

    /// Job name used in the task registry, e.g. `vim_create`
    pub fn job_name(self, kind: ResourceKind) -> String {
        let prefix = match kind {
            ResourceKind::Vim => "vim",
            ResourceKind::Wim => "wim",
            ResourceKind::Sdn => "sdn",
            ResourceKind::K8sCluster => "k8scluster",
            ResourceKind::K8sRepo => "k8srepo",
            ResourceKind::Ns | ResourceKind::Nsi => kind.topic(),
        };
        format!("{prefix}_{}", self.as_str())
    }
}

impl fmt::Display for AccountCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account lifecycle engine
#[derive(Debug, Clone)]
pub struct AccountLcm {
    ctx: Arc<SystemContext>,
}

impl AccountLcm {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }

    pub(crate) fn ctx(&self) -> &SystemContext {
        &self.ctx
    }

    /// Run one account command. `order_id` is the registry key the
    /// dispatcher registered the job under.
    #[instrument(skip(self, content, guard), fields(worker_id = %self.ctx.worker_id))]
    pub async fn run(
        &self,
        kind: ResourceKind,
        command: AccountCommand,
        mut content: Value,
        order_id: &str,
        guard: JobGuard,
    ) {
        let ctx = self.ctx();
        let op_id = content
            .as_object_mut()
            .and_then(|fields| fields.remove("op_id"))
            .and_then(|value| value.as_str().map(str::to_string));
        let account_id = doc_id(&content).unwrap_or_default().to_string();

        if !claim(ctx, kind, command.op_type(), op_id.as_deref()).await {
            ctx.tasks.remove(kind, &account_id, order_id, None);
            return;
        }
        info!(topic = %kind, %command, account_id = %account_id, "Account operation Enter");

        let token = guard.token();
        let mut progress = OpProgress::new("Waiting for related tasks");
        let result = run_guarded(
            &token,
            self.dispatch(kind, command, &account_id, op_id.as_deref(), &content, &mut progress),
        )
        .await;

        match result {
            Ok(()) => {
                if progress.state.is_none() {
                    progress.finish(OperationState::Completed, "Done");
                }
            }
            Err(e) => {
                error!(topic = %kind, %command, account_id = %account_id, step = %progress.step, error = %e, "Account operation failed");
                let detail = progress.error_detail(&e);
                progress.set_resource("_admin.operationalState", account_state::ERROR);
                progress.set_resource("_admin.detailed-status", detail.clone());
                progress.finish(OperationState::Failed, detail);
            }
        }
        self.finalize(kind, command, &account_id, op_id.as_deref(), order_id, &mut progress)
            .await;
        drop(guard);
    }

    async fn dispatch(
        &self,
        kind: ResourceKind,
        command: AccountCommand,
        account_id: &str,
        op_id: Option<&str>,
        content: &Value,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        self.ctx
            .ha
            .waitfor_related_ha(kind, command.op_type(), op_id)
            .await?;
        use AccountCommand::{Create, Delete, Edit};
        match (kind, command) {
            (ResourceKind::Vim, Create) => self.vim_create(account_id, progress).await,
            (ResourceKind::Vim, Edit) => self.vim_edit(account_id, content, progress).await,
            (ResourceKind::Vim, Delete) => self.vim_delete(account_id, progress).await,
            (ResourceKind::Wim, Create) => self.wim_create(account_id, progress).await,
            (ResourceKind::Wim, Edit) => self.wim_edit(account_id, content, progress).await,
            (ResourceKind::Wim, Delete) => self.wim_delete(account_id, progress).await,
            (ResourceKind::Sdn, Create) => self.sdn_create(account_id, progress).await,
            (ResourceKind::Sdn, Edit) => self.sdn_edit(account_id, content, progress).await,
            (ResourceKind::Sdn, Delete) => self.sdn_delete(account_id, progress).await,
            (ResourceKind::K8sCluster, Create) => {
                self.k8s_cluster_create(account_id, progress).await
            }
            (ResourceKind::K8sCluster, Delete) => {
                self.k8s_cluster_delete(account_id, progress).await
            }
            (ResourceKind::K8sRepo, Create) => self.k8s_repo_create(account_id, progress).await,
            (ResourceKind::K8sRepo, Delete) => self.k8s_repo_delete(account_id, progress).await,
            (kind, command) => Err(LcmError::domain(format!(
                "command '{command}' not supported for {kind}"
            ))),
        }
    }

    async fn finalize(
        &self,
        kind: ResourceKind,
        command: AccountCommand,
        account_id: &str,
        op_id: Option<&str>,
        order_id: &str,
        progress: &mut OpProgress,
    ) {
        let ctx = self.ctx();
        if progress.resource_loaded {
            persist_best_effort(
                ctx.db.as_ref(),
                kind.collection(),
                account_id,
                &progress.resource_update,
            )
            .await;
        }

        let state = progress.state.unwrap_or(OperationState::Failed);
        let detail = progress
            .op_update
            .get("detailed-status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        ctx.ha
            .register_ha(kind, command.op_type(), op_id, state, &detail)
            .await;

        let params = json!({
            "_id": account_id,
            "op_id": op_id,
            "operationState": state.as_str(),
        });
        if let Err(e) = ctx.bus.publish(kind.topic(), command.verb(), params).await {
            error!(topic = %kind, account_id, error = %e, "Cannot publish result");
        }
        log_operation(kind, command.verb(), account_id, op_id, state, Some(&detail));
        ctx.tasks.remove(kind, account_id, order_id, None);
    }

    /// Load an account record, marking it for the final status write
    async fn load_account(
        &self,
        kind: ResourceKind,
        account_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<Value> {
        let label = match kind {
            ResourceKind::Vim => "vim",
            ResourceKind::Wim => "wim",
            ResourceKind::Sdn => "sdn",
            ResourceKind::K8sCluster => "k8scluster",
            _ => "k8srepo",
        };
        progress.step(format!("Getting {label}-id='{account_id}' from db"));
        let account = self
            .ctx
            .db
            .get_required(kind.collection(), &Filter::by_id(account_id))
            .await?;
        progress.resource_loaded = true;
        Ok(account)
    }

    /// Persist the account updates accumulated so far
    async fn write_account(
        &self,
        kind: ResourceKind,
        account_id: &str,
        progress: &OpProgress,
    ) -> LcmResult<()> {
        persist(
            self.ctx.db.as_ref(),
            kind.collection(),
            account_id,
            &progress.resource_update,
        )
        .await
    }

    /// Delete the account record once its external resources are gone
    async fn remove_account(
        &self,
        kind: ResourceKind,
        account_id: &str,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        progress.step("Deleting account from db");
        self.ctx
            .db
            .del_one(kind.collection(), &Filter::by_id(account_id), false)
            .await?;
        progress.resource_loaded = false;
        progress.finish(OperationState::Completed, "Done");
        Ok(())
    }

    /// Mark the account usable
    fn enable(progress: &mut OpProgress) {
        progress.set_resource("_admin.operationalState", account_state::ENABLED);
        progress.set_resource("_admin.detailed-status", "Done");
        progress.finish(OperationState::Completed, "Done");
    }

    /// Decrypt one secret field of an account in place
    fn decrypt_field(
        &self,
        fields: &mut Map<String, Value>,
        key: &str,
        schema_version: Option<&str>,
        salt: &str,
    ) -> LcmResult<()> {
        if let Some(secret) = fields.get(key).and_then(Value::as_str) {
            let plain = self.ctx.db.decrypt(secret, schema_version, salt)?;
            fields.insert(key.to_string(), json!(plain));
        }
        Ok(())
    }
}

/// Account copy without orchestrator bookkeeping, as sent to the RO
fn strip_bookkeeping(account: &Value, extra: &[&str]) -> Map<String, Value> {
    let mut copy = account.as_object().cloned().unwrap_or_default();
    for key in ["_id", "_admin", "schema_version", "schema_type"]
        .iter()
        .chain(extra)
    {
        copy.remove(*key);
    }
    copy
}

fn schema_version(account: &Value) -> Option<&str> {
    str_of(account, "schema_version")
}
