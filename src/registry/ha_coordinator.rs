//! # HA Coordinator
//!
//! Lets several orchestrator processes consume one command queue while
//! exactly one of them executes each operation. All coordination goes through
//! the document store:
//!
//! - **Service kinds** (`ns`, `nsi`): the operation id is the `_id` of the
//!   operation record, which carries the claim in `_admin.worker`.
//! - **Account kinds**: the wire id is `"<account_id>:<index>"`; the claim
//!   lives in `_admin.operations.<index>.worker` of the account record.
//!
//! Claims are taken with a single conditional update (`set_one` filtered on
//! the worker field being unset), never read-then-write. Commands without an
//! operation id come from callers that predate HA and are always owned.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{OperationState, ResourceKind};
use crate::database::{update_of, DocumentStore, Filter};
use crate::errors::{LcmError, LcmResult};
use crate::utils::time::epoch_seconds;

pub const TIMEOUT_RELATED_MESSAGE: &str = "Timeout waiting for related tasks to be completed";

/// How an operation takes part in the HA protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaOpType {
    /// ns/nsi lifecycle command
    Lifecycle,
    Create,
    Edit,
    Delete,
    /// Wait for every processing operation on the target, whatever its age
    Any,
}

impl HaOpType {
    pub fn from_command(command: &str) -> Self {
        match command {
            "create" => Self::Create,
            "edit" => Self::Edit,
            "delete" => Self::Delete,
            "ANY" => Self::Any,
            _ => Self::Lifecycle,
        }
    }
}

/// Typed form of the wire operation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaOperationId {
    Service { op_id: String },
    Account {
        account_id: String,
        /// `None` only for [`HaOpType::Any`], which targets the whole account
        index: Option<usize>,
    },
}

impl HaOperationId {
    pub fn parse(kind: ResourceKind, op_type: HaOpType, raw: &str) -> LcmResult<Self> {
        if kind.is_service() {
            return Ok(Self::Service {
                op_id: raw.to_string(),
            });
        }
        if op_type == HaOpType::Any {
            return Ok(Self::Account {
                account_id: raw.to_string(),
                index: None,
            });
        }
        let (account_id, index) = raw.rsplit_once(':').ok_or_else(|| {
            LcmError::internal(format!("invalid {kind} operation id '{raw}'"))
        })?;
        // The first operation of a new account is always slot 0
        let index = if op_type == HaOpType::Create {
            0
        } else {
            index.parse::<usize>().map_err(|_| {
                LcmError::internal(format!("invalid {kind} operation index in '{raw}'"))
            })?
        };
        Ok(Self::Account {
            account_id: account_id.to_string(),
            index: Some(index),
        })
    }

    pub fn document_id(&self) -> &str {
        match self {
            Self::Service { op_id } => op_id,
            Self::Account { account_id, .. } => account_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HaCoordinator {
    db: Arc<dyn DocumentStore>,
    worker_id: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl HaCoordinator {
    pub fn new(
        db: Arc<dyn DocumentStore>,
        worker_id: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            worker_id: worker_id.into(),
            poll_interval,
            timeout,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn collection(kind: ResourceKind) -> &'static str {
        kind.operation_collection()
            .unwrap_or_else(|| kind.collection())
    }

    /// Try to claim an operation. `Ok(false)` means another worker owns it
    /// and the caller must not execute it.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn lock_ha(
        &self,
        kind: ResourceKind,
        op_type: HaOpType,
        op_id: Option<&str>,
    ) -> LcmResult<bool> {
        let Some(raw) = op_id else {
            return Ok(true);
        };
        let collection = Self::collection(kind);

        match HaOperationId::parse(kind, op_type, raw)? {
            HaOperationId::Service { op_id } => {
                let filter = Filter::by_id(&op_id).unset("_admin.worker");
                let update = update_of([("_admin.worker", self.worker_id.as_str())]);
                let locked = self.db.set_one(collection, &filter, &update, false).await?;
                debug!(op_id = %op_id, locked, "Service operation lock attempt");
                Ok(locked)
            }
            HaOperationId::Account { account_id, index } => {
                let index = index.unwrap_or(0);
                let filter = Filter::by_id(&account_id)
                    .unset(format!("_admin.operations.{index}.worker"));
                let update = update_of([
                    (
                        format!("_admin.operations.{index}.worker"),
                        json!(self.worker_id),
                    ),
                    ("_admin.current_operation".to_string(), json!(index)),
                ]);
                let locked = self.db.set_one(collection, &filter, &update, false).await?;
                debug!(account_id = %account_id, index, locked, "Account operation lock attempt");
                if locked {
                    let progress = update_of([(
                        format!("_admin.operations.{index}.detailed-status"),
                        "In progress",
                    )]);
                    if let Err(e) = self
                        .db
                        .set_one(collection, &Filter::by_id(&account_id), &progress, false)
                        .await
                    {
                        warn!(account_id = %account_id, error = %e, "Cannot mark operation in progress");
                    }
                }
                Ok(locked)
            }
        }
    }

    /// Record the outcome of an account operation in its slot. Service kinds
    /// and legacy calls are no-ops; a deleted account is tolerated.
    pub async fn register_ha(
        &self,
        kind: ResourceKind,
        op_type: HaOpType,
        op_id: Option<&str>,
        state: OperationState,
        detailed_status: &str,
    ) {
        let Some(raw) = op_id else {
            return;
        };
        if kind.is_service() {
            return;
        }
        let (account_id, index) = match HaOperationId::parse(kind, op_type, raw) {
            Ok(HaOperationId::Account {
                account_id,
                index: Some(index),
            }) => (account_id, index),
            Ok(_) => return,
            Err(e) => {
                error!(op_id = raw, error = %e, "Cannot register HA outcome");
                return;
            }
        };
        let update = update_of([
            (
                format!("_admin.operations.{index}.operationState"),
                json!(state.as_str()),
            ),
            (
                format!("_admin.operations.{index}.detailed-status"),
                json!(detailed_status),
            ),
            (
                format!("_admin.operations.{index}.statusEnteredTime"),
                json!(epoch_seconds()),
            ),
        ]);
        if let Err(e) = self
            .db
            .set_one(kind.collection(), &Filter::by_id(&account_id), &update, false)
            .await
        {
            error!(account_id = %account_id, error = %e, "Cannot register HA outcome");
        }
    }

    /// Wait until no earlier operation on the same target is still
    /// PROCESSING. Fails with a timeout error after the configured ceiling.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn waitfor_related_ha(
        &self,
        kind: ResourceKind,
        op_type: HaOpType,
        op_id: Option<&str>,
    ) -> LcmResult<()> {
        let Some(raw) = op_id else {
            return Ok(());
        };
        let id = HaOperationId::parse(kind, op_type, raw)?;
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut last_count: Option<usize> = None;

        loop {
            let pending = self.count_related(kind, op_type, &id).await?;
            if pending == 0 {
                return Ok(());
            }
            if last_count != Some(pending) {
                info!(op_id = raw, pending, "Waiting for related tasks");
                self.write_waiting_note(kind, &id, pending).await;
                last_count = Some(pending);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LcmError::timeout(TIMEOUT_RELATED_MESSAGE));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn count_related(
        &self,
        kind: ResourceKind,
        op_type: HaOpType,
        id: &HaOperationId,
    ) -> LcmResult<usize> {
        match id {
            HaOperationId::Service { op_id } => {
                let collection = Self::collection(kind);
                let me = self
                    .db
                    .get_required(collection, &Filter::by_id(op_id))
                    .await?;
                let ref_field = kind.instance_ref_field().unwrap_or("nsInstanceId");
                let Some(instance) = me.get(ref_field).and_then(Value::as_str) else {
                    return Ok(0);
                };
                let start = me.get("startTime").and_then(Value::as_f64).unwrap_or(0.0);
                let filter = Filter::new()
                    .eq(ref_field, instance)
                    .ne("_id", op_id.as_str())
                    .eq("operationState", OperationState::Processing.as_str())
                    .lt("startTime", start);
                Ok(self.db.get_list(collection, &filter).await?.len())
            }
            HaOperationId::Account { account_id, index } => {
                let Some(account) = self
                    .db
                    .get_one(kind.collection(), &Filter::by_id(account_id))
                    .await?
                else {
                    return Ok(0);
                };
                let operations = account
                    .pointer("/_admin/operations")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let is_processing = |op: &Value| {
                    op.get("operationState").and_then(Value::as_str)
                        == Some(OperationState::Processing.as_str())
                };

                if op_type == HaOpType::Any || index.is_none() {
                    return Ok(operations.iter().filter(|op| is_processing(op)).count());
                }
                let index = index.unwrap_or(0);
                let my_start = operations
                    .get(index)
                    .and_then(|op| op.get("startTime"))
                    .and_then(Value::as_f64)
                    .unwrap_or(f64::MAX);
                Ok(operations
                    .iter()
                    .enumerate()
                    .filter(|(i, op)| {
                        *i != index
                            && is_processing(op)
                            && op
                                .get("startTime")
                                .and_then(Value::as_f64)
                                .is_some_and(|start| start < my_start)
                    })
                    .count())
            }
        }
    }

    async fn write_waiting_note(&self, kind: ResourceKind, id: &HaOperationId, pending: usize) {
        let note = format!("Waiting for {pending} related tasks to be completed.");
        let (collection, doc_id, field) = match id {
            HaOperationId::Service { op_id } => {
                (Self::collection(kind), op_id.as_str(), "detailed-status".to_string())
            }
            HaOperationId::Account {
                account_id,
                index: Some(index),
            } => (
                kind.collection(),
                account_id.as_str(),
                format!("_admin.operations.{index}.detailed-status"),
            ),
            HaOperationId::Account { index: None, .. } => return,
        };
        let update = update_of([(field, note)]);
        if let Err(e) = self
            .db
            .set_one(collection, &Filter::by_id(doc_id), &update, false)
            .await
        {
            warn!(error = %e, "Cannot write waiting note");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_account_ids() {
        let id = HaOperationId::parse(ResourceKind::Vim, HaOpType::Edit, "vim-1:3").unwrap();
        assert_eq!(
            id,
            HaOperationId::Account {
                account_id: "vim-1".to_string(),
                index: Some(3)
            }
        );
        // create always claims slot 0
        let id = HaOperationId::parse(ResourceKind::Sdn, HaOpType::Create, "sdn:9").unwrap();
        assert_eq!(id.document_id(), "sdn");
        assert!(matches!(id, HaOperationId::Account { index: Some(0), .. }));
        // account ids may themselves contain colons
        let id = HaOperationId::parse(ResourceKind::Wim, HaOpType::Delete, "a:b:2").unwrap();
        assert_eq!(id.document_id(), "a:b");
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(HaOperationId::parse(ResourceKind::Vim, HaOpType::Edit, "vim-1").is_err());
        assert!(HaOperationId::parse(ResourceKind::Vim, HaOpType::Edit, "vim-1:x").is_err());
    }

    #[test]
    fn service_and_any_ids_are_verbatim() {
        let id = HaOperationId::parse(ResourceKind::Ns, HaOpType::Lifecycle, "op:1").unwrap();
        assert_eq!(id.document_id(), "op:1");
        let id = HaOperationId::parse(ResourceKind::Sdn, HaOpType::Any, "sdn-1").unwrap();
        assert!(matches!(id, HaOperationId::Account { index: None, .. }));
    }
}
