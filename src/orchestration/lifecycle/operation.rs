//! # Operation Scaffolding
//!
//! Every lifecycle workflow runs inside [`run_guarded`], which races the
//! workflow against the job's cancellation token and converts panics into
//! errors, so the finalization that follows always executes. Status that a
//! workflow accumulates lives in an [`OpProgress`] owned by the caller; when
//! the workflow future is dropped (cancelled or failed) the progress written
//! so far is still there to be persisted.

use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{error, warn};

use crate::constants::{OperationState, ResourceKind};
use crate::database::{DocumentStore, UpdateMap};
use crate::errors::{LcmError, LcmResult};
use crate::logging::log_operation;
use crate::orchestration::SystemContext;
use crate::registry::{CancelToken, HaOpType};
use crate::utils::time::epoch_seconds;

/// Run a workflow until it completes, its token is cancelled or it panics
pub async fn run_guarded<F, T>(token: &CancelToken, work: F) -> LcmResult<T>
where
    F: Future<Output = LcmResult<T>>,
{
    let work = AssertUnwindSafe(work).catch_unwind();
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LcmError::Cancelled),
        outcome = work => match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Workflow panicked");
                Err(LcmError::internal(message))
            }
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Status accumulated by one operation run
#[derive(Debug, Default)]
pub struct OpProgress {
    /// Label of the step in progress; failures are reported against it
    pub step: String,
    pub resource_update: UpdateMap,
    pub op_update: UpdateMap,
    /// Terminal state, once decided
    pub state: Option<OperationState>,
    /// Set once the resource record was read, so the finalizer may write it
    pub resource_loaded: bool,
    pub op_loaded: bool,
}

impl OpProgress {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            ..Self::default()
        }
    }

    pub fn step(&mut self, step: impl Into<String>) {
        self.step = step.into();
    }

    /// Set the step and mirror it into both records' `detailed-status`
    pub fn step_with_status(&mut self, step: impl Into<String>) {
        self.step = step.into();
        self.resource_update
            .insert("detailed-status".into(), json!(self.step));
        self.op_update
            .insert("detailed-status".into(), json!(self.step));
    }

    pub fn set_resource(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.resource_update.insert(key.into(), value.into());
    }

    pub fn set_op(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.op_update.insert(key.into(), value.into());
    }

    /// Decide the terminal state of the operation record
    pub fn finish(&mut self, state: OperationState, detailed_status: impl Into<String>) {
        self.state = Some(state);
        self.op_update
            .insert("operationState".into(), json!(state.as_str()));
        self.op_update
            .insert("detailed-status".into(), json!(detailed_status.into()));
        self.op_update
            .insert("statusEnteredTime".into(), json!(epoch_seconds()));
    }

    /// `FAILED <step>: <error>`, the operation-record form of a failure
    pub fn failure_detail(&self, err: &LcmError) -> String {
        format!("FAILED {}: {}", self.step, err)
    }

    /// `ERROR <step>: <error>`, the resource-record form of a failure
    pub fn error_detail(&self, err: &LcmError) -> String {
        format!("ERROR {}: {}", self.step, err)
    }

    /// Mark the operation FAILED against the current step, if it was loaded
    pub fn fail(&mut self, err: &LcmError) {
        if self.op_loaded {
            let detail = self.failure_detail(err);
            self.finish(OperationState::Failed, detail);
        }
    }
}

/// Write a non-empty update to a record by id
pub async fn persist(
    db: &dyn DocumentStore,
    collection: &str,
    id: &str,
    update: &UpdateMap,
) -> LcmResult<()> {
    if update.is_empty() {
        return Ok(());
    }
    db.set_by_id(collection, id, update).await?;
    Ok(())
}

/// [`persist`] for finalizers, where a database failure is logged and dropped
pub async fn persist_best_effort(
    db: &dyn DocumentStore,
    collection: &str,
    id: &str,
    update: &UpdateMap,
) {
    if let Err(e) = persist(db, collection, id, update).await {
        error!(collection, id, error = %e, "Cannot update database");
    }
}

/// Claim an operation through the HA lock. Lock failures are logged and
/// treated as "not mine".
pub async fn claim(
    ctx: &SystemContext,
    kind: ResourceKind,
    op_type: HaOpType,
    op_id: Option<&str>,
) -> bool {
    match ctx.ha.lock_ha(kind, op_type, op_id).await {
        Ok(true) => true,
        Ok(false) => {
            tracing::debug!(topic = %kind, op_id, "Operation owned by another worker");
            false
        }
        Err(e) => {
            error!(topic = %kind, op_id, error = %e, "Cannot lock operation");
            false
        }
    }
}

/// Identity of an NS or netslice operation
#[derive(Debug, Clone, Copy)]
pub struct ServiceOperation<'a> {
    pub kind: ResourceKind,
    pub resource_id: &'a str,
    pub op_id: &'a str,
    /// Past-tense command published on completion
    pub verb: &'a str,
}

impl ServiceOperation<'_> {
    fn admin_pointer(&self) -> &'static str {
        match self.kind {
            ResourceKind::Nsi => "_admin.nsilcmop",
            _ => "_admin.nslcmop",
        }
    }

    fn notification_keys(&self) -> (&'static str, &'static str) {
        match self.kind {
            ResourceKind::Nsi => ("nsir_id", "nsilcmop_id"),
            _ => ("nsr_id", "nslcmop_id"),
        }
    }
}

/// Persist both records, publish the result when a terminal state was
/// reached and deregister the job. Never fails.
pub async fn finalize_service(
    ctx: &SystemContext,
    op: ServiceOperation<'_>,
    progress: &mut OpProgress,
    extra: Map<String, Value>,
) {
    let op_collection = op.kind.operation_collection().unwrap_or_default();
    if progress.op_loaded {
        persist_best_effort(ctx.db.as_ref(), op_collection, op.op_id, &progress.op_update)
            .await;
    }
    if progress.resource_loaded {
        progress
            .resource_update
            .insert(op.admin_pointer().to_string(), Value::Null);
        persist_best_effort(
            ctx.db.as_ref(),
            op.kind.collection(),
            op.resource_id,
            &progress.resource_update,
        )
        .await;
    }

    if let Some(state) = progress.state {
        let (resource_key, op_key) = op.notification_keys();
        let mut params = Map::new();
        params.insert(resource_key.into(), json!(op.resource_id));
        params.insert(op_key.into(), json!(op.op_id));
        params.insert("operationState".into(), json!(state.as_str()));
        params.extend(extra);
        if let Err(e) = ctx
            .bus
            .publish(op.kind.topic(), op.verb, Value::Object(params))
            .await
        {
            warn!(topic = %op.kind, op_id = op.op_id, error = %e, "Cannot publish result");
        }
        let detail = progress
            .op_update
            .get("detailed-status")
            .and_then(Value::as_str);
        log_operation(
            op.kind,
            op.verb,
            op.resource_id,
            Some(op.op_id),
            state,
            detail,
        );
    }

    ctx.tasks.remove(op.kind, op.resource_id, op.op_id, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::job_pair;
    use std::time::Duration;

    #[tokio::test]
    async fn completed_work_passes_through() {
        let token = CancelToken::new();
        let result = run_guarded(&token, async { Ok::<_, LcmError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_work() {
        let (handle, guard) = job_pair("job");
        let token = guard.token();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let result: LcmResult<()> = run_guarded(&token, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(LcmError::Cancelled));
        canceller.await.ok();
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let token = CancelToken::new();
        let result: LcmResult<()> = run_guarded(&token, async { panic!("boom") }).await;
        assert_eq!(result, Err(LcmError::internal("boom")));
    }

    #[tokio::test]
    async fn progress_survives_dropped_workflow() {
        let token = CancelToken::new();
        token.cancel();
        let mut progress = OpProgress::new("start");
        let result: LcmResult<()> = run_guarded(&token, async {
            progress.step("never reached");
            Ok(())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(progress.step, "start");
    }

    #[test]
    fn failure_messages_name_the_step() {
        let mut progress = OpProgress::new("Deploying ns at VIM");
        progress.op_loaded = true;
        let err = LcmError::domain("quota exceeded");
        assert_eq!(progress.error_detail(&err), "ERROR Deploying ns at VIM: quota exceeded");
        progress.fail(&err);
        assert_eq!(progress.state, Some(OperationState::Failed));
        assert_eq!(
            progress.op_update["detailed-status"],
            json!("FAILED Deploying ns at VIM: quota exceeded")
        );
    }
}
