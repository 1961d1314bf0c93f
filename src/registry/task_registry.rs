//! # Task Registry
//!
//! Jobs this process is running, keyed by resource and then by operation in
//! registration order: `(kind, resource_id) -> op_id -> name -> JobHandle`.
//!
//! The registry serves two purposes: cancelling in-flight work (a terminate
//! supersedes an instantiate on the same NS) and finding the jobs of the
//! operation registered just before the current one, which a new operation
//! waits for before touching external systems. Only the immediately
//! preceding operation is consulted; older buckets are not inspected.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::JobHandle;
use crate::constants::ResourceKind;

type OpBucket = IndexMap<String, JobHandle>;
type ResourceOps = IndexMap<String, OpBucket>;

#[derive(Debug, Default)]
pub struct TaskRegistry {
    resources: Mutex<HashMap<(ResourceKind, String), ResourceOps>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job; an existing job under the same name is replaced
    pub fn register(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        op_id: &str,
        name: &str,
        handle: JobHandle,
    ) {
        debug!(topic = %kind, resource_id, op_id, name, "Registering job");
        self.resources
            .lock()
            .entry((kind, resource_id.to_string()))
            .or_default()
            .entry(op_id.to_string())
            .or_default()
            .insert(name.to_string(), handle);
    }

    /// Remove one job, or the whole operation bucket when `name` is `None`,
    /// then prune every bucket of the resource whose jobs have all finished
    pub fn remove(&self, kind: ResourceKind, resource_id: &str, op_id: &str, name: Option<&str>) {
        let mut resources = self.resources.lock();
        let key = (kind, resource_id.to_string());
        let Some(ops) = resources.get_mut(&key) else {
            return;
        };
        if !ops.contains_key(op_id) {
            return;
        }

        match name {
            None => {
                ops.shift_remove(op_id);
            }
            Some(name) => {
                if let Some(bucket) = ops.get_mut(op_id) {
                    bucket.shift_remove(name);
                    if bucket.is_empty() {
                        ops.shift_remove(op_id);
                    }
                }
            }
        }

        ops.retain(|_, bucket| !bucket.values().all(JobHandle::is_finished));
        if ops.is_empty() {
            resources.remove(&key);
        }
    }

    /// Unfinished jobs of the operation registered immediately before
    /// `my_op_id` (or of the latest operation when `my_op_id` is `None`),
    /// with their names joined for status messages. When `my_op_id` is not
    /// registered nothing is returned.
    pub fn lookfor_related(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        my_op_id: Option<&str>,
    ) -> (String, Vec<JobHandle>) {
        let resources = self.resources.lock();
        let Some(ops) = resources.get(&(kind, resource_id.to_string())) else {
            return (String::new(), Vec::new());
        };

        let mut skip_until = my_op_id;
        for (op_id, bucket) in ops.iter().rev() {
            if let Some(mine) = skip_until {
                if mine == op_id {
                    skip_until = None;
                }
                continue;
            }
            let pending: Vec<JobHandle> = bucket
                .values()
                .filter(|job| !job.is_finished())
                .cloned()
                .collect();
            let names: Vec<&str> = pending.iter().map(JobHandle::name).collect();
            return (names.join(", "), pending);
        }
        (String::new(), Vec::new())
    }

    /// Request cancellation of matching jobs; returns how many were signalled
    pub fn cancel(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        target_op_id: Option<&str>,
        target_name: Option<&str>,
    ) -> usize {
        let resources = self.resources.lock();
        let Some(ops) = resources.get(&(kind, resource_id.to_string())) else {
            return 0;
        };
        let mut cancelled = 0;
        for (op_id, bucket) in ops.iter().rev() {
            if target_op_id.is_some_and(|target| target != op_id) {
                continue;
            }
            for (name, job) in bucket {
                if target_name.is_some_and(|target| target != name) {
                    continue;
                }
                debug!(topic = %kind, resource_id, op_id = %op_id, name = %name, "Cancelling job");
                job.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Wait for the operation registered before `my_op_id` (or the latest
    /// one when `None`). The wait is advisory: when `limit` expires the
    /// caller proceeds anyway.
    pub async fn wait_related(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        my_op_id: Option<&str>,
        limit: Duration,
    ) {
        let (names, jobs) = self.lookfor_related(kind, resource_id, my_op_id);
        if jobs.is_empty() {
            return;
        }
        debug!(topic = %kind, resource_id, waiting_for = %names, "Waiting for related jobs");
        let all = futures::future::join_all(jobs.iter().map(JobHandle::wait));
        if tokio::time::timeout(limit, all).await.is_err() {
            warn!(
                topic = %kind,
                resource_id,
                waiting_for = %names,
                "Timeout waiting for related jobs, proceeding"
            );
        }
    }

    pub fn contains(&self, kind: ResourceKind, resource_id: &str, op_id: &str) -> bool {
        self.resources
            .lock()
            .get(&(kind, resource_id.to_string()))
            .is_some_and(|ops| ops.contains_key(op_id))
    }

    /// Resource ids of a kind with registered jobs
    pub fn resources(&self, kind: ResourceKind) -> Vec<String> {
        self.resources
            .lock()
            .keys()
            .filter(|(registered, _)| *registered == kind)
            .map(|(_, resource_id)| resource_id.clone())
            .collect()
    }

    /// Operation ids registered for a resource, oldest first
    pub fn operations(&self, kind: ResourceKind, resource_id: &str) -> Vec<String> {
        self.resources
            .lock()
            .get(&(kind, resource_id.to_string()))
            .map(|ops| ops.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::job_pair;

    const NS: ResourceKind = ResourceKind::Ns;

    #[test]
    fn register_overwrites_same_name() {
        let registry = TaskRegistry::new();
        let (first, _g1) = job_pair("a");
        let (second, _g2) = job_pair("a");
        registry.register(NS, "r", "op", "a", first.clone());
        registry.register(NS, "r", "op", "a", second);
        assert_eq!(registry.cancel(NS, "r", None, None), 1);
        assert!(!first.is_cancelled());
    }

    #[test]
    fn remove_prunes_finished_siblings() {
        let registry = TaskRegistry::new();
        let (old, old_guard) = job_pair("old");
        let (live, _live_guard) = job_pair("live");
        let (mine, _mine_guard) = job_pair("mine");
        registry.register(NS, "r", "op1", "old", old);
        registry.register(NS, "r", "op2", "live", live);
        registry.register(NS, "r", "op3", "mine", mine);

        drop(old_guard);
        registry.remove(NS, "r", "op3", None);
        assert_eq!(registry.operations(NS, "r"), vec!["op2".to_string()]);
    }

    #[test]
    fn remove_single_name_keeps_bucket_with_others() {
        let registry = TaskRegistry::new();
        let (a, _ga) = job_pair("a");
        let (b, _gb) = job_pair("b");
        registry.register(NS, "r", "op", "a", a);
        registry.register(NS, "r", "op", "b", b);
        registry.remove(NS, "r", "op", Some("a"));
        assert!(registry.contains(NS, "r", "op"));
        registry.remove(NS, "r", "op", Some("b"));
        assert!(registry.is_empty());
    }

    #[test]
    fn related_is_the_immediately_preceding_operation() {
        let registry = TaskRegistry::new();
        let (a, _ga) = job_pair("a");
        let (b, _gb) = job_pair("b");
        let (c, _gc) = job_pair("c");
        registry.register(NS, "r", "A", "a", a);
        registry.register(NS, "r", "B", "b", b);
        registry.register(NS, "r", "C", "c", c);

        let (names, jobs) = registry.lookfor_related(NS, "r", Some("C"));
        assert_eq!(names, "b");
        assert_eq!(jobs.len(), 1);

        // Only the latest bucket is considered without an exclusion
        let (names, _) = registry.lookfor_related(NS, "r", None);
        assert_eq!(names, "c");

        // An operation that was never registered sees nothing
        let (names, jobs) = registry.lookfor_related(NS, "r", Some("Z"));
        assert!(names.is_empty() && jobs.is_empty());
    }

    #[test]
    fn older_running_operations_are_not_reported() {
        let registry = TaskRegistry::new();
        let (a, _ga) = job_pair("a");
        let (b, gb) = job_pair("b");
        let (c, _gc) = job_pair("c");
        registry.register(NS, "r", "A", "a", a);
        registry.register(NS, "r", "B", "b", b);
        registry.register(NS, "r", "C", "c", c);
        drop(gb);

        // B finished; A is still running but is not looked at
        let (names, jobs) = registry.lookfor_related(NS, "r", Some("C"));
        assert!(names.is_empty());
        assert!(jobs.is_empty());
    }

    #[test]
    fn cancel_filters_by_operation_and_name() {
        let registry = TaskRegistry::new();
        let (a, _ga) = job_pair("a");
        let (b, _gb) = job_pair("b");
        registry.register(NS, "r", "op1", "a", a.clone());
        registry.register(NS, "r", "op2", "b", b.clone());

        assert_eq!(registry.cancel(NS, "r", Some("op2"), Some("x")), 0);
        assert_eq!(registry.cancel(NS, "r", Some("op2"), None), 1);
        assert!(b.is_cancelled());
        assert!(!a.is_cancelled());
        assert_eq!(registry.cancel(NS, "other", None, None), 0);
    }

    #[tokio::test]
    async fn wait_related_gives_up_after_limit() {
        let registry = TaskRegistry::new();
        let (prev, _guard) = job_pair("prev");
        let (mine, _mine) = job_pair("mine");
        registry.register(NS, "r", "op1", "prev", prev);
        registry.register(NS, "r", "op2", "mine", mine);
        let started = std::time::Instant::now();
        registry
            .wait_related(NS, "r", Some("op2"), Duration::from_millis(20))
            .await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
