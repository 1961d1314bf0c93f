//! # Registry Infrastructure
//!
//! In-process tracking of running lifecycle jobs and the cross-process HA
//! protocol that decides which orchestrator instance runs an operation.
//!
//! ## Architecture
//!
//! ```text
//! Registry Infrastructure
//! ├── TaskRegistry     (per-process jobs, cancellation, related-work lookup)
//! ├── HaCoordinator    (database-mediated lock and related-operation wait)
//! └── cancellation     (cooperative cancel tokens and job handles)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use osm_lcm::constants::ResourceKind;
//! use osm_lcm::registry::{job_pair, TaskRegistry};
//!
//! let registry = TaskRegistry::new();
//! let (handle, guard) = job_pair("ns_instantiate");
//! registry.register(ResourceKind::Ns, "nsr-1", "op-1", "ns_instantiate", handle);
//!
//! let (names, jobs) = registry.lookfor_related(ResourceKind::Ns, "nsr-1", None);
//! assert_eq!(names, "ns_instantiate");
//! assert_eq!(jobs.len(), 1);
//!
//! drop(guard);
//! registry.remove(ResourceKind::Ns, "nsr-1", "op-1", None);
//! assert!(registry.is_empty());
//! ```

pub mod cancellation;
pub mod ha_coordinator;
pub mod task_registry;

pub use cancellation::{job_pair, CancelToken, JobGuard, JobHandle};
pub use ha_coordinator::{HaCoordinator, HaOperationId, HaOpType};
pub use task_registry::TaskRegistry;
