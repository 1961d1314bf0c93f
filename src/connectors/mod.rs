//! # External Collaborators
//!
//! Call contracts for the systems the lifecycle engines drive. Concrete
//! transports live outside this crate; the engines only see these traits.
//!
//! - [`RoClient`]: resource orchestrator, provisions VIM-level resources
//! - [`VcaConnector`]: configuration units and their primitives
//! - [`K8sConnector`]: Kubernetes cluster and helm repository plumbing

pub mod k8s;
pub mod ro;
pub mod vca;

pub use k8s::K8sConnector;
pub use ro::{check_action_status, check_ns_status, RoClient, RoItem, RoStatus};
pub use vca::{DeployUnitRequest, PrimitiveStatus, UnitStatusEvent, VcaConnector};
