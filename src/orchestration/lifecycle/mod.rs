//! # Lifecycle Engines
//!
//! Long-running workflows started by the dispatcher, one engine per
//! resource family:
//!
//! - [`NsLcm`]: NS instantiate, terminate, scale and action
//! - [`NetsliceLcm`]: netslice instantiate and terminate, fanning out to NS
//!   operations
//! - [`AccountLcm`]: create, edit and delete of VIM, WIM, SDN, K8s cluster and
//!   K8s repository accounts
//!
//! [`operation`] holds the guard, progress and finalization scaffolding the
//! engines share.

pub mod accounts;
pub mod netslice;
pub mod ns;
pub mod operation;

pub use accounts::AccountLcm;
pub use netslice::NetsliceLcm;
pub use ns::NsLcm;
