//! # Orchestration
//!
//! ## Architecture
//!
//! ```text
//! LcmCore
//! ├── read loop      bus -> CommandRouter -> spawned lifecycle jobs
//! ├── Heartbeat      admin ping / bus liveness
//! └── SystemContext  config, store, bus, collaborators, registry, HA
//!
//! lifecycle
//! ├── NsLcm          instantiate / terminate / scale / action
//! ├── NetsliceLcm    instantiate / terminate
//! └── AccountLcm     vim / wim / sdn / k8scluster / k8srepo
//! ```
//!
//! Every job is registered in the [`TaskRegistry`](crate::registry::TaskRegistry)
//! under `(kind, resource, operation)` before it starts and removes itself
//! when it ends, whatever the outcome.

pub mod command_router;
pub mod core;
pub mod heartbeat;
pub mod lifecycle;
pub mod system_context;

pub use command_router::{CommandRouter, Routing};
pub use self::core::LcmCore;
pub use heartbeat::{Heartbeat, Liveness};
pub use lifecycle::{AccountLcm, NetsliceLcm, NsLcm};
pub use system_context::SystemContext;
