#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # OSM LCM
//!
//! Life-cycle management orchestrator for network-service deployments.
//!
//! ## Overview
//!
//! The orchestrator consumes `(topic, command, params)` commands from a
//! message bus and drives each one as a long-running job against external
//! collaborators: a resource orchestrator (RO) that provisions VIM-level
//! resources, a configuration-unit manager (VCA) that deploys charms and runs
//! their primitives, and a Kubernetes connector for cluster and helm
//! repository plumbing. State lives in a document store; every job writes its
//! progress there and publishes its outcome back on the bus.
//!
//! Several orchestrator processes may share one bus. The HA coordinator makes
//! sure exactly one of them executes each operation.
//!
//! ## Module Organization
//!
//! - [`errors`] - Error taxonomy for workflows and collaborators
//! - [`config`] - Layered configuration (defaults, file, environment)
//! - [`logging`] - Structured logging setup
//! - [`constants`] - Topics, collections, operation and resource states
//! - [`database`] - Document store contract with in-memory and PostgreSQL backends
//! - [`messaging`] - Message bus contract with in-memory and pgmq backends
//! - [`connectors`] - RO, VCA and K8s call contracts
//! - [`registry`] - In-process job registry and HA coordination
//! - [`orchestration`] - Event loop, command routing and lifecycle engines
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use osm_lcm::config::ConfigManager;
//! use osm_lcm::connectors::{K8sConnector, RoClient, VcaConnector};
//! use osm_lcm::orchestration::LcmCore;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     ro: Arc<dyn RoClient>,
//! #     vca: Arc<dyn VcaConnector>,
//! #     k8s: Arc<dyn K8sConnector>,
//! # ) -> osm_lcm::LcmResult<()> {
//! let manager = ConfigManager::load()?;
//! osm_lcm::logging::init_structured_logging(&manager.config().logging);
//!
//! let core = LcmCore::from_config(manager.config().clone(), ro, vca, k8s).await?;
//! core.run().await
//! # }
//! ```

pub mod config;
pub mod connectors;
pub mod constants;
pub mod database;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod registry;
pub mod utils;

pub use constants::{OperationState, ResourceKind};
pub use errors::{LcmError, LcmResult};
pub use orchestration::{LcmCore, SystemContext};
