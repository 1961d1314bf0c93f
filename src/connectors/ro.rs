//! Resource orchestrator contract and status classification.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::errors::RoError;

pub type RoResult<T> = Result<T, RoError>;

/// Object kinds understood by the resource orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoItem {
    Vim,
    VimAccount,
    Sdn,
    Wim,
    WimAccount,
    Vnfd,
    Nsd,
    Ns,
}

impl RoItem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vim => "vim",
            Self::VimAccount => "vim_account",
            Self::Sdn => "sdn",
            Self::Wim => "wim",
            Self::WimAccount => "wim_account",
            Self::Vnfd => "vnfd",
            Self::Nsd => "nsd",
            Self::Ns => "ns",
        }
    }
}

impl fmt::Display for RoItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait RoClient: Send + Sync + fmt::Debug {
    /// Create an object; the answer carries its `uuid`
    async fn create(&self, item: RoItem, descriptor: Value) -> RoResult<Value>;

    async fn show(&self, item: RoItem, id: &str) -> RoResult<Value>;

    /// List objects whose fields equal those of `filter`
    async fn get_list(&self, item: RoItem, filter: Value) -> RoResult<Vec<Value>>;

    async fn edit(&self, item: RoItem, id: &str, descriptor: Value) -> RoResult<Value>;

    /// Delete an object. For `ns` the answer carries the `action_id` of the
    /// asynchronous teardown.
    async fn delete(&self, item: RoItem, id: &str) -> RoResult<Value>;

    /// Bind credentials to a VIM/WIM, creating the account
    async fn attach(&self, item: RoItem, id: &str, descriptor: Value) -> RoResult<Value>;

    async fn detach(&self, item: RoItem, id: &str) -> RoResult<Value>;

    /// Trigger an action (e.g. `vdu-scaling`) on an ns; the answer carries
    /// `instance_action_id`
    async fn create_action(&self, item: RoItem, id: &str, descriptor: Value) -> RoResult<Value>;

    /// Show one action of an ns
    async fn show_action(&self, ns_id: &str, action_id: &str) -> RoResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoStatus {
    Build,
    Active,
    Error,
}

impl fmt::Display for RoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Build => "BUILD",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
        })
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Classify an ns descriptor returned by `show(Ns, ..)`
pub fn check_ns_status(descriptor: &Value) -> (RoStatus, String) {
    let nets = items(descriptor, "nets");
    let mut nets_done = 0;
    for net in nets {
        match str_field(net, "status") {
            "ERROR" => {
                return (
                    RoStatus::Error,
                    format!(
                        "VIM network '{}': {}",
                        str_field(net, "vim_net_id"),
                        str_field(net, "error_msg")
                    ),
                )
            }
            "ACTIVE" => nets_done += 1,
            _ => {}
        }
    }

    let mut vms_total = 0;
    let mut vms_done = 0;
    for vnf in items(descriptor, "vnfs") {
        for vm in items(vnf, "vms") {
            vms_total += 1;
            match str_field(vm, "status") {
                "ERROR" => {
                    return (
                        RoStatus::Error,
                        format!(
                            "VIM VM '{}': {}",
                            str_field(vm, "vim_vm_id"),
                            str_field(vm, "error_msg")
                        ),
                    )
                }
                "ACTIVE" => vms_done += 1,
                _ => {}
            }
        }
    }

    let summary = format!(
        "VIM: networks {nets_done}/{}, VMs {vms_done}/{vms_total}",
        nets.len()
    );
    if nets_done == nets.len() && vms_done == vms_total {
        (RoStatus::Active, summary)
    } else {
        (RoStatus::Build, summary)
    }
}

/// Classify an action descriptor returned by `show_action`
pub fn check_action_status(descriptor: &Value) -> (RoStatus, String) {
    let actions = items(descriptor, "actions");
    let mut done = 0;
    for action in actions {
        match str_field(action, "status") {
            "ERROR" => {
                return (
                    RoStatus::Error,
                    format!(
                        "{} {}: {}",
                        str_field(action, "action"),
                        str_field(action, "item"),
                        str_field(action, "error_msg")
                    ),
                )
            }
            "DONE" | "SUPERSEDED" => done += 1,
            _ => {}
        }
    }
    if done == actions.len() {
        (RoStatus::Active, format!("{done}/{} tasks done", actions.len()))
    } else {
        (RoStatus::Build, format!("{done}/{} tasks done", actions.len()))
    }
}
