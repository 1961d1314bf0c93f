//! # System Constants
//!
//! Bus topics, command names, collection names and the state enums shared by
//! the registry, the HA coordinator and the lifecycle engines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus topics
pub mod topics {
    pub const ADMIN: &str = "admin";
    pub const NS: &str = "ns";
    pub const NSI: &str = "nsi";
    pub const VIM_ACCOUNT: &str = "vim_account";
    pub const WIM_ACCOUNT: &str = "wim_account";
    pub const SDN: &str = "sdn";
    pub const K8S_CLUSTER: &str = "k8scluster";
    pub const K8S_REPO: &str = "k8srepo";
}

/// Database collections
pub mod collections {
    pub const NSRS: &str = "nsrs";
    pub const NSLCMOPS: &str = "nslcmops";
    pub const NSIS: &str = "nsis";
    pub const NSILCMOPS: &str = "nsilcmops";
    pub const VNFRS: &str = "vnfrs";
    pub const VNFDS: &str = "vnfds";
    pub const NSDS: &str = "nsds";
    pub const VIM_ACCOUNTS: &str = "vim_accounts";
    pub const WIM_ACCOUNTS: &str = "wim_accounts";
    pub const SDNS: &str = "sdns";
    pub const K8S_CLUSTERS: &str = "k8sclusters";
    pub const K8S_REPOS: &str = "k8srepos";
}

/// Commands received and notifications published
pub mod commands {
    pub const INSTANTIATE: &str = "instantiate";
    pub const TERMINATE: &str = "terminate";
    pub const SCALE: &str = "scale";
    pub const ACTION: &str = "action";
    pub const CREATE: &str = "create";
    pub const EDIT: &str = "edit";
    pub const DELETE: &str = "delete";
    pub const PING: &str = "ping";
    pub const SHOW: &str = "show";

    pub const INSTANTIATED: &str = "instantiated";
    pub const TERMINATED: &str = "terminated";
    pub const SCALED: &str = "scaled";
    pub const ACTIONED: &str = "actioned";
    pub const CREATED: &str = "created";
    pub const EDITED: &str = "edited";
    pub const DELETED: &str = "deleted";
}

/// Kind of managed resource. Every registry key and HA slot is scoped by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ns,
    Nsi,
    Vim,
    Wim,
    Sdn,
    K8sCluster,
    K8sRepo,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        Self::Ns,
        Self::Nsi,
        Self::Vim,
        Self::Wim,
        Self::Sdn,
        Self::K8sCluster,
        Self::K8sRepo,
    ];

    pub fn topic(&self) -> &'static str {
        match self {
            Self::Ns => topics::NS,
            Self::Nsi => topics::NSI,
            Self::Vim => topics::VIM_ACCOUNT,
            Self::Wim => topics::WIM_ACCOUNT,
            Self::Sdn => topics::SDN,
            Self::K8sCluster => topics::K8S_CLUSTER,
            Self::K8sRepo => topics::K8S_REPO,
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == topic)
    }

    /// Collection holding the resource record
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Ns => collections::NSRS,
            Self::Nsi => collections::NSIS,
            Self::Vim => collections::VIM_ACCOUNTS,
            Self::Wim => collections::WIM_ACCOUNTS,
            Self::Sdn => collections::SDNS,
            Self::K8sCluster => collections::K8S_CLUSTERS,
            Self::K8sRepo => collections::K8S_REPOS,
        }
    }

    /// Operation-record collection, service kinds only
    pub fn operation_collection(&self) -> Option<&'static str> {
        match self {
            Self::Ns => Some(collections::NSLCMOPS),
            Self::Nsi => Some(collections::NSILCMOPS),
            _ => None,
        }
    }

    /// Field in the operation record pointing at the resource it targets
    pub fn instance_ref_field(&self) -> Option<&'static str> {
        match self {
            Self::Ns => Some("nsInstanceId"),
            Self::Nsi => Some("netsliceInstanceId"),
            _ => None,
        }
    }

    /// Service kinds address one operation per document
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Ns | Self::Nsi)
    }

    /// Account kinds keep an `_admin.operations` array on the resource record
    pub fn is_account(&self) -> bool {
        !self.is_service()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Terminal and non terminal states of an operation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Processing,
    Completed,
    PartiallyCompleted,
    FailedTemp,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::FailedTemp)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::PartiallyCompleted => "PARTIALLY_COMPLETED",
            Self::FailedTemp => "FAILED_TEMP",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "PARTIALLY_COMPLETED" => Ok(Self::PartiallyCompleted),
            "FAILED_TEMP" => Ok(Self::FailedTemp),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid operation state: {s}")),
        }
    }
}

/// `_admin.nsState` / `_admin.nsiState`
pub mod instance_state {
    pub const NOT_INSTANTIATED: &str = "NOT_INSTANTIATED";
    pub const INSTANTIATED: &str = "INSTANTIATED";
}

/// `_admin.operationalState` of account records
pub mod account_state {
    pub const PROCESSING: &str = "PROCESSING";
    pub const ENABLED: &str = "ENABLED";
    pub const ERROR: &str = "ERROR";
}
