//! Vocabulary for the remote operations a reconciliation issues

use serde::{Deserialize, Serialize};

/// Kind of remote call, used to tag failures and to trace progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Create (or overwrite) a resource
    Create,
    /// Read a resource
    Read,
    /// Partial update of an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// Stop the machine, optionally skipping the graceful shutdown
    PowerOff,
    /// Boot the machine
    Start,
    /// List the sizes the current placement can host
    ListSizes,
    /// Fetch runtime status codes
    InstanceView,
}

impl OperationKind {
    /// Mutating calls are never retried by the orchestrator
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Create
                | OperationKind::Update
                | OperationKind::Delete
                | OperationKind::PowerOff
                | OperationKind::Start
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Read => write!(f, "read"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::PowerOff => write!(f, "power-off"),
            OperationKind::Start => write!(f, "start"),
            OperationKind::ListSizes => write!(f, "list-sizes"),
            OperationKind::InstanceView => write!(f, "instance-view"),
        }
    }
}
