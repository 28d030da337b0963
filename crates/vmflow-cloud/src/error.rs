//! Error taxonomy shared by every vmflow crate

use crate::action::OperationKind;
use thiserror::Error;

/// Errors surfaced by identifier parsing, planning and reconciliation
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Malformed resource path {path:?}: {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists and must be imported: {0}")]
    AlreadyExists(String),

    #[error("{op} of {identity} failed: {source}")]
    RemoteOperationFailed {
        op: OperationKind,
        identity: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("API error{}: {message}", status_suffix(.status))]
    Api { status: Option<u16>, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CloudError::MalformedPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CloudError::InvalidConfiguration(message.into())
    }

    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        CloudError::Api {
            status,
            message: message.into(),
        }
    }

    /// Tag a collaborator failure with the operation and resource it hit.
    ///
    /// Cancellation passes through untouched so callers can still match on it.
    pub fn during(self, op: OperationKind, identity: impl ToString) -> Self {
        match self {
            CloudError::Cancelled(_) => self,
            other => CloudError::RemoteOperationFailed {
                op,
                identity: identity.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True for a plain `NotFound` and for a remote failure caused by one
    pub fn is_not_found(&self) -> bool {
        match self {
            CloudError::NotFound(_) => true,
            CloudError::Api {
                status: Some(404), ..
            } => true,
            CloudError::RemoteOperationFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CloudError::Cancelled(_))
    }

    /// The operation a remote failure was tagged with, if any
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            CloudError::RemoteOperationFailed { op, .. } => Some(*op),
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, CloudError>;
