//! vmflow cloud building blocks
//!
//! Provider-neutral pieces shared by the vmflow reconcilers:
//!
//! - **Identifiers**: parsing and case-aware comparison of hierarchical
//!   resource paths
//! - **Locks**: a registry of per-name mutexes serialising mutations of the
//!   same logical resource
//! - **Operations**: polling long-running remote mutations under a deadline
//!   and cancellation signal
//! - **Errors**: the taxonomy every reconciliation failure maps onto
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  vmflow CLI / caller             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 vmflow-compute                   │
//! │  planner ─ orchestrator ─ connection resolver    │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                  vmflow-cloud                    │
//! │  identity │ lock │ operation │ error │ action    │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod error;
pub mod identity;
pub mod lock;
pub mod operation;

// Re-exports
pub use action::OperationKind;
pub use error::{CloudError, Result};
pub use identity::{
    NetworkInterfaceId, PublicIpAddressId, ResourceId, ResourceIdentity, ResourceKind,
    VirtualMachineExtensionId, VirtualMachineId,
};
pub use lock::{ResourceLockGuard, ResourceLocks};
pub use operation::{
    CancelHandle, CompletedOperation, LongRunningOperation, OperationContext, OperationStatus,
    PendingOperation, PollConfig, wait_for_completion,
};
