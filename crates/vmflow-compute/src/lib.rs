//! Virtual machine reconciliation for vmflow
//!
//! Drives a virtual machine from a last-known configuration to a desired one
//! through remote collaborators:
//!
//! - [`planner`] diffs configurations into an [`UpdatePlan`]
//! - [`policy`] decides which changes need the machine powered off
//! - [`orchestrator`] applies a plan under the machine's named lock,
//!   powering it off and back on only when needed
//! - [`connection`] resolves the addresses a machine can be reached at
//! - [`extension`] manages extensions installed on a machine
//!
//! Remote access goes through the traits in [`client`]. The `test-utils`
//! feature adds [`testing::FakeCloud`], an in-memory implementation.
//!
//! # Example
//!
//! ```ignore
//! use vmflow_cloud::OperationContext;
//! use vmflow_compute::{ShutdownPolicy, VirtualMachineReconciler};
//!
//! let reconciler = VirtualMachineReconciler::new(subscription_id, compute, network)
//!     .with_policy(ShutdownPolicy::default());
//!
//! let ctx = OperationContext::with_timeout(Duration::from_secs(45 * 60));
//! let outcome = reconciler
//!     .reconcile_update(&id, &desired, &last_known, &ctx)
//!     .await?;
//! println!("power cycled: {}", outcome.restarted());
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod extension;
pub mod model;
pub mod orchestrator;
pub mod os;
pub mod planner;
pub mod policy;
mod request;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{ExtensionsClient, NetworkClient, VirtualMachinesClient};
pub use config::VirtualMachineConfig;
pub use connection::{ConnectionInfo, ConnectionResolver, ProvisionerKind};
pub use extension::{ExtensionReconciler, VirtualMachineExtensionConfig};
pub use orchestrator::{ReconcileStage, UpdateOutcome, VirtualMachineReconciler};
pub use os::{LinuxConfig, OsConfiguration, OsFamily, OsProfileSpec, WindowsConfig};
pub use planner::{Field, Planner, Section, UpdatePlan, plan};
pub use policy::{ShutdownFacts, ShutdownPolicy, ShutdownRule};
pub use state::{PowerState, RemoteState};
