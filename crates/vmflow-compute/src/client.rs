//! Remote collaborator traits
//!
//! The reconcilers never talk to the management API directly. They go
//! through these traits, which a transport layer (or the in-memory
//! `testing::FakeCloud`) implements. Mutating calls return a
//! [`PendingOperation`] that the caller polls to completion.

use crate::model::{
    InstanceView, NetworkInterface, PublicIpAddress, VirtualMachine, VirtualMachineExtension,
    VirtualMachineUpdate,
};
use async_trait::async_trait;
use vmflow_cloud::{
    NetworkInterfaceId, PendingOperation, PublicIpAddressId, Result, VirtualMachineExtensionId,
    VirtualMachineId,
};

/// Virtual machine operations
#[async_trait]
pub trait VirtualMachinesClient: Send + Sync {
    /// Fetch a machine; a missing one is a `NotFound` error
    async fn get(&self, id: &VirtualMachineId) -> Result<VirtualMachine>;

    async fn create_or_update(
        &self,
        id: &VirtualMachineId,
        machine: &VirtualMachine,
    ) -> Result<PendingOperation>;

    /// Apply a partial update
    async fn update(
        &self,
        id: &VirtualMachineId,
        update: &VirtualMachineUpdate,
    ) -> Result<PendingOperation>;

    async fn delete(&self, id: &VirtualMachineId) -> Result<PendingOperation>;

    /// Power off; with `skip_shutdown` the guest OS is not asked to shut down
    async fn power_off(
        &self,
        id: &VirtualMachineId,
        skip_shutdown: bool,
    ) -> Result<PendingOperation>;

    async fn start(&self, id: &VirtualMachineId) -> Result<PendingOperation>;

    /// Sizes the machine can be resized to without leaving its current host
    async fn list_available_sizes(&self, id: &VirtualMachineId) -> Result<Vec<String>>;

    async fn instance_view(&self, id: &VirtualMachineId) -> Result<InstanceView>;
}

/// Network lookups; absence is `Ok(None)` rather than an error
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn get_interface(&self, id: &NetworkInterfaceId) -> Result<Option<NetworkInterface>>;

    async fn get_public_ip(&self, id: &PublicIpAddressId) -> Result<Option<PublicIpAddress>>;
}

/// Virtual machine extension operations
#[async_trait]
pub trait ExtensionsClient: Send + Sync {
    /// Fetch an extension; a missing one is a `NotFound` error
    async fn get(&self, id: &VirtualMachineExtensionId) -> Result<VirtualMachineExtension>;

    async fn create_or_update(
        &self,
        id: &VirtualMachineExtensionId,
        extension: &VirtualMachineExtension,
    ) -> Result<PendingOperation>;

    async fn delete(&self, id: &VirtualMachineExtensionId) -> Result<PendingOperation>;
}
