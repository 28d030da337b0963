//! In-memory collaborators for tests
//!
//! [`FakeCloud`] implements every client trait against a shared in-memory
//! state and records each call it receives, in order. Failures, latency,
//! power state and available sizes are configurable per test.

use crate::client::{ExtensionsClient, NetworkClient, VirtualMachinesClient};
use crate::config::VirtualMachineConfig;
use crate::model::{
    InstanceView, InstanceViewStatus, NetworkInterface, PublicIpAddress, PublicIpAddressProperties,
    VirtualMachine, VirtualMachineExtension, VirtualMachineUpdate,
};
use crate::planner::Section;
use crate::state::PowerState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use vmflow_cloud::{
    CloudError, LongRunningOperation, NetworkInterfaceId, OperationStatus, PendingOperation,
    PublicIpAddressId, Result, VirtualMachineExtensionId, VirtualMachineId,
};

/// Kind of a recorded call, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Get,
    CreateOrUpdate,
    Update,
    Delete,
    PowerOff,
    Start,
    ListSizes,
    InstanceView,
    GetInterface,
    GetPublicIp,
    GetExtension,
    CreateOrUpdateExtension,
    DeleteExtension,
}

/// One call received by the fake, with the resource name it targeted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Get(String),
    CreateOrUpdate(String),
    Update { name: String, sections: Vec<Section> },
    Delete(String),
    PowerOff { name: String, skip_shutdown: bool },
    Start(String),
    ListSizes(String),
    InstanceView(String),
    GetInterface(String),
    GetPublicIp(String),
    GetExtension(String),
    CreateOrUpdateExtension(String),
    DeleteExtension(String),
}

impl RemoteCall {
    pub fn kind(&self) -> CallKind {
        match self {
            RemoteCall::Get(_) => CallKind::Get,
            RemoteCall::CreateOrUpdate(_) => CallKind::CreateOrUpdate,
            RemoteCall::Update { .. } => CallKind::Update,
            RemoteCall::Delete(_) => CallKind::Delete,
            RemoteCall::PowerOff { .. } => CallKind::PowerOff,
            RemoteCall::Start(_) => CallKind::Start,
            RemoteCall::ListSizes(_) => CallKind::ListSizes,
            RemoteCall::InstanceView(_) => CallKind::InstanceView,
            RemoteCall::GetInterface(_) => CallKind::GetInterface,
            RemoteCall::GetPublicIp(_) => CallKind::GetPublicIp,
            RemoteCall::GetExtension(_) => CallKind::GetExtension,
            RemoteCall::CreateOrUpdateExtension(_) => CallKind::CreateOrUpdateExtension,
            RemoteCall::DeleteExtension(_) => CallKind::DeleteExtension,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RemoteCall::Get(name)
            | RemoteCall::CreateOrUpdate(name)
            | RemoteCall::Update { name, .. }
            | RemoteCall::Delete(name)
            | RemoteCall::PowerOff { name, .. }
            | RemoteCall::Start(name)
            | RemoteCall::ListSizes(name)
            | RemoteCall::InstanceView(name)
            | RemoteCall::GetInterface(name)
            | RemoteCall::GetPublicIp(name)
            | RemoteCall::GetExtension(name)
            | RemoteCall::CreateOrUpdateExtension(name)
            | RemoteCall::DeleteExtension(name) => name,
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self.kind(),
            CallKind::CreateOrUpdate
                | CallKind::Update
                | CallKind::Delete
                | CallKind::PowerOff
                | CallKind::Start
                | CallKind::CreateOrUpdateExtension
                | CallKind::DeleteExtension
        )
    }
}

#[derive(Debug, Clone)]
enum Failure {
    /// The call itself is rejected
    Request { status: Option<u16>, message: String },
    /// The call is accepted but its operation ends in `Failed`
    Completion(String),
}

#[derive(Default)]
struct FakeState {
    machines: HashMap<String, VirtualMachine>,
    power: HashMap<String, PowerState>,
    hide_power_state: bool,
    sizes: Vec<String>,
    interfaces: HashMap<String, NetworkInterface>,
    public_ips: HashMap<String, PublicIpAddress>,
    extensions: HashMap<String, VirtualMachineExtension>,
    failures: HashMap<CallKind, Failure>,
    calls: Vec<RemoteCall>,
    latency: Duration,
    polls_to_complete: u32,
}

/// Shared in-memory cloud implementing every client trait
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn extension_key(id: &VirtualMachineExtensionId) -> String {
    key(&format!("{}/{}", id.virtual_machine_name(), id.name()))
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // a panicking test must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `config` as an existing machine with the given power state
    pub fn with_machine(&self, id: &VirtualMachineId, config: &VirtualMachineConfig, power: PowerState) {
        let mut machine = config.to_create_request();
        machine.id = Some(id.to_string());
        self.insert_machine(id, machine, power);
    }

    pub fn insert_machine(&self, id: &VirtualMachineId, machine: VirtualMachine, power: PowerState) {
        let mut state = self.state();
        state.machines.insert(key(id.name()), machine);
        state.power.insert(key(id.name()), power);
    }

    pub fn machine(&self, name: &str) -> Option<VirtualMachine> {
        self.state().machines.get(&key(name)).cloned()
    }

    pub fn set_power_state(&self, name: &str, power: PowerState) {
        self.state().power.insert(key(name), power);
    }

    pub fn power_state(&self, name: &str) -> Option<PowerState> {
        self.state().power.get(&key(name)).copied()
    }

    /// Report no `PowerState/...` status in instance views
    pub fn hide_power_state(&self) {
        self.state().hide_power_state = true;
    }

    pub fn set_available_sizes<S: AsRef<str>>(&self, sizes: impl IntoIterator<Item = S>) {
        self.state().sizes = sizes.into_iter().map(|s| s.as_ref().to_string()).collect();
    }

    pub fn insert_interface(&self, nic: NetworkInterface) {
        let name = nic.name.clone().unwrap_or_default();
        self.state().interfaces.insert(key(&name), nic);
    }

    /// Store a public IP; `None` models a dynamic address not yet allocated
    pub fn insert_public_ip(&self, id: &PublicIpAddressId, address: Option<&str>) {
        let ip = PublicIpAddress {
            id: Some(id.to_string()),
            name: Some(id.name().to_string()),
            properties: Some(PublicIpAddressProperties {
                ip_address: address.map(str::to_string),
                allocation_method: Some(if address.is_some() { "Static" } else { "Dynamic" }.to_string()),
            }),
        };
        self.state().public_ips.insert(key(id.name()), ip);
    }

    pub fn extension(&self, id: &VirtualMachineExtensionId) -> Option<VirtualMachineExtension> {
        self.state().extensions.get(&extension_key(id)).cloned()
    }

    /// Delay every call by `latency` after it is recorded
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Number of in-progress polls before an operation completes
    pub fn set_polls_to_complete(&self, polls: u32) {
        self.state().polls_to_complete = polls;
    }

    /// Reject every call of `kind` with an API error
    pub fn fail_on(&self, kind: CallKind, status: Option<u16>, message: &str) {
        self.state().failures.insert(
            kind,
            Failure::Request {
                status,
                message: message.to_string(),
            },
        );
    }

    /// Accept calls of `kind` but let their operations fail
    pub fn fail_on_completion(&self, kind: CallKind, message: &str) {
        self.state()
            .failures
            .insert(kind, Failure::Completion(message.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(RemoteCall::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Record a call, wait out the latency, and apply any injected request
    /// failure. Returns the completion failure to report, if any.
    async fn enter(&self, call: RemoteCall) -> Result<Option<String>> {
        let kind = call.kind();
        let (latency, failure) = {
            let mut state = self.state();
            state.calls.push(call);
            (state.latency, state.failures.get(&kind).cloned())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(Failure::Request { status, message }) => Err(CloudError::api(status, message)),
            Some(Failure::Completion(message)) => Ok(Some(message)),
            None => Ok(None),
        }
    }

    fn operation(&self, failure: Option<String>) -> PendingOperation {
        let remaining = self.state().polls_to_complete;
        let outcome = match failure {
            Some(message) => OperationStatus::Failed(message),
            None => OperationStatus::Succeeded,
        };
        Box::new(FakeOperation { remaining, outcome })
    }

    fn require_machine(&self, id: &VirtualMachineId) -> Result<()> {
        if self.state().machines.contains_key(&key(id.name())) {
            Ok(())
        } else {
            Err(CloudError::NotFound(id.to_string()))
        }
    }

    /// Run `apply` against the state unless the operation is due to fail
    fn mutate(&self, failure: Option<String>, apply: impl FnOnce(&mut FakeState)) -> PendingOperation {
        if failure.is_none() {
            apply(&mut *self.state());
        }
        self.operation(failure)
    }
}

struct FakeOperation {
    remaining: u32,
    outcome: OperationStatus,
}

#[async_trait]
impl LongRunningOperation for FakeOperation {
    async fn poll(&mut self) -> Result<OperationStatus> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(OperationStatus::InProgress);
        }
        Ok(self.outcome.clone())
    }
}

fn merge_update(machine: &mut VirtualMachine, update: &VirtualMachineUpdate) {
    if let Some(tags) = &update.tags {
        machine.tags = tags.clone();
    }
    if let Some(identity) = &update.identity {
        machine.identity = Some(identity.clone());
    }
    let patch = &update.properties;
    let props = machine.properties.get_or_insert_with(Default::default);
    if let Some(hardware) = &patch.hardware_profile {
        props.hardware_profile = Some(hardware.clone());
    }
    if let Some(network) = &patch.network_profile {
        props.network_profile = Some(network.clone());
    }
    if let Some(storage) = &patch.storage_profile {
        let current = props.storage_profile.get_or_insert_with(Default::default);
        if let Some(os_disk) = &storage.os_disk {
            current.os_disk = Some(os_disk.clone());
        }
    }
    if let Some(diagnostics) = &patch.diagnostics_profile {
        props.diagnostics_profile = Some(diagnostics.clone());
    }
    if let Some(billing) = &patch.billing_profile {
        props.billing_profile = Some(billing.clone());
    }
    if let Some(capabilities) = &patch.additional_capabilities {
        props.additional_capabilities = Some(capabilities.clone());
    }
    if let Some(os) = &patch.os_profile {
        let current = props.os_profile.get_or_insert_with(Default::default);
        if os.custom_data.is_some() {
            current.custom_data = os.custom_data.clone();
        }
        if os.secrets.is_some() {
            current.secrets = os.secrets.clone();
        }
        if let Some(linux) = &os.linux_configuration {
            let target = current.linux_configuration.get_or_insert_with(Default::default);
            if linux.ssh.is_some() {
                target.ssh = linux.ssh.clone();
            }
            if linux.disable_password_authentication.is_some() {
                target.disable_password_authentication = linux.disable_password_authentication;
            }
        }
        if let Some(windows) = &os.windows_configuration {
            let target = current.windows_configuration.get_or_insert_with(Default::default);
            if windows.enable_automatic_updates.is_some() {
                target.enable_automatic_updates = windows.enable_automatic_updates;
            }
            if windows.time_zone.is_some() {
                target.time_zone = windows.time_zone.clone();
            }
        }
    }
}

#[async_trait]
impl VirtualMachinesClient for FakeCloud {
    async fn get(&self, id: &VirtualMachineId) -> Result<VirtualMachine> {
        self.enter(RemoteCall::Get(id.name().to_string())).await?;
        self.state()
            .machines
            .get(&key(id.name()))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(id.to_string()))
    }

    async fn create_or_update(
        &self,
        id: &VirtualMachineId,
        machine: &VirtualMachine,
    ) -> Result<PendingOperation> {
        let failure = self
            .enter(RemoteCall::CreateOrUpdate(id.name().to_string()))
            .await?;
        let mut stored = machine.clone();
        stored.id = Some(id.to_string());
        Ok(self.mutate(failure, |state| {
            state.machines.insert(key(id.name()), stored);
            state.power.insert(key(id.name()), PowerState::Running);
        }))
    }

    async fn update(
        &self,
        id: &VirtualMachineId,
        update: &VirtualMachineUpdate,
    ) -> Result<PendingOperation> {
        let failure = self
            .enter(RemoteCall::Update {
                name: id.name().to_string(),
                sections: update.sections(),
            })
            .await?;
        self.require_machine(id)?;
        Ok(self.mutate(failure, |state| {
            if let Some(machine) = state.machines.get_mut(&key(id.name())) {
                merge_update(machine, update);
            }
        }))
    }

    async fn delete(&self, id: &VirtualMachineId) -> Result<PendingOperation> {
        let failure = self.enter(RemoteCall::Delete(id.name().to_string())).await?;
        self.require_machine(id)?;
        Ok(self.mutate(failure, |state| {
            state.machines.remove(&key(id.name()));
            state.power.remove(&key(id.name()));
        }))
    }

    async fn power_off(
        &self,
        id: &VirtualMachineId,
        skip_shutdown: bool,
    ) -> Result<PendingOperation> {
        let failure = self
            .enter(RemoteCall::PowerOff {
                name: id.name().to_string(),
                skip_shutdown,
            })
            .await?;
        self.require_machine(id)?;
        Ok(self.mutate(failure, |state| {
            state.power.insert(key(id.name()), PowerState::Stopped);
        }))
    }

    async fn start(&self, id: &VirtualMachineId) -> Result<PendingOperation> {
        let failure = self.enter(RemoteCall::Start(id.name().to_string())).await?;
        self.require_machine(id)?;
        Ok(self.mutate(failure, |state| {
            state.power.insert(key(id.name()), PowerState::Running);
        }))
    }

    async fn list_available_sizes(&self, id: &VirtualMachineId) -> Result<Vec<String>> {
        self.enter(RemoteCall::ListSizes(id.name().to_string())).await?;
        self.require_machine(id)?;
        Ok(self.state().sizes.clone())
    }

    async fn instance_view(&self, id: &VirtualMachineId) -> Result<InstanceView> {
        self.enter(RemoteCall::InstanceView(id.name().to_string()))
            .await?;
        let state = self.state();
        let power = state
            .power
            .get(&key(id.name()))
            .copied()
            .ok_or_else(|| CloudError::NotFound(id.to_string()))?;
        if state.hide_power_state {
            return Ok(InstanceView {
                statuses: vec![InstanceViewStatus::new("ProvisioningState/succeeded")],
            });
        }
        Ok(InstanceView::with_power_state(power))
    }
}

#[async_trait]
impl NetworkClient for FakeCloud {
    async fn get_interface(&self, id: &NetworkInterfaceId) -> Result<Option<NetworkInterface>> {
        self.enter(RemoteCall::GetInterface(id.name().to_string()))
            .await?;
        Ok(self.state().interfaces.get(&key(id.name())).cloned())
    }

    async fn get_public_ip(&self, id: &PublicIpAddressId) -> Result<Option<PublicIpAddress>> {
        self.enter(RemoteCall::GetPublicIp(id.name().to_string()))
            .await?;
        Ok(self.state().public_ips.get(&key(id.name())).cloned())
    }
}

#[async_trait]
impl ExtensionsClient for FakeCloud {
    async fn get(&self, id: &VirtualMachineExtensionId) -> Result<VirtualMachineExtension> {
        self.enter(RemoteCall::GetExtension(id.name().to_string()))
            .await?;
        self.state()
            .extensions
            .get(&extension_key(id))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(id.to_string()))
    }

    async fn create_or_update(
        &self,
        id: &VirtualMachineExtensionId,
        extension: &VirtualMachineExtension,
    ) -> Result<PendingOperation> {
        let failure = self
            .enter(RemoteCall::CreateOrUpdateExtension(id.name().to_string()))
            .await?;
        let mut stored = extension.clone();
        stored.id = Some(id.to_string());
        if let Some(props) = stored.properties.as_mut() {
            props.protected_settings = None;
            props.provisioning_state = Some("Succeeded".to_string());
        }
        Ok(self.mutate(failure, |state| {
            state.extensions.insert(extension_key(id), stored);
        }))
    }

    async fn delete(&self, id: &VirtualMachineExtensionId) -> Result<PendingOperation> {
        let failure = self
            .enter(RemoteCall::DeleteExtension(id.name().to_string()))
            .await?;
        Ok(self.mutate(failure, |state| {
            state.extensions.remove(&extension_key(id));
        }))
    }
}
