//! Power-state-aware reconciliation of virtual machines
//!
//! Every mutation of a machine runs under the machine's named lock. An
//! update walks a fixed sequence of stages:
//!
//! ```text
//! Locked → Inspecting → [Shutdown] → [Updating] → [Restart] → Done
//! ```
//!
//! Shutdown happens only when a changed field's shutdown rule applies and
//! the machine is not already stopped; restart happens only after a
//! shutdown this reconciler performed. Any failure ends the sequence, is
//! tagged with the operation it hit, and releases the lock.

use crate::client::{NetworkClient, VirtualMachinesClient};
use crate::config::VirtualMachineConfig;
use crate::connection::{ConnectionInfo, ConnectionResolver};
use crate::model::VirtualMachine;
use crate::os::OsFamily;
use crate::planner::{Field, Planner, UpdatePlan};
use crate::policy::{ShutdownFacts, ShutdownPolicy};
use crate::state::{PowerState, RemoteState};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use vmflow_cloud::{
    CloudError, OperationContext, OperationKind, PendingOperation, PollConfig, ResourceLocks,
    Result, VirtualMachineId, wait_for_completion,
};

/// Stage of an update, in the order they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStage {
    Locked,
    Inspecting,
    Shutdown,
    Updating,
    Restart,
    Done,
}

impl std::fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReconcileStage::Locked => "locked",
            ReconcileStage::Inspecting => "inspecting",
            ReconcileStage::Shutdown => "shutdown",
            ReconcileStage::Updating => "updating",
            ReconcileStage::Restart => "restart",
            ReconcileStage::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// What a successful update did
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    /// Read back after the lock was released
    pub state: RemoteState,
    pub plan: UpdatePlan,
    /// Power state observed before anything was changed
    pub previous_power_state: PowerState,
    /// Changed fields whose shutdown rule applied
    pub shutdown_fields: Vec<Field>,
    pub stages: Vec<ReconcileStage>,
}

impl UpdateOutcome {
    pub fn powered_off(&self) -> bool {
        self.stages.contains(&ReconcileStage::Shutdown)
    }

    pub fn updated(&self) -> bool {
        self.stages.contains(&ReconcileStage::Updating)
    }

    pub fn restarted(&self) -> bool {
        self.stages.contains(&ReconcileStage::Restart)
    }
}

/// Start a remote mutation and poll it to completion. Failures are tagged
/// with `op` and `identity`; cancellation passes through untagged.
pub(crate) async fn await_operation<F>(
    op: OperationKind,
    identity: &str,
    ctx: &OperationContext,
    poll: &PollConfig,
    start: F,
) -> Result<()>
where
    F: Future<Output = Result<PendingOperation>> + Send,
{
    let what = format!("{op} of {identity}");
    let mut pending = ctx
        .run(&what, start)
        .await?
        .map_err(|e| e.during(op, identity))?;
    wait_for_completion(pending.as_mut(), ctx, poll, &what)
        .await
        .map_err(|e| e.during(op, identity))?;
    tracing::debug!(op = %op, resource = identity, "Operation completed");
    Ok(())
}

/// Reconciles virtual machines against desired configurations
#[derive(Clone)]
pub struct VirtualMachineReconciler {
    subscription_id: String,
    compute: Arc<dyn VirtualMachinesClient>,
    resolver: ConnectionResolver,
    locks: Arc<ResourceLocks>,
    planner: Planner,
    poll: PollConfig,
    require_import: bool,
}

impl VirtualMachineReconciler {
    pub fn new(
        subscription_id: impl Into<String>,
        compute: Arc<dyn VirtualMachinesClient>,
        network: Arc<dyn NetworkClient>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            compute,
            resolver: ConnectionResolver::new(network),
            locks: Arc::new(ResourceLocks::new()),
            planner: Planner::default(),
            poll: PollConfig::default(),
            require_import: true,
        }
    }

    /// Share a lock registry with other reconcilers touching the same machines
    pub fn with_locks(mut self, locks: Arc<ResourceLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.planner = Planner::new(policy);
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_require_import(mut self, require_import: bool) -> Self {
        self.require_import = require_import;
        self
    }

    pub fn locks(&self) -> &Arc<ResourceLocks> {
        &self.locks
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    pub fn requires_import(&self) -> bool {
        self.require_import
    }

    /// Identifier the machine described by `config` gets
    pub fn id_for(&self, config: &VirtualMachineConfig) -> Result<VirtualMachineId> {
        VirtualMachineId::new(&self.subscription_id, &config.resource_group, &config.name)
    }

    /// Create a machine and read it back
    pub async fn reconcile_create(
        &self,
        desired: &VirtualMachineConfig,
        ctx: &OperationContext,
    ) -> Result<RemoteState> {
        desired.validate_for_create()?;
        let id = self.id_for(desired)?;
        let key = id.lock_key();

        let mut lock = self.locks.acquire_within(&key, ctx).await?;

        if self.require_import {
            match self.get(&id, ctx).await {
                Ok(_) => return Err(CloudError::AlreadyExists(id.to_string())),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(resource = %id, size = %desired.size, "Creating virtual machine");
        let request = desired.to_create_request();
        self.await_operation(
            OperationKind::Create,
            &id,
            ctx,
            self.compute.create_or_update(&id, &request),
        )
        .await?;

        lock.release();
        self.read_existing(&id, ctx).await
    }

    /// Current remote state, or `None` when the machine does not exist
    pub async fn read(
        &self,
        id: &VirtualMachineId,
        ctx: &OperationContext,
    ) -> Result<Option<RemoteState>> {
        let machine = match self.get(id, ctx).await {
            Ok(machine) => machine,
            Err(e) if e.is_not_found() => {
                tracing::debug!(resource = %id, "Virtual machine not found");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let power_state = match self.power_state(id, ctx).await {
            Ok(state) => state,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let connection = self.resolve_connection_info(&machine, ctx).await;

        Ok(Some(RemoteState {
            id: id.clone(),
            machine,
            power_state,
            connection,
        }))
    }

    /// Bring an existing machine in line with `desired`
    pub async fn reconcile_update(
        &self,
        id: &VirtualMachineId,
        desired: &VirtualMachineConfig,
        last_known: &VirtualMachineConfig,
        ctx: &OperationContext,
    ) -> Result<UpdateOutcome> {
        let plan = self.planner.plan(desired, last_known)?;
        if plan.has_replacements() {
            let fields: Vec<_> = plan.replacements.iter().map(Field::name).collect();
            return Err(CloudError::invalid(format!(
                "{id}: {} cannot be changed in place; delete and re-create the machine",
                fields.join(", ")
            )));
        }
        if !desired.name.eq_ignore_ascii_case(id.name())
            || !desired.resource_group.eq_ignore_ascii_case(id.resource_group())
        {
            return Err(CloudError::invalid(format!(
                "configuration for {}/{} does not describe {id}",
                desired.resource_group, desired.name
            )));
        }

        let mut stages = Vec::new();
        let mut lock = self.locks.acquire_within(&id.lock_key(), ctx).await?;
        enter(&mut stages, ReconcileStage::Locked, id);

        let applied = self.apply_update(id, desired, &plan, ctx, &mut stages).await;
        lock.release();
        let (previous_power_state, shutdown_fields) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(
                    resource = %id,
                    stage = %stages.last().copied().unwrap_or(ReconcileStage::Locked),
                    error = %e,
                    "Update failed"
                );
                return Err(e);
            }
        };
        enter(&mut stages, ReconcileStage::Done, id);

        let state = self.read_existing(id, ctx).await?;
        Ok(UpdateOutcome {
            state,
            plan,
            previous_power_state,
            shutdown_fields,
            stages,
        })
    }

    async fn apply_update(
        &self,
        id: &VirtualMachineId,
        desired: &VirtualMachineConfig,
        plan: &UpdatePlan,
        ctx: &OperationContext,
        stages: &mut Vec<ReconcileStage>,
    ) -> Result<(PowerState, Vec<Field>)> {
        enter(stages, ReconcileStage::Inspecting, id);
        let existing = self.get(id, ctx).await?;
        check_remote_shape(id, &existing, desired.os.family())?;

        let power_state = self.power_state(id, ctx).await?;
        let size_available = if plan.needs_size_check() {
            Some(self.size_available(id, &desired.size, ctx).await?)
        } else {
            None
        };
        let facts = ShutdownFacts {
            power_state,
            size_available,
            priority: desired.priority,
        };
        let shutdown_fields = plan.shutdown_fields(&facts);
        let shut_down = !shutdown_fields.is_empty() && !power_state.is_stopped();
        tracing::debug!(
            resource = %id,
            %power_state,
            ?size_available,
            ?shutdown_fields,
            "Inspected virtual machine"
        );

        if shut_down {
            enter(stages, ReconcileStage::Shutdown, id);
            tracing::info!(resource = %id, fields = ?shutdown_fields, "Powering off for update");
            self.await_operation(
                OperationKind::PowerOff,
                id,
                ctx,
                self.compute.power_off(id, false),
            )
            .await?;
        }

        if plan.needs_update() {
            enter(stages, ReconcileStage::Updating, id);
            let request = desired.to_update_request(plan);
            tracing::info!(resource = %id, sections = ?request.sections(), "Updating virtual machine");
            self.await_operation(
                OperationKind::Update,
                id,
                ctx,
                self.compute.update(id, &request),
            )
            .await?;
        }

        if shut_down {
            enter(stages, ReconcileStage::Restart, id);
            tracing::info!(resource = %id, "Starting virtual machine");
            self.await_operation(OperationKind::Start, id, ctx, self.compute.start(id))
                .await?;
        }

        Ok((power_state, shutdown_fields))
    }

    /// Power off without a guest shutdown, then delete
    pub async fn reconcile_delete(&self, id: &VirtualMachineId, ctx: &OperationContext) -> Result<()> {
        let _lock = self.locks.acquire_within(&id.lock_key(), ctx).await?;

        self.get(id, ctx).await?;

        tracing::info!(resource = %id, "Powering off before delete");
        self.await_operation(
            OperationKind::PowerOff,
            id,
            ctx,
            self.compute.power_off(id, true),
        )
        .await?;

        tracing::info!(resource = %id, "Deleting virtual machine");
        self.await_operation(OperationKind::Delete, id, ctx, self.compute.delete(id))
            .await
    }

    /// Addresses of the interfaces attached to `machine`
    pub async fn resolve_connection_info(
        &self,
        machine: &VirtualMachine,
        ctx: &OperationContext,
    ) -> ConnectionInfo {
        let profile = machine
            .properties
            .as_ref()
            .and_then(|p| p.network_profile.as_ref());
        self.resolver.resolve(profile, ctx).await
    }

    async fn read_existing(&self, id: &VirtualMachineId, ctx: &OperationContext) -> Result<RemoteState> {
        self.read(id, ctx)
            .await?
            .ok_or_else(|| CloudError::NotFound(id.to_string()))
    }

    async fn get(&self, id: &VirtualMachineId, ctx: &OperationContext) -> Result<VirtualMachine> {
        ctx.run(&format!("read of {id}"), self.compute.get(id))
            .await?
            .map_err(|e| e.during(OperationKind::Read, id))
    }

    async fn power_state(&self, id: &VirtualMachineId, ctx: &OperationContext) -> Result<PowerState> {
        let view = ctx
            .run(&format!("instance view of {id}"), self.compute.instance_view(id))
            .await?
            .map_err(|e| e.during(OperationKind::InstanceView, id))?;
        Ok(view.power_state())
    }

    async fn size_available(
        &self,
        id: &VirtualMachineId,
        size: &str,
        ctx: &OperationContext,
    ) -> Result<bool> {
        let sizes = ctx
            .run(
                &format!("list sizes of {id}"),
                self.compute.list_available_sizes(id),
            )
            .await?
            .map_err(|e| e.during(OperationKind::ListSizes, id))?;
        Ok(sizes.iter().any(|s| s.eq_ignore_ascii_case(size)))
    }

    async fn await_operation<F>(
        &self,
        op: OperationKind,
        id: &VirtualMachineId,
        ctx: &OperationContext,
        start: F,
    ) -> Result<()>
    where
        F: Future<Output = Result<PendingOperation>> + Send,
    {
        await_operation(op, &id.to_string(), ctx, &self.poll, start).await
    }
}

fn enter(stages: &mut Vec<ReconcileStage>, stage: ReconcileStage, id: &VirtualMachineId) {
    tracing::debug!(resource = %id, %stage, "Entering stage");
    stages.push(stage);
}

/// The remote document must carry properties, and an OS profile of the same
/// family as the desired configuration when it carries one at all
fn check_remote_shape(id: &VirtualMachineId, vm: &VirtualMachine, desired: OsFamily) -> Result<()> {
    let props = vm
        .properties
        .as_ref()
        .ok_or_else(|| CloudError::invalid(format!("{id} has no properties block")))?;
    let remote = props.os_profile.as_ref().and_then(|os| {
        if os.linux_configuration.is_some() {
            Some(OsFamily::Linux)
        } else if os.windows_configuration.is_some() {
            Some(OsFamily::Windows)
        } else {
            None
        }
    });
    match remote {
        Some(remote) if remote != desired => Err(CloudError::invalid(format!(
            "{id} is a {remote} machine but the configuration describes a {desired} one"
        ))),
        _ => Ok(()),
    }
}
