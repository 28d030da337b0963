//! Diff planning between a desired and a last-known configuration
//!
//! The planner is pure: it never talks to the remote side. It reports which
//! fields changed, which of those can only be applied by re-creating the
//! machine, and whether the shutdown policy demands a power cycle regardless
//! of what the remote machine looks like.

use crate::config::{VirtualMachineConfig, normalize_location};
use crate::policy::{ShutdownFacts, ShutdownPolicy, ShutdownRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use vmflow_cloud::{CloudError, Result};

/// A configuration field the planner tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Size,
    NetworkInterfaces,
    OsDiskSize,
    OsDiskCaching,
    OsDiskStorageType,
    OsDiskWriteAccelerator,
    AdminSshKeys,
    PasswordAuthentication,
    AdminPassword,
    CustomData,
    Secrets,
    AutomaticUpdates,
    Timezone,
    Identity,
    MaxBidPrice,
    BootDiagnostics,
    AdditionalCapabilities,
    Tags,
    // fixed at creation
    AdminUsername,
    ComputerName,
    Location,
    OsFamily,
    Priority,
    EvictionPolicy,
    AllowExtensionOperations,
    ProvisionVmAgent,
    AvailabilitySet,
    Zone,
    ProximityPlacementGroup,
    DedicatedHost,
    SourceImage,
    Plan,
}

impl Field {
    pub const ALL: [Field; 32] = [
        Field::Size,
        Field::NetworkInterfaces,
        Field::OsDiskSize,
        Field::OsDiskCaching,
        Field::OsDiskStorageType,
        Field::OsDiskWriteAccelerator,
        Field::AdminSshKeys,
        Field::PasswordAuthentication,
        Field::AdminPassword,
        Field::CustomData,
        Field::Secrets,
        Field::AutomaticUpdates,
        Field::Timezone,
        Field::Identity,
        Field::MaxBidPrice,
        Field::BootDiagnostics,
        Field::AdditionalCapabilities,
        Field::Tags,
        Field::AdminUsername,
        Field::ComputerName,
        Field::Location,
        Field::OsFamily,
        Field::Priority,
        Field::EvictionPolicy,
        Field::AllowExtensionOperations,
        Field::ProvisionVmAgent,
        Field::AvailabilitySet,
        Field::Zone,
        Field::ProximityPlacementGroup,
        Field::DedicatedHost,
        Field::SourceImage,
        Field::Plan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Size => "size",
            Field::NetworkInterfaces => "network_interfaces",
            Field::OsDiskSize => "os_disk_size",
            Field::OsDiskCaching => "os_disk_caching",
            Field::OsDiskStorageType => "os_disk_storage_type",
            Field::OsDiskWriteAccelerator => "os_disk_write_accelerator",
            Field::AdminSshKeys => "admin_ssh_keys",
            Field::PasswordAuthentication => "password_authentication",
            Field::AdminPassword => "admin_password",
            Field::CustomData => "custom_data",
            Field::Secrets => "secrets",
            Field::AutomaticUpdates => "automatic_updates",
            Field::Timezone => "timezone",
            Field::Identity => "identity",
            Field::MaxBidPrice => "max_bid_price",
            Field::BootDiagnostics => "boot_diagnostics",
            Field::AdditionalCapabilities => "additional_capabilities",
            Field::Tags => "tags",
            Field::AdminUsername => "admin_username",
            Field::ComputerName => "computer_name",
            Field::Location => "location",
            Field::OsFamily => "os_family",
            Field::Priority => "priority",
            Field::EvictionPolicy => "eviction_policy",
            Field::AllowExtensionOperations => "allow_extension_operations",
            Field::ProvisionVmAgent => "provision_vm_agent",
            Field::AvailabilitySet => "availability_set",
            Field::Zone => "zone",
            Field::ProximityPlacementGroup => "proximity_placement_group",
            Field::DedicatedHost => "dedicated_host",
            Field::SourceImage => "source_image",
            Field::Plan => "plan",
        }
    }

    /// Whether the platform can change this field on an existing machine
    pub fn is_mutable(&self) -> bool {
        self.section().is_some()
    }

    /// Request section an in-place change of this field is sent in
    pub fn section(&self) -> Option<Section> {
        Some(match self {
            Field::Size => Section::HardwareProfile,
            Field::NetworkInterfaces => Section::NetworkProfile,
            Field::OsDiskSize
            | Field::OsDiskCaching
            | Field::OsDiskStorageType
            | Field::OsDiskWriteAccelerator => Section::StorageProfile,
            Field::AdminSshKeys
            | Field::PasswordAuthentication
            | Field::AdminPassword
            | Field::CustomData
            | Field::Secrets
            | Field::AutomaticUpdates
            | Field::Timezone => Section::OsProfile,
            Field::Identity => Section::Identity,
            Field::MaxBidPrice => Section::BillingProfile,
            Field::BootDiagnostics => Section::DiagnosticsProfile,
            Field::AdditionalCapabilities => Section::AdditionalCapabilities,
            Field::Tags => Section::Tags,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Field {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        Field::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| CloudError::invalid(format!("unknown field {s:?}")))
    }
}

/// Top-level section of a partial update request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    OsProfile,
    Identity,
    NetworkProfile,
    StorageProfile,
    HardwareProfile,
    BillingProfile,
    DiagnosticsProfile,
    AdditionalCapabilities,
    Tags,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Section::OsProfile => "os_profile",
            Section::Identity => "identity",
            Section::NetworkProfile => "network_profile",
            Section::StorageProfile => "storage_profile",
            Section::HardwareProfile => "hardware_profile",
            Section::BillingProfile => "billing_profile",
            Section::DiagnosticsProfile => "diagnostics_profile",
            Section::AdditionalCapabilities => "additional_capabilities",
            Section::Tags => "tags",
        };
        write!(f, "{s}")
    }
}

/// Result of diffing a desired configuration against the last-known one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdatePlan {
    /// Fields that can be changed in place
    pub fields_changed: BTreeSet<Field>,
    /// Fields that can only change by re-creating the machine
    pub replacements: BTreeSet<Field>,
    /// Shutdown rule of every in-place change that has one
    pub shutdown_rules: BTreeMap<Field, ShutdownRule>,
    /// The policy demands a shutdown whatever the remote state
    pub requires_shutdown: bool,
    /// A shutdown, when it happens, is followed by a start
    pub requires_restart: bool,
}

impl UpdatePlan {
    pub fn needs_update(&self) -> bool {
        !self.fields_changed.is_empty()
    }

    pub fn needs_power_cycle(&self) -> bool {
        self.requires_shutdown && self.requires_restart
    }

    pub fn has_replacements(&self) -> bool {
        !self.replacements.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.fields_changed.is_empty() && self.replacements.is_empty()
    }

    pub fn changes(&self, field: Field) -> bool {
        self.fields_changed.contains(&field)
    }

    /// Request sections the in-place changes touch
    pub fn sections(&self) -> BTreeSet<Section> {
        self.fields_changed
            .iter()
            .filter_map(Field::section)
            .collect()
    }

    /// Fields whose shutdown rule applies given what was observed remotely
    pub fn shutdown_fields(&self, facts: &ShutdownFacts) -> Vec<Field> {
        self.shutdown_rules
            .iter()
            .filter(|(_, rule)| rule.applies(facts))
            .map(|(field, _)| *field)
            .collect()
    }

    /// Fields whose shutdown rule can only be decided from the remote machine
    pub fn conditional_fields(&self) -> Vec<Field> {
        self.shutdown_rules
            .iter()
            .filter(|(_, rule)| !rule.is_static())
            .map(|(field, _)| *field)
            .collect()
    }

    /// Whether deciding on a shutdown needs the list of sizes the host offers
    pub fn needs_size_check(&self) -> bool {
        self.shutdown_rules.get(&Field::Size) == Some(&ShutdownRule::WhenSizeUnavailable)
    }
}

/// Diffs configurations under a shutdown policy
#[derive(Debug, Clone, Default)]
pub struct Planner {
    policy: ShutdownPolicy,
}

impl Planner {
    pub fn new(policy: ShutdownPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ShutdownPolicy {
        &self.policy
    }

    /// Validate `desired` and diff it against `last_known`
    pub fn plan(
        &self,
        desired: &VirtualMachineConfig,
        last_known: &VirtualMachineConfig,
    ) -> Result<UpdatePlan> {
        desired.validate()?;

        let mut plan = UpdatePlan::default();
        for field in diff(desired, last_known) {
            if desired.os.requires_replacement(field) {
                plan.replacements.insert(field);
                continue;
            }
            plan.fields_changed.insert(field);
            let rule = self.policy.rule_for(field);
            if rule != ShutdownRule::Never {
                plan.shutdown_rules.insert(field, rule);
            }
        }
        plan.requires_shutdown = plan
            .shutdown_rules
            .values()
            .any(|r| *r == ShutdownRule::Always);
        plan.requires_restart = !plan.shutdown_rules.is_empty();

        tracing::debug!(
            machine = %desired.name,
            changed = ?plan.fields_changed,
            replacements = ?plan.replacements,
            requires_shutdown = plan.requires_shutdown,
            "Planned update"
        );
        Ok(plan)
    }
}

/// Plan with the built-in shutdown policy
pub fn plan(desired: &VirtualMachineConfig, last_known: &VirtualMachineConfig) -> Result<UpdatePlan> {
    Planner::default().plan(desired, last_known)
}

fn diff(desired: &VirtualMachineConfig, previous: &VirtualMachineConfig) -> BTreeSet<Field> {
    let mut changed = BTreeSet::new();
    let mut mark = |field: Field, differs: bool| {
        if differs {
            changed.insert(field);
        }
    };

    mark(Field::Size, !desired.size.eq_ignore_ascii_case(&previous.size));
    mark(
        Field::NetworkInterfaces,
        desired.network_interfaces_differ(previous),
    );

    let (disk, prev_disk) = (&desired.os_disk, &previous.os_disk);
    // an unset size keeps whatever the disk has grown to
    mark(
        Field::OsDiskSize,
        disk.disk_size_gb.is_some() && disk.disk_size_gb != prev_disk.disk_size_gb,
    );
    mark(Field::OsDiskCaching, disk.caching != prev_disk.caching);
    mark(
        Field::OsDiskStorageType,
        disk.storage_account_type != prev_disk.storage_account_type,
    );
    mark(
        Field::OsDiskWriteAccelerator,
        disk.write_accelerator_enabled != prev_disk.write_accelerator_enabled,
    );

    for field in desired.os.diff(&previous.os) {
        mark(field, true);
    }

    mark(Field::CustomData, desired.custom_data != previous.custom_data);
    mark(Field::Secrets, desired.secrets_differ(previous));
    mark(Field::Identity, desired.identity_differs(previous));
    mark(
        Field::MaxBidPrice,
        (desired.max_bid_price - previous.max_bid_price).abs() > f64::EPSILON,
    );
    mark(
        Field::BootDiagnostics,
        desired.boot_diagnostics != previous.boot_diagnostics,
    );
    mark(
        Field::AdditionalCapabilities,
        desired.ultra_ssd_enabled() != previous.ultra_ssd_enabled(),
    );
    mark(Field::Tags, desired.tags != previous.tags);

    mark(
        Field::ComputerName,
        desired.effective_computer_name() != previous.effective_computer_name(),
    );
    mark(
        Field::Location,
        normalize_location(&desired.location) != normalize_location(&previous.location),
    );
    mark(Field::Priority, desired.priority != previous.priority);
    mark(
        Field::EvictionPolicy,
        desired.eviction_policy != previous.eviction_policy,
    );
    mark(
        Field::AllowExtensionOperations,
        desired.allow_extension_operations != previous.allow_extension_operations,
    );
    mark(
        Field::AvailabilitySet,
        VirtualMachineConfig::placement_differs(
            desired.availability_set_id.as_deref(),
            previous.availability_set_id.as_deref(),
        ),
    );
    mark(Field::Zone, desired.zone != previous.zone);
    mark(
        Field::ProximityPlacementGroup,
        VirtualMachineConfig::placement_differs(
            desired.proximity_placement_group_id.as_deref(),
            previous.proximity_placement_group_id.as_deref(),
        ),
    );
    mark(
        Field::DedicatedHost,
        VirtualMachineConfig::placement_differs(
            desired.dedicated_host_id.as_deref(),
            previous.dedicated_host_id.as_deref(),
        ),
    );
    mark(Field::SourceImage, desired.source_image_differs(previous));
    mark(Field::Plan, desired.plan != previous.plan);

    changed
}
