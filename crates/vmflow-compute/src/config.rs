//! Desired configuration of a virtual machine

use crate::model::{self, EvictionPolicy, IdentityType, Priority, VirtualMachine};
use crate::os::{LinuxConfig, OsConfiguration, WindowsConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vmflow_cloud::{CloudError, ResourceId, Result, VirtualMachineId};

/// Largest OS disk the platform accepts, in GiB
pub const MAX_OS_DISK_SIZE_GB: u32 = 4095;

/// Bid price meaning "pay up to the regular price, never evict on price"
pub const NO_MAX_BID_PRICE: f64 = -1.0;

fn default_true() -> bool {
    true
}

fn default_max_bid_price() -> f64 {
    NO_MAX_BID_PRICE
}

/// Lower-case a location and drop spaces, so "West Europe" matches "westeurope"
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compare two resource paths the way the platform does: identifiers that
/// parse compare structurally, anything else compares case-insensitively
pub fn same_resource_path(a: &str, b: &str) -> bool {
    match (ResourceId::parse(a), ResourceId::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

fn same_optional_path(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_resource_path(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn same_path_list(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_resource_path(a, b))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskCaching {
    None,
    ReadOnly,
    #[default]
    ReadWrite,
}

impl DiskCaching {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskCaching::None => "None",
            DiskCaching::ReadOnly => "ReadOnly",
            DiskCaching::ReadWrite => "ReadWrite",
        }
    }

    fn from_wire(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "none" => DiskCaching::None,
            "readonly" => DiskCaching::ReadOnly,
            _ => DiskCaching::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageAccountType {
    #[default]
    #[serde(rename = "Standard_LRS")]
    StandardLrs,
    #[serde(rename = "StandardSSD_LRS")]
    StandardSsdLrs,
    #[serde(rename = "Premium_LRS")]
    PremiumLrs,
}

impl StorageAccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageAccountType::StandardLrs => "Standard_LRS",
            StorageAccountType::StandardSsdLrs => "StandardSSD_LRS",
            StorageAccountType::PremiumLrs => "Premium_LRS",
        }
    }

    fn from_wire(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "premium_lrs" => StorageAccountType::PremiumLrs,
            "standardssd_lrs" => StorageAccountType::StandardSsdLrs,
            _ => StorageAccountType::StandardLrs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsDiskConfig {
    #[serde(default)]
    pub caching: DiskCaching,
    #[serde(default)]
    pub storage_account_type: StorageAccountType,
    /// Left to the image default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u32>,
    #[serde(default)]
    pub write_accelerator_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceImage {
    /// A custom or shared-gallery image, by resource path
    Id(String),
    Reference {
        publisher: String,
        offer: String,
        sku: String,
        version: String,
    },
}

impl SourceImage {
    fn validate(&self) -> Result<()> {
        match self {
            SourceImage::Id(id) if id.trim().is_empty() => {
                Err(CloudError::invalid("source_image id must not be empty"))
            }
            SourceImage::Reference {
                publisher,
                offer,
                sku,
                version,
            } if [publisher, offer, sku, version]
                .iter()
                .any(|v| v.trim().is_empty()) =>
            {
                Err(CloudError::invalid(
                    "source_image reference needs publisher, offer, sku and version",
                ))
            }
            _ => Ok(()),
        }
    }

    fn to_wire(&self) -> model::ImageReference {
        match self {
            SourceImage::Id(id) => model::ImageReference {
                id: Some(id.clone()),
                ..Default::default()
            },
            SourceImage::Reference {
                publisher,
                offer,
                sku,
                version,
            } => model::ImageReference {
                id: None,
                publisher: Some(publisher.clone()),
                offer: Some(offer.clone()),
                sku: Some(sku.clone()),
                version: Some(version.clone()),
            },
        }
    }

    fn from_wire(image: &model::ImageReference) -> Option<Self> {
        if let Some(id) = &image.id {
            return Some(SourceImage::Id(id.clone()));
        }
        Some(SourceImage::Reference {
            publisher: image.publisher.clone()?,
            offer: image.offer.clone()?,
            sku: image.sku.clone()?,
            version: image.version.clone()?,
        })
    }

    fn same_as(&self, other: &SourceImage) -> bool {
        match (self, other) {
            (SourceImage::Id(a), SourceImage::Id(b)) => same_resource_path(a, b),
            (a, b) => a == b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultCertificateConfig {
    pub url: String,
    /// Certificate store, Windows only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSecret {
    pub key_vault_id: String,
    pub certificates: Vec<VaultCertificateConfig>,
}

impl VaultSecret {
    fn same_as(&self, other: &VaultSecret) -> bool {
        same_resource_path(&self.key_vault_id, &other.key_vault_id)
            && self.certificates == other.certificates
    }

    fn to_wire(&self) -> model::VaultSecretGroup {
        model::VaultSecretGroup {
            source_vault: model::SubResource::new(&self.key_vault_id),
            vault_certificates: self
                .certificates
                .iter()
                .map(|c| model::VaultCertificate {
                    certificate_url: c.url.clone(),
                    certificate_store: c.store.clone(),
                })
                .collect(),
        }
    }

    fn from_wire(group: &model::VaultSecretGroup) -> Self {
        Self {
            key_vault_id: group.source_vault.id.clone(),
            certificates: group
                .vault_certificates
                .iter()
                .map(|c| VaultCertificateConfig {
                    url: c.certificate_url.clone(),
                    store: c.certificate_store.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(rename = "type")]
    pub kind: IdentityType,
    #[serde(default)]
    pub identity_ids: Vec<String>,
}

impl IdentityConfig {
    fn validate(&self) -> Result<()> {
        match self.kind {
            IdentityType::None => Err(CloudError::invalid(
                "identity type None is expressed by omitting the identity block",
            )),
            kind if kind.has_user_assigned() && self.identity_ids.is_empty() => {
                Err(CloudError::invalid(
                    "identity_ids must be set when a UserAssigned identity is used",
                ))
            }
            kind if !kind.has_user_assigned() && !self.identity_ids.is_empty() => {
                Err(CloudError::invalid(
                    "identity_ids can only be set when a UserAssigned identity is used",
                ))
            }
            _ => Ok(()),
        }
    }

    fn same_as(&self, other: &IdentityConfig) -> bool {
        if self.kind != other.kind || self.identity_ids.len() != other.identity_ids.len() {
            return false;
        }
        self.identity_ids
            .iter()
            .all(|a| other.identity_ids.iter().any(|b| same_resource_path(a, b)))
    }

    pub(crate) fn to_wire(&self) -> model::ManagedIdentity {
        let user_assigned = self.kind.has_user_assigned().then(|| {
            self.identity_ids
                .iter()
                .map(|id| (id.clone(), serde_json::json!({})))
                .collect()
        });
        model::ManagedIdentity {
            kind: self.kind,
            user_assigned_identities: user_assigned,
            principal_id: None,
        }
    }

    /// `None` disables managed identity on update
    pub(crate) fn disabled() -> model::ManagedIdentity {
        model::ManagedIdentity {
            kind: IdentityType::None,
            user_assigned_identities: None,
            principal_id: None,
        }
    }

    fn from_wire(identity: &model::ManagedIdentity) -> Option<Self> {
        if identity.kind == IdentityType::None {
            return None;
        }
        Some(Self {
            kind: identity.kind,
            identity_ids: identity
                .user_assigned_identities
                .iter()
                .flat_map(|m| m.keys().cloned())
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootDiagnosticsConfig {
    pub storage_account_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub name: String,
    pub product: String,
    pub publisher: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalCapabilitiesConfig {
    #[serde(default)]
    pub ultra_ssd_enabled: bool,
}

/// Everything a caller wants a virtual machine to look like
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineConfig {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub size: String,
    pub network_interface_ids: Vec<String>,
    #[serde(default)]
    pub os_disk: OsDiskConfig,
    pub os: OsConfiguration,
    #[serde(default = "default_true")]
    pub allow_extension_operations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    /// Write-only; never returned by a read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<VaultSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_diagnostics: Option<BootDiagnosticsConfig>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_policy: Option<EvictionPolicy>,
    #[serde(default = "default_max_bid_price")]
    pub max_bid_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_set_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity_placement_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated_host_id: Option<String>,
    /// Required to create; may be unknown on a projected read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<SourceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_capabilities: Option<AdditionalCapabilitiesConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl VirtualMachineConfig {
    /// Name the guest OS sees; defaults to the machine name
    pub fn effective_computer_name(&self) -> &str {
        self.computer_name.as_deref().unwrap_or(&self.name)
    }

    pub fn ultra_ssd_enabled(&self) -> bool {
        self.additional_capabilities
            .as_ref()
            .is_some_and(|c| c.ultra_ssd_enabled)
    }

    /// Reject configurations the platform would refuse, before any remote call
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("resource_group", &self.resource_group),
            ("location", &self.location),
            ("size", &self.size),
        ] {
            if value.trim().is_empty() {
                return Err(CloudError::invalid(format!("{field} must not be empty")));
            }
        }
        if self.network_interface_ids.is_empty() {
            return Err(CloudError::invalid(
                "at least one network interface is required",
            ));
        }

        let os = self.os.spec();
        os.validate()?;

        let computer_name = self.effective_computer_name();
        if computer_name.chars().count() > os.max_computer_name_len() {
            return Err(CloudError::invalid(format!(
                "computer name {computer_name:?} is longer than {} characters, the {} limit",
                os.max_computer_name_len(),
                os.family()
            )));
        }

        if self.allow_extension_operations && !os.provision_vm_agent() {
            return Err(CloudError::invalid(
                "allow_extension_operations cannot be enabled when provision_vm_agent is disabled",
            ));
        }

        match (self.priority, self.eviction_policy) {
            (Priority::Regular, Some(_)) => {
                return Err(CloudError::invalid(
                    "an eviction_policy can only be specified when priority is Spot",
                ));
            }
            (Priority::Spot, None) => {
                return Err(CloudError::invalid(
                    "an eviction_policy must be specified when priority is Spot",
                ));
            }
            _ => {}
        }

        if self.max_bid_price != NO_MAX_BID_PRICE && self.max_bid_price <= 0.0 {
            return Err(CloudError::invalid(
                "max_bid_price must be -1 or greater than 0",
            ));
        }
        if self.max_bid_price > 0.0 && self.priority != Priority::Spot {
            return Err(CloudError::invalid(
                "max_bid_price can only be configured when priority is Spot",
            ));
        }

        if self.availability_set_id.is_some() && self.zone.is_some() {
            return Err(CloudError::invalid(
                "availability_set_id conflicts with zone",
            ));
        }

        if let Some(identity) = &self.identity {
            identity.validate()?;
        }

        if self
            .os_disk
            .disk_size_gb
            .is_some_and(|size| size == 0 || size > MAX_OS_DISK_SIZE_GB)
        {
            return Err(CloudError::invalid(format!(
                "os_disk.disk_size_gb must be between 1 and {MAX_OS_DISK_SIZE_GB}"
            )));
        }

        if let Some(image) = &self.source_image {
            image.validate()?;
        }

        Ok(())
    }

    /// Creation also needs the image to boot from
    pub fn validate_for_create(&self) -> Result<()> {
        self.validate()?;
        if self.source_image.is_none() {
            return Err(CloudError::invalid(
                "source_image is required to create a virtual machine",
            ));
        }
        Ok(())
    }

    /// Copy write-only values the API never returns from `from` into `self`
    /// wherever `self` has none, so a projected read can be diffed against a
    /// desired configuration without reporting phantom changes
    pub fn carry_write_only_fields(&mut self, from: &VirtualMachineConfig) {
        if self.custom_data.is_none() {
            self.custom_data = from.custom_data.clone();
        }
        self.os.carry_password_from(&from.os);
    }

    pub(crate) fn identity_differs(&self, other: &VirtualMachineConfig) -> bool {
        match (&self.identity, &other.identity) {
            (Some(a), Some(b)) => !a.same_as(b),
            (None, None) => false,
            _ => true,
        }
    }

    pub(crate) fn secrets_differ(&self, other: &VirtualMachineConfig) -> bool {
        self.secrets.len() != other.secrets.len()
            || !self
                .secrets
                .iter()
                .zip(&other.secrets)
                .all(|(a, b)| a.same_as(b))
    }

    pub(crate) fn network_interfaces_differ(&self, other: &VirtualMachineConfig) -> bool {
        !same_path_list(&self.network_interface_ids, &other.network_interface_ids)
    }

    pub(crate) fn placement_differs(a: Option<&str>, b: Option<&str>) -> bool {
        !same_optional_path(a, b)
    }

    pub(crate) fn source_image_differs(&self, other: &VirtualMachineConfig) -> bool {
        match (&self.source_image, &other.source_image) {
            (Some(a), Some(b)) => !a.same_as(b),
            // an unknown image on either side is not a change
            _ => false,
        }
    }

    pub(crate) fn secrets_to_wire(&self) -> Vec<model::VaultSecretGroup> {
        self.secrets.iter().map(VaultSecret::to_wire).collect()
    }

    pub(crate) fn source_image_to_wire(&self) -> Option<model::ImageReference> {
        self.source_image.as_ref().map(SourceImage::to_wire)
    }

    /// Build a configuration from a machine as the API returns it
    pub fn from_remote(id: &VirtualMachineId, vm: &VirtualMachine) -> Result<Self> {
        let props = vm.properties.as_ref().ok_or_else(|| {
            CloudError::invalid(format!("{id} has no properties block"))
        })?;
        let os_profile = props.os_profile.clone().unwrap_or_default();
        let os = match (&os_profile.linux_configuration, &os_profile.windows_configuration) {
            (Some(linux), _) => OsConfiguration::Linux(LinuxConfig::from_wire(&os_profile, linux)),
            (None, Some(windows)) => {
                OsConfiguration::Windows(WindowsConfig::from_wire(&os_profile, windows))
            }
            (None, None) => {
                return Err(CloudError::invalid(format!(
                    "{id} reports neither a Linux nor a Windows configuration"
                )));
            }
        };
        let storage = props.storage_profile.clone().unwrap_or_default();
        let os_disk = storage.os_disk.unwrap_or_default();

        Ok(Self {
            name: vm.name.clone().unwrap_or_else(|| id.name().to_string()),
            resource_group: id.resource_group().to_string(),
            location: vm.location.as_deref().map(normalize_location).unwrap_or_default(),
            size: props
                .hardware_profile
                .as_ref()
                .map(|h| h.vm_size.clone())
                .unwrap_or_default(),
            network_interface_ids: props
                .network_profile
                .iter()
                .flat_map(|n| n.network_interfaces.iter())
                .map(|n| n.id.clone())
                .collect(),
            os_disk: OsDiskConfig {
                caching: os_disk
                    .caching
                    .as_deref()
                    .map(DiskCaching::from_wire)
                    .unwrap_or_default(),
                storage_account_type: os_disk
                    .managed_disk
                    .as_ref()
                    .and_then(|m| m.storage_account_type.as_deref())
                    .map(StorageAccountType::from_wire)
                    .unwrap_or_default(),
                disk_size_gb: os_disk.disk_size_gb,
                write_accelerator_enabled: os_disk.write_accelerator_enabled.unwrap_or(false),
            },
            os,
            allow_extension_operations: os_profile.allow_extension_operations.unwrap_or(true),
            computer_name: os_profile.computer_name.clone(),
            custom_data: None,
            secrets: os_profile
                .secrets
                .iter()
                .flatten()
                .map(VaultSecret::from_wire)
                .collect(),
            identity: vm.identity.as_ref().and_then(IdentityConfig::from_wire),
            boot_diagnostics: props
                .diagnostics_profile
                .as_ref()
                .and_then(|d| d.boot_diagnostics.as_ref())
                .filter(|b| b.enabled)
                .map(|b| BootDiagnosticsConfig {
                    storage_account_uri: b.storage_uri.clone().unwrap_or_default(),
                }),
            priority: props.priority.unwrap_or_default(),
            eviction_policy: props.eviction_policy,
            max_bid_price: props
                .billing_profile
                .as_ref()
                .map(|b| b.max_price)
                .unwrap_or(NO_MAX_BID_PRICE),
            availability_set_id: props.availability_set.as_ref().map(|s| s.id.clone()),
            zone: vm.zones.as_ref().and_then(|z| z.first().cloned()),
            proximity_placement_group_id: props
                .proximity_placement_group
                .as_ref()
                .map(|s| s.id.clone()),
            dedicated_host_id: props.host.as_ref().map(|s| s.id.clone()),
            source_image: storage
                .image_reference
                .as_ref()
                .and_then(SourceImage::from_wire),
            plan: vm.plan.as_ref().map(|p| PlanConfig {
                name: p.name.clone(),
                product: p.product.clone(),
                publisher: p.publisher.clone(),
            }),
            additional_capabilities: props.additional_capabilities.as_ref().map(|c| {
                AdditionalCapabilitiesConfig {
                    ultra_ssd_enabled: c.ultra_ssd_enabled.unwrap_or(false),
                }
            }),
            tags: vm.tags.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::os::SshKey;

    pub const NIC_ID: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-web/providers/Microsoft.Network/networkInterfaces/web-1-nic";

    pub fn linux_vm() -> VirtualMachineConfig {
        VirtualMachineConfig {
            name: "web-1".to_string(),
            resource_group: "rg-web".to_string(),
            location: "westeurope".to_string(),
            size: "Standard_F2".to_string(),
            network_interface_ids: vec![NIC_ID.to_string()],
            os_disk: OsDiskConfig::default(),
            os: OsConfiguration::Linux(LinuxConfig {
                admin_username: "adminuser".to_string(),
                admin_password: None,
                admin_ssh_keys: vec![SshKey {
                    username: "adminuser".to_string(),
                    public_key: "ssh-rsa AAAAB3Nza".to_string(),
                }],
                disable_password_authentication: true,
                provision_vm_agent: true,
            }),
            allow_extension_operations: true,
            computer_name: None,
            custom_data: None,
            secrets: Vec::new(),
            identity: None,
            boot_diagnostics: None,
            priority: Priority::Regular,
            eviction_policy: None,
            max_bid_price: NO_MAX_BID_PRICE,
            availability_set_id: None,
            zone: None,
            proximity_placement_group_id: None,
            dedicated_host_id: None,
            source_image: Some(SourceImage::Reference {
                publisher: "Canonical".to_string(),
                offer: "0001-com-ubuntu-server-jammy".to_string(),
                sku: "22_04-lts".to_string(),
                version: "latest".to_string(),
            }),
            plan: None,
            additional_capabilities: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn windows_vm() -> VirtualMachineConfig {
        VirtualMachineConfig {
            name: "app-1".to_string(),
            os: OsConfiguration::Windows(WindowsConfig {
                admin_username: "adminuser".to_string(),
                admin_password: "P@ssw0rd1234!".to_string(),
                enable_automatic_updates: true,
                timezone: None,
                provision_vm_agent: true,
            }),
            ..linux_vm()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn assert_invalid(config: &VirtualMachineConfig, needle: &str) {
        match config.validate() {
            Err(CloudError::InvalidConfiguration(msg)) => {
                assert!(msg.contains(needle), "{msg:?} does not mention {needle:?}")
            }
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_fixtures_are_valid() {
        linux_vm().validate_for_create().unwrap();
        windows_vm().validate_for_create().unwrap();
    }

    #[test]
    fn test_spot_requires_eviction_policy() {
        let mut config = linux_vm();
        config.priority = Priority::Spot;
        assert_invalid(&config, "must be specified");

        config.eviction_policy = Some(EvictionPolicy::Deallocate);
        config.validate().unwrap();
    }

    #[test]
    fn test_eviction_policy_requires_spot() {
        let mut config = linux_vm();
        config.eviction_policy = Some(EvictionPolicy::Delete);
        assert_invalid(&config, "only be specified when priority is Spot");
    }

    #[test]
    fn test_bid_price_rules() {
        let mut config = linux_vm();
        config.max_bid_price = 0.0;
        assert_invalid(&config, "-1 or greater than 0");

        config.max_bid_price = 0.5;
        assert_invalid(&config, "only be configured when priority is Spot");

        config.priority = Priority::Spot;
        config.eviction_policy = Some(EvictionPolicy::Deallocate);
        config.validate().unwrap();
    }

    #[test]
    fn test_extension_operations_need_vm_agent() {
        let mut config = linux_vm();
        if let OsConfiguration::Linux(linux) = &mut config.os {
            linux.provision_vm_agent = false;
        }
        assert_invalid(&config, "provision_vm_agent");

        config.allow_extension_operations = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_availability_set_conflicts_with_zone() {
        let mut config = linux_vm();
        config.zone = Some("1".to_string());
        config.availability_set_id = Some("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/availabilitySets/as".to_string());
        assert_invalid(&config, "conflicts with zone");
    }

    #[test]
    fn test_identity_ids_rules() {
        let mut config = linux_vm();
        config.identity = Some(IdentityConfig {
            kind: IdentityType::UserAssigned,
            identity_ids: Vec::new(),
        });
        assert_invalid(&config, "must be set");

        config.identity = Some(IdentityConfig {
            kind: IdentityType::SystemAssigned,
            identity_ids: vec!["/subscriptions/s/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/id".to_string()],
        });
        assert_invalid(&config, "can only be set");
    }

    #[test]
    fn test_windows_computer_name_limit() {
        let mut config = windows_vm();
        config.name = "a-very-long-machine-name".to_string();
        assert_invalid(&config, "15");

        config.computer_name = Some("short".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_required_fields() {
        let mut config = linux_vm();
        config.size = " ".to_string();
        assert_invalid(&config, "size");

        let mut config = linux_vm();
        config.network_interface_ids.clear();
        assert_invalid(&config, "network interface");
    }

    #[test]
    fn test_create_requires_source_image() {
        let mut config = linux_vm();
        config.source_image = None;
        config.validate().unwrap();
        assert!(config.validate_for_create().is_err());
    }

    #[test]
    fn test_normalize_location() {
        assert_eq!(normalize_location("West Europe"), "westeurope");
        assert_eq!(normalize_location("eastus2"), "eastus2");
    }

    #[test]
    fn test_same_resource_path_ignores_resource_group_case() {
        let a = "/subscriptions/s/resourceGroups/RG-Web/providers/Microsoft.Network/networkInterfaces/nic";
        let b = "/subscriptions/s/resourcegroups/rg-web/providers/Microsoft.Network/networkInterfaces/nic";
        assert!(same_resource_path(a, b));
        assert!(!same_resource_path(a, "/subscriptions/s/resourceGroups/rg-web/providers/Microsoft.Network/networkInterfaces/other"));
    }

    #[test]
    fn test_deserialize_from_yaml_with_defaults() {
        let yaml = r#"
name: web-1
resource_group: rg-web
location: westeurope
size: Standard_F2
network_interface_ids:
  - /subscriptions/s/resourceGroups/rg-web/providers/Microsoft.Network/networkInterfaces/nic
os:
  type: linux
  admin_username: adminuser
  admin_ssh_keys:
    - username: adminuser
      public_key: ssh-rsa AAAA
source_image:
  reference:
    publisher: Canonical
    offer: ubuntu
    sku: 22_04-lts
    version: latest
"#;
        let config: VirtualMachineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.allow_extension_operations);
        assert_eq!(config.max_bid_price, NO_MAX_BID_PRICE);
        assert_eq!(config.priority, Priority::Regular);
        assert_eq!(config.os_disk.caching, DiskCaching::ReadWrite);
        config.validate_for_create().unwrap();
    }

    #[test]
    fn test_carry_write_only_fields() {
        let desired = windows_vm();
        let mut observed = windows_vm();
        if let OsConfiguration::Windows(w) = &mut observed.os {
            w.admin_password.clear();
        }
        observed.carry_write_only_fields(&desired);
        assert_eq!(observed.os, desired.os);
    }
}
