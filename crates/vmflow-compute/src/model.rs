//! Wire models for the compute and network APIs
//!
//! These mirror the JSON documents exchanged with the management API.
//! Everything the API may leave out is an `Option` so that partially
//! populated responses still deserialize.

use crate::planner::Section;
use crate::state::PowerState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to another resource by its full path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    pub id: String,
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A virtual machine as returned by `get`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ManagedIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<MarketplacePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<VirtualMachineProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_profile: Option<HardwareProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_profile: Option<StorageProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<NetworkProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_profile: Option<DiagnosticsProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_profile: Option<BillingProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_capabilities: Option<AdditionalCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<SubResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proximity_placement_group: Option<SubResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<SubResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_policy: Option<EvictionPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    pub vm_size: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<ImageReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_disk: Option<OsDisk>,
    /// Sent as an empty list on create; left out of updates so attached
    /// disks managed elsewhere are untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_disks: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<ManagedDiskParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_accelerator_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDiskParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_account_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_extension_operations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux_configuration: Option<LinuxConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_configuration: Option<WindowsConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<VaultSecretGroup>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_password_authentication: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision_vm_agent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    #[serde(default)]
    pub public_keys: Vec<SshPublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshPublicKey {
    pub path: String,
    pub key_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_automatic_updates: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision_vm_agent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretGroup {
    pub source_vault: SubResource,
    #[serde(default)]
    pub vault_certificates: Vec<VaultCertificate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultCertificate {
    pub certificate_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_store: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceReference {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<NetworkInterfaceReferenceProperties>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceReferenceProperties {
    pub primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_diagnostics: Option<BootDiagnostics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootDiagnostics {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingProfile {
    /// `-1` means "never evict on price"
    pub max_price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalCapabilities {
    #[serde(rename = "ultraSSDEnabled", skip_serializing_if = "Option::is_none")]
    pub ultra_ssd_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplacePlan {
    pub name: String,
    pub product: String,
    pub publisher: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Regular,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Deallocate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityType {
    SystemAssigned,
    UserAssigned,
    #[serde(rename = "SystemAssigned, UserAssigned")]
    SystemAssignedUserAssigned,
    None,
}

impl IdentityType {
    pub fn has_user_assigned(&self) -> bool {
        matches!(
            self,
            IdentityType::UserAssigned | IdentityType::SystemAssignedUserAssigned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedIdentity {
    #[serde(rename = "type")]
    pub kind: IdentityType,
    /// Keyed by identity path; values are opaque server-side details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_assigned_identities: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
}

/// Partial update request. Only populated sections are sent; anything left
/// as `None` keeps its remote value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ManagedIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub properties: VirtualMachineUpdateProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineUpdateProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_profile: Option<HardwareProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_profile: Option<StorageProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<NetworkProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_profile: Option<DiagnosticsProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_profile: Option<BillingProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_capabilities: Option<AdditionalCapabilities>,
}

impl VirtualMachineUpdate {
    /// Top-level sections carried by this request, in a stable order
    pub fn sections(&self) -> Vec<Section> {
        let p = &self.properties;
        let present = [
            (Section::OsProfile, p.os_profile.is_some()),
            (Section::Identity, self.identity.is_some()),
            (Section::NetworkProfile, p.network_profile.is_some()),
            (Section::StorageProfile, p.storage_profile.is_some()),
            (Section::HardwareProfile, p.hardware_profile.is_some()),
            (Section::BillingProfile, p.billing_profile.is_some()),
            (Section::DiagnosticsProfile, p.diagnostics_profile.is_some()),
            (
                Section::AdditionalCapabilities,
                p.additional_capabilities.is_some(),
            ),
            (Section::Tags, self.tags.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(section, set)| set.then_some(section))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sections().is_empty()
    }
}

/// Runtime view of a machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceView {
    #[serde(default)]
    pub statuses: Vec<InstanceViewStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceViewStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_status: Option<String>,
}

impl InstanceViewStatus {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            display_status: None,
        }
    }
}

impl InstanceView {
    pub fn with_power_state(state: PowerState) -> Self {
        Self {
            statuses: vec![
                InstanceViewStatus::new("ProvisioningState/succeeded"),
                InstanceViewStatus::new(state.status_code()),
            ],
        }
    }

    /// Power state reported by the first `PowerState/...` status
    pub fn power_state(&self) -> PowerState {
        PowerState::from_statuses(self.statuses.iter().filter_map(|s| s.code.as_deref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<NetworkInterfaceProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceProperties {
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<IpConfigurationProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    #[serde(rename = "publicIPAddress", skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<PublicIpReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl NetworkInterface {
    /// Build an interface with one IP configuration per `(private, public ip id)`
    pub fn with_addresses<'a>(
        id: &str,
        configurations: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> Self {
        let ip_configurations = configurations
            .into_iter()
            .enumerate()
            .map(|(i, (private, public))| IpConfiguration {
                name: Some(format!("ipconfig{}", i + 1)),
                properties: Some(IpConfigurationProperties {
                    private_ip_address: Some(private.to_string()),
                    public_ip_address: public.map(|p| PublicIpReference {
                        id: Some(p.to_string()),
                    }),
                    primary: Some(i == 0),
                }),
            })
            .collect();
        Self {
            id: Some(id.to_string()),
            name: id.rsplit('/').next().map(str::to_string),
            properties: Some(NetworkInterfaceProperties { ip_configurations }),
        }
    }

    pub fn ip_configurations(&self) -> impl Iterator<Item = &IpConfigurationProperties> {
        self.properties
            .iter()
            .flat_map(|p| p.ip_configurations.iter())
            .filter_map(|c| c.properties.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<PublicIpAddressProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddressProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(rename = "publicIPAllocationMethod", skip_serializing_if = "Option::is_none")]
    pub allocation_method: Option<String>,
}

impl PublicIpAddress {
    /// Address assigned to this resource, if one has been allocated yet
    pub fn allocated_address(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.ip_address.as_deref())
            .filter(|a| !a.is_empty())
    }
}

/// An extension installed on a virtual machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineExtension {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<VirtualMachineExtensionProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineExtensionProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub extension_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_handler_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_upgrade_minor_version: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_update_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected_settings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_serializes_only_present_sections() {
        let update = VirtualMachineUpdate {
            properties: VirtualMachineUpdateProperties {
                hardware_profile: Some(HardwareProfile {
                    vm_size: "Standard_F4".to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "properties": { "hardwareProfile": { "vmSize": "Standard_F4" } }
            })
        );
        assert_eq!(update.sections(), vec![Section::HardwareProfile]);
    }

    #[test]
    fn test_empty_update_has_no_sections() {
        assert!(VirtualMachineUpdate::default().is_empty());
    }

    #[test]
    fn test_instance_view_power_state() {
        let view: InstanceView = serde_json::from_value(serde_json::json!({
            "statuses": [
                { "code": "ProvisioningState/succeeded" },
                { "code": "PowerState/deallocated", "displayStatus": "VM deallocated" }
            ]
        }))
        .unwrap();
        assert_eq!(view.power_state(), PowerState::Deallocated);
    }

    #[test]
    fn test_deserialize_machine_with_wire_names() {
        let vm: VirtualMachine = serde_json::from_value(serde_json::json!({
            "name": "web-1",
            "location": "westeurope",
            "identity": { "type": "SystemAssigned, UserAssigned", "principalId": "p" },
            "properties": {
                "hardwareProfile": { "vmSize": "Standard_F2" },
                "storageProfile": { "osDisk": { "diskSizeGB": 64, "caching": "ReadWrite" } },
                "additionalCapabilities": { "ultraSSDEnabled": true },
                "priority": "Spot",
                "evictionPolicy": "Deallocate",
                "billingProfile": { "maxPrice": -1 }
            }
        }))
        .unwrap();

        let props = vm.properties.unwrap();
        assert_eq!(
            vm.identity.unwrap().kind,
            IdentityType::SystemAssignedUserAssigned
        );
        assert_eq!(props.storage_profile.unwrap().os_disk.unwrap().disk_size_gb, Some(64));
        assert_eq!(
            props.additional_capabilities.unwrap().ultra_ssd_enabled,
            Some(true)
        );
        assert_eq!(props.priority, Some(Priority::Spot));
        assert_eq!(props.billing_profile.unwrap().max_price, -1.0);
    }

    #[test]
    fn test_public_ip_without_address_is_unallocated() {
        let ip = PublicIpAddress {
            properties: Some(PublicIpAddressProperties {
                ip_address: Some(String::new()),
                allocation_method: Some("Dynamic".to_string()),
            }),
            ..Default::default()
        };
        assert_eq!(ip.allocated_address(), None);
    }

    #[test]
    fn test_interface_with_addresses() {
        let nic = NetworkInterface::with_addresses(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic-1",
            [("10.0.0.4", Some("pip-1")), ("10.0.0.5", None)],
        );
        assert_eq!(nic.name.as_deref(), Some("nic-1"));
        let configs: Vec<_> = nic.ip_configurations().collect();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].primary, Some(true));
        assert!(configs[1].public_ip_address.is_none());
    }
}
