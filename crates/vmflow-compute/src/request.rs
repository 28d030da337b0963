//! Building create and partial-update requests from a configuration

use crate::config::{IdentityConfig, VirtualMachineConfig, normalize_location};
use crate::model::{
    AdditionalCapabilities, BillingProfile, BootDiagnostics, DiagnosticsProfile, HardwareProfile,
    ManagedDiskParameters, MarketplacePlan, NetworkInterfaceReference,
    NetworkInterfaceReferenceProperties, NetworkProfile, OsDisk, OsProfile, Priority,
    StorageProfile, SubResource, VirtualMachine, VirtualMachineProperties, VirtualMachineUpdate,
    VirtualMachineUpdateProperties,
};
use crate::planner::{Field, UpdatePlan};

impl VirtualMachineConfig {
    fn hardware_profile(&self) -> HardwareProfile {
        HardwareProfile {
            vm_size: self.size.clone(),
        }
    }

    fn network_profile(&self) -> NetworkProfile {
        // the first interface is the primary one
        let network_interfaces = self
            .network_interface_ids
            .iter()
            .enumerate()
            .map(|(i, id)| NetworkInterfaceReference {
                id: id.clone(),
                properties: Some(NetworkInterfaceReferenceProperties { primary: i == 0 }),
            })
            .collect();
        NetworkProfile { network_interfaces }
    }

    fn os_disk(&self) -> OsDisk {
        OsDisk {
            name: None,
            caching: Some(self.os_disk.caching.as_str().to_string()),
            disk_size_gb: self.os_disk.disk_size_gb,
            create_option: None,
            managed_disk: Some(ManagedDiskParameters {
                id: None,
                storage_account_type: Some(self.os_disk.storage_account_type.as_str().to_string()),
            }),
            write_accelerator_enabled: Some(self.os_disk.write_accelerator_enabled),
        }
    }

    fn diagnostics_profile(&self) -> DiagnosticsProfile {
        let boot_diagnostics = match &self.boot_diagnostics {
            Some(diag) => BootDiagnostics {
                enabled: true,
                storage_uri: Some(diag.storage_account_uri.clone()),
            },
            None => BootDiagnostics {
                enabled: false,
                storage_uri: None,
            },
        };
        DiagnosticsProfile {
            boot_diagnostics: Some(boot_diagnostics),
        }
    }

    fn billing_profile(&self) -> BillingProfile {
        BillingProfile {
            max_price: self.max_bid_price,
        }
    }

    fn additional_capabilities_wire(&self) -> AdditionalCapabilities {
        AdditionalCapabilities {
            ultra_ssd_enabled: Some(self.ultra_ssd_enabled()),
        }
    }

    /// Full document for a create call
    pub fn to_create_request(&self) -> VirtualMachine {
        let mut os_profile = OsProfile {
            computer_name: Some(self.effective_computer_name().to_string()),
            custom_data: self.custom_data.clone(),
            allow_extension_operations: Some(self.allow_extension_operations),
            secrets: Some(self.secrets_to_wire()),
            ..Default::default()
        };
        self.os.spec().to_request_fragment(&mut os_profile);

        let mut os_disk = self.os_disk();
        os_disk.create_option = Some("FromImage".to_string());

        let properties = VirtualMachineProperties {
            hardware_profile: Some(self.hardware_profile()),
            storage_profile: Some(StorageProfile {
                image_reference: self.source_image_to_wire(),
                os_disk: Some(os_disk),
                data_disks: Some(Vec::new()),
            }),
            os_profile: Some(os_profile),
            network_profile: Some(self.network_profile()),
            diagnostics_profile: Some(self.diagnostics_profile()),
            billing_profile: (self.priority == Priority::Spot).then(|| self.billing_profile()),
            additional_capabilities: self
                .additional_capabilities
                .as_ref()
                .map(|_| self.additional_capabilities_wire()),
            availability_set: self.availability_set_id.as_ref().map(SubResource::new),
            proximity_placement_group: self
                .proximity_placement_group_id
                .as_ref()
                .map(SubResource::new),
            host: self.dedicated_host_id.as_ref().map(SubResource::new),
            priority: Some(self.priority),
            eviction_policy: self.eviction_policy,
            ..Default::default()
        };

        VirtualMachine {
            id: None,
            name: Some(self.name.clone()),
            location: Some(normalize_location(&self.location)),
            identity: self.identity.as_ref().map(IdentityConfig::to_wire),
            plan: self.plan.as_ref().map(|p| MarketplacePlan {
                name: p.name.clone(),
                product: p.product.clone(),
                publisher: p.publisher.clone(),
            }),
            zones: self.zone.as_ref().map(|z| vec![z.clone()]),
            tags: self.tags.clone(),
            properties: Some(properties),
        }
    }

    /// Partial update carrying only the sections `plan` changes
    pub fn to_update_request(&self, plan: &UpdatePlan) -> VirtualMachineUpdate {
        let changed = &plan.fields_changed;
        let touches = |fields: &[Field]| fields.iter().any(|f| changed.contains(f));
        let mut update = VirtualMachineUpdate::default();
        let props: &mut VirtualMachineUpdateProperties = &mut update.properties;

        if touches(&[
            Field::AdminSshKeys,
            Field::PasswordAuthentication,
            Field::AdminPassword,
            Field::CustomData,
            Field::Secrets,
            Field::AutomaticUpdates,
            Field::Timezone,
        ]) {
            let mut os_profile = OsProfile::default();
            if changed.contains(&Field::CustomData) {
                // clearing is sent as an empty string
                os_profile.custom_data = Some(self.custom_data.clone().unwrap_or_default());
            }
            if changed.contains(&Field::Secrets) {
                os_profile.secrets = Some(self.secrets_to_wire());
            }
            self.os.spec().update_fragment(changed, &mut os_profile);
            props.os_profile = Some(os_profile);
        }

        if changed.contains(&Field::NetworkInterfaces) {
            props.network_profile = Some(self.network_profile());
        }

        if touches(&[
            Field::OsDiskSize,
            Field::OsDiskCaching,
            Field::OsDiskStorageType,
            Field::OsDiskWriteAccelerator,
        ]) {
            props.storage_profile = Some(StorageProfile {
                image_reference: None,
                os_disk: Some(self.os_disk()),
                data_disks: None,
            });
        }

        if changed.contains(&Field::Size) {
            props.hardware_profile = Some(self.hardware_profile());
        }
        if changed.contains(&Field::MaxBidPrice) {
            props.billing_profile = Some(self.billing_profile());
        }
        if changed.contains(&Field::BootDiagnostics) {
            props.diagnostics_profile = Some(self.diagnostics_profile());
        }
        if changed.contains(&Field::AdditionalCapabilities) {
            props.additional_capabilities = Some(self.additional_capabilities_wire());
        }

        if changed.contains(&Field::Identity) {
            update.identity = Some(
                self.identity
                    .as_ref()
                    .map(IdentityConfig::to_wire)
                    .unwrap_or_else(IdentityConfig::disabled),
            );
        }
        if changed.contains(&Field::Tags) {
            update.tags = Some(self.tags.clone());
        }

        update
    }
}
