//! Extensions installed on virtual machines
//!
//! An extension takes the named lock of the machine it belongs to, so it
//! never races with an update or delete of that machine.

use crate::client::{ExtensionsClient, VirtualMachinesClient};
use crate::model::{VirtualMachineExtension, VirtualMachineExtensionProperties};
use crate::orchestrator::await_operation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use vmflow_cloud::{
    CloudError, OperationContext, OperationKind, PollConfig, ResourceLocks, Result,
    VirtualMachineExtensionId, VirtualMachineId,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineExtensionConfig {
    pub name: String,
    pub virtual_machine_id: String,
    pub publisher: String,
    pub extension_type: String,
    pub type_handler_version: String,
    #[serde(default = "default_true")]
    pub auto_upgrade_minor_version: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_update_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    /// Write-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_settings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl VirtualMachineExtensionConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("publisher", &self.publisher),
            ("extension_type", &self.extension_type),
            ("type_handler_version", &self.type_handler_version),
        ] {
            if value.trim().is_empty() {
                return Err(CloudError::invalid(format!("{field} must not be empty")));
            }
        }
        for (field, value) in [
            ("settings", &self.settings),
            ("protected_settings", &self.protected_settings),
        ] {
            if value.as_ref().is_some_and(|v| !v.is_object()) {
                return Err(CloudError::invalid(format!("{field} must be a JSON object")));
            }
        }
        Ok(())
    }

    pub fn extension_id(&self) -> Result<VirtualMachineExtensionId> {
        VirtualMachineId::parse(&self.virtual_machine_id)?.extension(&self.name)
    }

    fn to_request(&self, location: Option<String>) -> VirtualMachineExtension {
        VirtualMachineExtension {
            id: None,
            name: Some(self.name.clone()),
            location,
            tags: self.tags.clone(),
            properties: Some(VirtualMachineExtensionProperties {
                publisher: Some(self.publisher.clone()),
                extension_type: Some(self.extension_type.clone()),
                type_handler_version: Some(self.type_handler_version.clone()),
                auto_upgrade_minor_version: Some(self.auto_upgrade_minor_version),
                force_update_tag: self.force_update_tag.clone(),
                settings: self.settings.clone(),
                protected_settings: self.protected_settings.clone(),
                provisioning_state: None,
            }),
        }
    }
}

#[derive(Clone)]
pub struct ExtensionReconciler {
    compute: Arc<dyn VirtualMachinesClient>,
    extensions: Arc<dyn ExtensionsClient>,
    locks: Arc<ResourceLocks>,
    poll: PollConfig,
}

impl ExtensionReconciler {
    /// `locks` should be the registry the machine reconciler uses
    pub fn new(
        compute: Arc<dyn VirtualMachinesClient>,
        extensions: Arc<dyn ExtensionsClient>,
        locks: Arc<ResourceLocks>,
    ) -> Self {
        Self {
            compute,
            extensions,
            locks,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    pub async fn reconcile_create_or_update(
        &self,
        config: &VirtualMachineExtensionConfig,
        ctx: &OperationContext,
    ) -> Result<VirtualMachineExtension> {
        config.validate()?;
        let id = config.extension_id()?;
        let vm_id = id.virtual_machine_id()?;

        let mut lock = self.locks.acquire_within(&vm_id.lock_key(), ctx).await?;

        let vm = ctx
            .run(&format!("read of {vm_id}"), self.compute.get(&vm_id))
            .await?
            .map_err(|e| e.during(OperationKind::Read, &vm_id))?;

        tracing::info!(resource = %id, "Installing virtual machine extension");
        let request = config.to_request(vm.location);
        await_operation(
            OperationKind::Create,
            &id.to_string(),
            ctx,
            &self.poll,
            self.extensions.create_or_update(&id, &request),
        )
        .await?;

        lock.release();
        self.read(&id, ctx)
            .await?
            .ok_or_else(|| CloudError::NotFound(id.to_string()))
    }

    /// The extension, or `None` when it or its machine is gone
    pub async fn read(
        &self,
        id: &VirtualMachineExtensionId,
        ctx: &OperationContext,
    ) -> Result<Option<VirtualMachineExtension>> {
        let vm_id = id.virtual_machine_id()?;
        let vm = ctx
            .run(&format!("read of {vm_id}"), self.compute.get(&vm_id))
            .await?;
        match vm {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(resource = %id, "Parent virtual machine not found");
                return Ok(None);
            }
            Err(e) => return Err(e.during(OperationKind::Read, &vm_id)),
        }

        match ctx
            .run(&format!("read of {id}"), self.extensions.get(id))
            .await?
        {
            Ok(extension) => Ok(Some(extension)),
            Err(e) if e.is_not_found() => {
                tracing::debug!(resource = %id, "Extension not found");
                Ok(None)
            }
            Err(e) => Err(e.during(OperationKind::Read, id)),
        }
    }

    pub async fn reconcile_delete(
        &self,
        id: &VirtualMachineExtensionId,
        ctx: &OperationContext,
    ) -> Result<()> {
        let vm_id = id.virtual_machine_id()?;
        let _lock = self.locks.acquire_within(&vm_id.lock_key(), ctx).await?;

        tracing::info!(resource = %id, "Removing virtual machine extension");
        await_operation(
            OperationKind::Delete,
            &id.to_string(),
            ctx,
            &self.poll,
            self.extensions.delete(id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VirtualMachineExtensionConfig {
        VirtualMachineExtensionConfig {
            name: "hostname".to_string(),
            virtual_machine_id: "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/web-1".to_string(),
            publisher: "Microsoft.Azure.Extensions".to_string(),
            extension_type: "CustomScript".to_string(),
            type_handler_version: "2.0".to_string(),
            auto_upgrade_minor_version: true,
            force_update_tag: None,
            settings: Some(serde_json::json!({ "commandToExecute": "hostname" })),
            protected_settings: None,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        config().validate().unwrap();
        let id = config().extension_id().unwrap();
        assert_eq!(id.name(), "hostname");
        assert_eq!(id.virtual_machine_name(), "web-1");
    }

    #[test]
    fn test_settings_must_be_objects() {
        let mut c = config();
        c.settings = Some(serde_json::json!(["not", "an", "object"]));
        assert!(matches!(
            c.validate(),
            Err(CloudError::InvalidConfiguration(_))
        ));

        let mut c = config();
        c.protected_settings = Some(serde_json::json!("secret"));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_required_fields() {
        let mut c = config();
        c.type_handler_version = String::new();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_bad_machine_id() {
        let mut c = config();
        c.virtual_machine_id = "/subscriptions/s/providers/Microsoft.Compute/virtualMachines/web-1".to_string();
        assert!(matches!(
            c.extension_id(),
            Err(CloudError::MalformedPath { .. })
        ));
    }

    #[test]
    fn test_request_inherits_location() {
        let request = config().to_request(Some("westeurope".to_string()));
        assert_eq!(request.location.as_deref(), Some("westeurope"));
        let props = request.properties.unwrap();
        assert_eq!(props.extension_type.as_deref(), Some("CustomScript"));
    }
}
