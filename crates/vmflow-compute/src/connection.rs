//! Best-effort connection details for a virtual machine
//!
//! Addresses are collected from every attached network interface. A lookup
//! that fails for any reason contributes nothing; resolution as a whole
//! never fails.

use crate::client::NetworkClient;
use crate::model::{NetworkInterface, NetworkProfile};
use crate::os::OsFamily;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vmflow_cloud::{NetworkInterfaceId, OperationContext, PublicIpAddressId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerKind {
    Ssh,
    Winrm,
}

impl std::fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionerKind::Ssh => write!(f, "ssh"),
            ProvisionerKind::Winrm => write!(f, "winrm"),
        }
    }
}

/// Addresses a machine can be reached at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// First private address found, empty when there is none
    pub primary_private_address: String,
    pub private_addresses: Vec<String>,
    /// First public address found, empty when there is none
    pub primary_public_address: String,
    pub public_addresses: Vec<String>,
}

impl ConnectionInfo {
    pub fn from_addresses(private_addresses: Vec<String>, public_addresses: Vec<String>) -> Self {
        Self {
            primary_private_address: private_addresses.first().cloned().unwrap_or_default(),
            primary_public_address: public_addresses.first().cloned().unwrap_or_default(),
            private_addresses,
            public_addresses,
        }
    }

    /// Public address if there is one, the private one otherwise
    pub fn reachable_address(&self) -> Option<&str> {
        [&self.primary_public_address, &self.primary_private_address]
            .into_iter()
            .find(|a| !a.is_empty())
            .map(String::as_str)
    }

    pub fn provisioner_kind(os: OsFamily) -> ProvisionerKind {
        match os {
            OsFamily::Linux => ProvisionerKind::Ssh,
            OsFamily::Windows => ProvisionerKind::Winrm,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.private_addresses.is_empty() && self.public_addresses.is_empty()
    }
}

#[derive(Debug, Default)]
struct InterfaceAddresses {
    private: Vec<String>,
    public: Vec<String>,
}

/// Collects addresses across interfaces and their public IPs
#[derive(Clone)]
pub struct ConnectionResolver {
    network: Arc<dyn NetworkClient>,
}

impl ConnectionResolver {
    pub fn new(network: Arc<dyn NetworkClient>) -> Self {
        Self { network }
    }

    /// Resolve addresses for every interface in `profile`, in profile order
    pub async fn resolve(
        &self,
        profile: Option<&NetworkProfile>,
        ctx: &OperationContext,
    ) -> ConnectionInfo {
        let Some(profile) = profile else {
            return ConnectionInfo::default();
        };

        let lookups = profile
            .network_interfaces
            .iter()
            .map(|nic| self.interface_addresses(&nic.id, ctx));
        let mut private = Vec::new();
        let mut public = Vec::new();
        for found in join_all(lookups).await {
            private.extend(found.private);
            public.extend(found.public);
        }

        ConnectionInfo::from_addresses(private, public)
    }

    async fn interface_addresses(&self, raw_id: &str, ctx: &OperationContext) -> InterfaceAddresses {
        let id = match NetworkInterfaceId::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(interface = %raw_id, error = %e, "Skipping interface with malformed id");
                return InterfaceAddresses::default();
            }
        };

        let nic = match ctx.run("get network interface", self.network.get_interface(&id)).await {
            Ok(Ok(Some(nic))) => nic,
            Ok(Ok(None)) => {
                tracing::warn!(interface = %id, "Network interface not found");
                return InterfaceAddresses::default();
            }
            Ok(Err(e)) | Err(e) => {
                tracing::warn!(interface = %id, error = %e, "Failed to read network interface");
                return InterfaceAddresses::default();
            }
        };

        self.addresses_of(&nic, ctx).await
    }

    async fn addresses_of(&self, nic: &NetworkInterface, ctx: &OperationContext) -> InterfaceAddresses {
        let mut found = InterfaceAddresses::default();
        for config in nic.ip_configurations() {
            if let Some(private) = config.private_ip_address.as_deref().filter(|a| !a.is_empty()) {
                found.private.push(private.to_string());
            }
            let public_id = config.public_ip_address.as_ref().and_then(|p| p.id.as_deref());
            if let Some(public_id) = public_id {
                found.public.extend(self.public_address(public_id, ctx).await);
            }
        }
        found
    }

    async fn public_address(&self, raw_id: &str, ctx: &OperationContext) -> Option<String> {
        let id = match PublicIpAddressId::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(public_ip = %raw_id, error = %e, "Skipping public IP with malformed id");
                return None;
            }
        };

        match ctx.run("get public ip", self.network.get_public_ip(&id)).await {
            Ok(Ok(Some(ip))) => {
                let address = ip.allocated_address().map(str::to_string);
                if address.is_none() {
                    tracing::debug!(public_ip = %id, "Public IP has no address allocated yet");
                }
                address
            }
            Ok(Ok(None)) => {
                tracing::warn!(public_ip = %id, "Public IP not found");
                None
            }
            Ok(Err(e)) | Err(e) => {
                tracing::warn!(public_ip = %id, error = %e, "Failed to read public IP");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_address_prefers_public() {
        let info = ConnectionInfo::from_addresses(
            vec!["10.0.0.4".to_string()],
            vec!["52.1.2.3".to_string()],
        );
        assert_eq!(info.reachable_address(), Some("52.1.2.3"));
        assert_eq!(info.primary_private_address, "10.0.0.4");
    }

    #[test]
    fn test_reachable_address_falls_back_to_private() {
        let info = ConnectionInfo::from_addresses(vec!["10.0.0.4".to_string()], Vec::new());
        assert_eq!(info.reachable_address(), Some("10.0.0.4"));
        assert_eq!(info.primary_public_address, "");
    }

    #[test]
    fn test_empty_info() {
        let info = ConnectionInfo::default();
        assert!(info.is_empty());
        assert_eq!(info.reachable_address(), None);
    }

    #[test]
    fn test_provisioner_kind() {
        assert_eq!(
            ConnectionInfo::provisioner_kind(OsFamily::Linux),
            ProvisionerKind::Ssh
        );
        assert_eq!(
            ConnectionInfo::provisioner_kind(OsFamily::Windows).to_string(),
            "winrm"
        );
    }
}
