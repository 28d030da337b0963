use std::sync::Arc;
use std::time::Duration;
use vmflow_cloud::{PollConfig, PublicIpAddressId, VirtualMachineId};
use vmflow_compute::model::NetworkInterface;
use vmflow_compute::testing::FakeCloud;
use vmflow_compute::{PowerState, VirtualMachineConfig, VirtualMachineReconciler};

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";
pub const RESOURCE_GROUP: &str = "rg-web";

pub fn nic_id(name: &str) -> String {
    format!(
        "/subscriptions/{SUBSCRIPTION}/resourceGroups/{RESOURCE_GROUP}/providers/Microsoft.Network/networkInterfaces/{name}"
    )
}

pub fn public_ip_id(name: &str) -> String {
    format!(
        "/subscriptions/{SUBSCRIPTION}/resourceGroups/{RESOURCE_GROUP}/providers/Microsoft.Network/publicIPAddresses/{name}"
    )
}

/// A valid Linux machine with one interface named `{name}-nic`
pub fn linux_config(name: &str) -> VirtualMachineConfig {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "resource_group": RESOURCE_GROUP,
        "location": "westeurope",
        "size": "Standard_F2",
        "network_interface_ids": [nic_id(&format!("{name}-nic"))],
        "os": {
            "type": "linux",
            "admin_username": "adminuser",
            "admin_ssh_keys": [
                { "username": "adminuser", "public_key": "ssh-rsa AAAAB3NzaC1yc2E" }
            ]
        },
        "source_image": {
            "reference": {
                "publisher": "Canonical",
                "offer": "0001-com-ubuntu-server-jammy",
                "sku": "22_04-lts",
                "version": "latest"
            }
        }
    }))
    .unwrap()
}

/// Poll quickly so tests do not wait on the default cadence
pub fn fast_poll() -> PollConfig {
    PollConfig {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(50),
        multiplier: 2.0,
    }
}

pub struct Harness {
    pub cloud: Arc<FakeCloud>,
    pub reconciler: VirtualMachineReconciler,
}

impl Harness {
    pub fn new() -> Self {
        let cloud = Arc::new(FakeCloud::new());
        let reconciler = VirtualMachineReconciler::new(SUBSCRIPTION, cloud.clone(), cloud.clone())
            .with_poll_config(fast_poll());
        Self { cloud, reconciler }
    }

    pub fn vm_id(&self, name: &str) -> VirtualMachineId {
        VirtualMachineId::new(SUBSCRIPTION, RESOURCE_GROUP, name).unwrap()
    }

    /// Store a machine built from `linux_config(name)` and return its id and config
    pub fn existing(&self, name: &str, power: PowerState) -> (VirtualMachineId, VirtualMachineConfig) {
        let id = self.vm_id(name);
        let config = linux_config(name);
        self.cloud.with_machine(&id, &config, power);
        (id, config)
    }

    /// Give `{name}-nic` one private address and, optionally, a public IP
    #[allow(dead_code)]
    pub fn attach_interface(&self, name: &str, private: &str, public: Option<(&str, Option<&str>)>) {
        let public_id = public.map(|(ip_name, _)| public_ip_id(ip_name));
        let nic = NetworkInterface::with_addresses(
            &nic_id(&format!("{name}-nic")),
            [(private, public_id.as_deref())],
        );
        self.cloud.insert_interface(nic);
        if let (Some(id), Some((_, address))) = (public_id, public) {
            let id = PublicIpAddressId::parse(&id).unwrap();
            self.cloud.insert_public_ip(&id, address);
        }
    }
}
