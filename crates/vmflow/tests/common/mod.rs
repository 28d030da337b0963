#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const VM_PATH: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-web/providers/Microsoft.Compute/virtualMachines/web-1";

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// `vmflow` running inside the project with colours and env overrides off
    pub fn vmflow(&self) -> Command {
        let mut cmd = Command::cargo_bin("vmflow").unwrap();
        cmd.current_dir(self.root.path())
            .env("NO_COLOR", "1")
            .env_remove("VMFLOW_CONFIG_PATH")
            .env_remove("RUST_LOG");
        cmd
    }
}

/// A Linux machine configuration in YAML with the given size and extra lines
#[allow(dead_code)]
pub fn machine_yaml(size: &str, extra: &str) -> String {
    format!(
        r#"name: web-1
resource_group: rg-web
location: westeurope
size: {size}
network_interface_ids:
  - /subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-web/providers/Microsoft.Network/networkInterfaces/web-1-nic
os:
  type: linux
  admin_username: adminuser
  admin_ssh_keys:
    - username: adminuser
      public_key: ssh-rsa AAAAB3NzaC1yc2E
source_image:
  reference:
    publisher: Canonical
    offer: 0001-com-ubuntu-server-jammy
    sku: 22_04-lts
    version: latest
{extra}"#
    )
}
