//! Operating-system specific configuration
//!
//! Linux and Windows machines share one reconciliation core. Everything that
//! differs between the two families sits behind [`OsProfileSpec`]: validation,
//! the request fragment sent on create, field-level diffing and the partial
//! fragment sent on update.

use crate::model::{LinuxConfiguration, OsProfile, SshConfiguration, SshPublicKey, WindowsConfiguration};
use crate::planner::Field;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vmflow_cloud::{CloudError, Result};

const LINUX_COMPUTER_NAME_MAX: usize = 64;
const WINDOWS_COMPUTER_NAME_MAX: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Windows => write!(f, "windows"),
        }
    }
}

/// Capabilities every OS variant provides to the planner and request builder
pub trait OsProfileSpec {
    fn family(&self) -> OsFamily;

    fn admin_username(&self) -> &str;

    fn provision_vm_agent(&self) -> bool;

    fn max_computer_name_len(&self) -> usize;

    /// Reject combinations the platform refuses
    fn validate(&self) -> Result<()>;

    /// Fill the OS-specific parts of a full create request
    fn to_request_fragment(&self, profile: &mut OsProfile);

    /// Fill only the OS-specific parts listed in `changed`
    fn update_fragment(&self, changed: &BTreeSet<Field>, profile: &mut OsProfile);

    /// Fields that differ from `previous`
    fn diff(&self, previous: &Self) -> Vec<Field>
    where
        Self: Sized;

    /// Whether a change to `field` can only be applied by re-creating the machine
    fn requires_replacement(&self, field: Field) -> bool {
        !field.is_mutable()
    }
}

/// An SSH key authorised for a user on a Linux machine
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SshKey {
    pub username: String,
    pub public_key: String,
}

impl SshKey {
    pub fn authorized_keys_path(&self) -> String {
        format!("/home/{}/.ssh/authorized_keys", self.username)
    }

    fn from_wire(key: &SshPublicKey) -> Self {
        let username = key
            .path
            .strip_prefix("/home/")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        Self {
            username,
            public_key: key.key_data.clone(),
        }
    }

    fn to_wire(&self) -> SshPublicKey {
        SshPublicKey {
            path: self.authorized_keys_path(),
            key_data: self.public_key.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxConfig {
    pub admin_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub admin_ssh_keys: Vec<SshKey>,
    #[serde(default = "default_true")]
    pub disable_password_authentication: bool,
    #[serde(default = "default_true")]
    pub provision_vm_agent: bool,
}

impl LinuxConfig {
    fn sorted_keys(&self) -> Vec<&SshKey> {
        let mut keys: Vec<_> = self.admin_ssh_keys.iter().collect();
        keys.sort();
        keys
    }

    fn ssh(&self) -> Option<SshConfiguration> {
        if self.admin_ssh_keys.is_empty() {
            return None;
        }
        Some(SshConfiguration {
            public_keys: self.admin_ssh_keys.iter().map(SshKey::to_wire).collect(),
        })
    }

    pub(crate) fn from_wire(profile: &OsProfile, linux: &LinuxConfiguration) -> Self {
        Self {
            admin_username: profile.admin_username.clone().unwrap_or_default(),
            admin_password: None,
            admin_ssh_keys: linux
                .ssh
                .iter()
                .flat_map(|s| s.public_keys.iter())
                .map(SshKey::from_wire)
                .collect(),
            disable_password_authentication: linux
                .disable_password_authentication
                .unwrap_or(true),
            provision_vm_agent: linux.provision_vm_agent.unwrap_or(true),
        }
    }
}

impl OsProfileSpec for LinuxConfig {
    fn family(&self) -> OsFamily {
        OsFamily::Linux
    }

    fn admin_username(&self) -> &str {
        &self.admin_username
    }

    fn provision_vm_agent(&self) -> bool {
        self.provision_vm_agent
    }

    fn max_computer_name_len(&self) -> usize {
        LINUX_COMPUTER_NAME_MAX
    }

    fn validate(&self) -> Result<()> {
        if self.admin_username.trim().is_empty() {
            return Err(CloudError::invalid("admin_username must not be empty"));
        }
        let has_password = self.admin_password.as_deref().is_some_and(|p| !p.is_empty());
        if self.disable_password_authentication {
            if self.admin_ssh_keys.is_empty() {
                return Err(CloudError::invalid(
                    "at least one admin_ssh_key is required when password authentication is disabled",
                ));
            }
        } else if !has_password {
            return Err(CloudError::invalid(
                "admin_password is required when password authentication is enabled",
            ));
        }
        if let Some(key) = self
            .admin_ssh_keys
            .iter()
            .find(|k| k.public_key.trim().is_empty() || k.username.trim().is_empty())
        {
            return Err(CloudError::invalid(format!(
                "ssh key for user {:?} needs both a username and a public key",
                key.username
            )));
        }
        Ok(())
    }

    fn to_request_fragment(&self, profile: &mut OsProfile) {
        profile.admin_username = Some(self.admin_username.clone());
        // a password is only sent while password authentication is on
        profile.admin_password = if self.disable_password_authentication {
            None
        } else {
            self.admin_password.clone()
        };
        profile.linux_configuration = Some(LinuxConfiguration {
            disable_password_authentication: Some(self.disable_password_authentication),
            provision_vm_agent: Some(self.provision_vm_agent),
            ssh: self.ssh(),
        });
    }

    fn update_fragment(&self, changed: &BTreeSet<Field>, profile: &mut OsProfile) {
        let touches_keys = changed.contains(&Field::AdminSshKeys);
        let touches_auth = changed.contains(&Field::PasswordAuthentication);
        if !touches_keys && !touches_auth {
            return;
        }
        let linux = profile.linux_configuration.get_or_insert_with(Default::default);
        if touches_keys {
            linux.ssh = Some(self.ssh().unwrap_or_default());
        }
        if touches_auth {
            linux.disable_password_authentication = Some(self.disable_password_authentication);
        }
    }

    fn diff(&self, previous: &Self) -> Vec<Field> {
        let mut changed = Vec::new();
        if self.admin_username != previous.admin_username {
            changed.push(Field::AdminUsername);
        }
        if self.admin_password != previous.admin_password {
            changed.push(Field::AdminPassword);
        }
        if self.sorted_keys() != previous.sorted_keys() {
            changed.push(Field::AdminSshKeys);
        }
        if self.disable_password_authentication != previous.disable_password_authentication {
            changed.push(Field::PasswordAuthentication);
        }
        if self.provision_vm_agent != previous.provision_vm_agent {
            changed.push(Field::ProvisionVmAgent);
        }
        changed
    }

    fn requires_replacement(&self, field: Field) -> bool {
        field == Field::AdminPassword || !field.is_mutable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsConfig {
    pub admin_username: String,
    /// Write-only; empty when projected from a remote read
    #[serde(default)]
    pub admin_password: String,
    #[serde(default = "default_true")]
    pub enable_automatic_updates: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default = "default_true")]
    pub provision_vm_agent: bool,
}

impl WindowsConfig {
    pub(crate) fn from_wire(profile: &OsProfile, windows: &WindowsConfiguration) -> Self {
        Self {
            admin_username: profile.admin_username.clone().unwrap_or_default(),
            admin_password: String::new(),
            enable_automatic_updates: windows.enable_automatic_updates.unwrap_or(true),
            timezone: windows.time_zone.clone(),
            provision_vm_agent: windows.provision_vm_agent.unwrap_or(true),
        }
    }
}

impl OsProfileSpec for WindowsConfig {
    fn family(&self) -> OsFamily {
        OsFamily::Windows
    }

    fn admin_username(&self) -> &str {
        &self.admin_username
    }

    fn provision_vm_agent(&self) -> bool {
        self.provision_vm_agent
    }

    fn max_computer_name_len(&self) -> usize {
        WINDOWS_COMPUTER_NAME_MAX
    }

    fn validate(&self) -> Result<()> {
        if self.admin_username.trim().is_empty() {
            return Err(CloudError::invalid("admin_username must not be empty"));
        }
        if self.admin_password.is_empty() {
            return Err(CloudError::invalid(
                "admin_password is required for Windows machines",
            ));
        }
        Ok(())
    }

    fn to_request_fragment(&self, profile: &mut OsProfile) {
        profile.admin_username = Some(self.admin_username.clone());
        profile.admin_password = Some(self.admin_password.clone());
        profile.windows_configuration = Some(WindowsConfiguration {
            enable_automatic_updates: Some(self.enable_automatic_updates),
            provision_vm_agent: Some(self.provision_vm_agent),
            time_zone: self.timezone.clone(),
        });
    }

    fn update_fragment(&self, changed: &BTreeSet<Field>, profile: &mut OsProfile) {
        if changed.contains(&Field::AdminPassword) {
            profile.admin_password = Some(self.admin_password.clone());
        }
        let touches_updates = changed.contains(&Field::AutomaticUpdates);
        let touches_timezone = changed.contains(&Field::Timezone);
        if !touches_updates && !touches_timezone {
            return;
        }
        let windows = profile
            .windows_configuration
            .get_or_insert_with(Default::default);
        if touches_updates {
            windows.enable_automatic_updates = Some(self.enable_automatic_updates);
        }
        if touches_timezone {
            windows.time_zone = self.timezone.clone();
        }
    }

    fn diff(&self, previous: &Self) -> Vec<Field> {
        let mut changed = Vec::new();
        if self.admin_username != previous.admin_username {
            changed.push(Field::AdminUsername);
        }
        if self.admin_password != previous.admin_password {
            changed.push(Field::AdminPassword);
        }
        if self.enable_automatic_updates != previous.enable_automatic_updates {
            changed.push(Field::AutomaticUpdates);
        }
        if self.timezone != previous.timezone {
            changed.push(Field::Timezone);
        }
        if self.provision_vm_agent != previous.provision_vm_agent {
            changed.push(Field::ProvisionVmAgent);
        }
        changed
    }
}

/// OS-specific part of a machine's desired configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OsConfiguration {
    Linux(LinuxConfig),
    Windows(WindowsConfig),
}

impl OsConfiguration {
    pub fn spec(&self) -> &dyn OsProfileSpec {
        match self {
            OsConfiguration::Linux(linux) => linux,
            OsConfiguration::Windows(windows) => windows,
        }
    }

    pub fn family(&self) -> OsFamily {
        self.spec().family()
    }

    /// Field changes against a previous configuration. Switching family is a
    /// single [`Field::OsFamily`] change.
    pub fn diff(&self, previous: &OsConfiguration) -> Vec<Field> {
        match (self, previous) {
            (OsConfiguration::Linux(a), OsConfiguration::Linux(b)) => a.diff(b),
            (OsConfiguration::Windows(a), OsConfiguration::Windows(b)) => a.diff(b),
            _ => vec![Field::OsFamily],
        }
    }

    pub fn requires_replacement(&self, field: Field) -> bool {
        self.spec().requires_replacement(field)
    }

    pub(crate) fn carry_password_from(&mut self, other: &OsConfiguration) {
        match (self, other) {
            (OsConfiguration::Linux(a), OsConfiguration::Linux(b)) if a.admin_password.is_none() => {
                a.admin_password = b.admin_password.clone();
            }
            (OsConfiguration::Windows(a), OsConfiguration::Windows(b)) if a.admin_password.is_empty() => {
                a.admin_password = b.admin_password.clone();
            }
            _ => {}
        }
    }
}
