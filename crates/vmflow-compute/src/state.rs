//! Observed state of a virtual machine

use crate::config::VirtualMachineConfig;
use crate::connection::ConnectionInfo;
use crate::model::VirtualMachine;
use serde::{Deserialize, Serialize};
use vmflow_cloud::{Result, VirtualMachineId};

const POWER_STATE_PREFIX: &str = "powerstate/";

/// Power state as reported by the instance view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    Unknown,
}

impl PowerState {
    /// Parse a single status code such as `PowerState/running`.
    ///
    /// Returns `None` for codes that are not power states at all.
    pub fn from_code(code: &str) -> Option<Self> {
        let lower = code.to_ascii_lowercase();
        let state = lower.strip_prefix(POWER_STATE_PREFIX)?;
        Some(match state {
            "starting" => PowerState::Starting,
            "running" => PowerState::Running,
            "stopping" => PowerState::Stopping,
            "stopped" => PowerState::Stopped,
            "deallocating" => PowerState::Deallocating,
            "deallocated" => PowerState::Deallocated,
            _ => PowerState::Unknown,
        })
    }

    /// Power state from a list of status codes; a machine that reports none
    /// is assumed to be running
    pub fn from_statuses<'a>(codes: impl IntoIterator<Item = &'a str>) -> Self {
        codes
            .into_iter()
            .find_map(Self::from_code)
            .unwrap_or(PowerState::Running)
    }

    /// Stopped, deallocated, or on its way to deallocated
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            PowerState::Stopped | PowerState::Deallocated | PowerState::Deallocating
        )
    }

    pub fn status_code(&self) -> String {
        format!("PowerState/{self}")
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PowerState::Starting => "starting",
            PowerState::Running => "running",
            PowerState::Stopping => "stopping",
            PowerState::Stopped => "stopped",
            PowerState::Deallocating => "deallocating",
            PowerState::Deallocated => "deallocated",
            PowerState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Everything a read of one machine produces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteState {
    pub id: VirtualMachineId,
    pub machine: VirtualMachine,
    pub power_state: PowerState,
    pub connection: ConnectionInfo,
}

impl RemoteState {
    /// Project the remote document back onto a configuration.
    ///
    /// Write-only fields (admin password, custom data) are never returned by
    /// the API and come back empty; see
    /// [`VirtualMachineConfig::carry_write_only_fields`].
    pub fn observed_config(&self) -> Result<VirtualMachineConfig> {
        VirtualMachineConfig::from_remote(&self.id, &self.machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_is_case_insensitive() {
        assert_eq!(
            PowerState::from_code("PowerState/running"),
            Some(PowerState::Running)
        );
        assert_eq!(
            PowerState::from_code("powerstate/DEALLOCATED"),
            Some(PowerState::Deallocated)
        );
        assert_eq!(
            PowerState::from_code("PowerState/hibernated"),
            Some(PowerState::Unknown)
        );
        assert_eq!(PowerState::from_code("ProvisioningState/succeeded"), None);
    }

    #[test]
    fn test_missing_power_state_assumes_running() {
        assert_eq!(
            PowerState::from_statuses(["ProvisioningState/succeeded"]),
            PowerState::Running
        );
        assert_eq!(PowerState::from_statuses([]), PowerState::Running);
    }

    #[test]
    fn test_is_stopped() {
        assert!(PowerState::Stopped.is_stopped());
        assert!(PowerState::Deallocated.is_stopped());
        assert!(PowerState::Deallocating.is_stopped());
        assert!(!PowerState::Running.is_stopped());
        assert!(!PowerState::Starting.is_stopped());
        assert!(!PowerState::Stopping.is_stopped());
        assert!(!PowerState::Unknown.is_stopped());
    }

    #[test]
    fn test_status_code_round_trips() {
        let code = PowerState::Deallocating.status_code();
        assert_eq!(code, "PowerState/deallocating");
        assert_eq!(PowerState::from_code(&code), Some(PowerState::Deallocating));
    }
}
