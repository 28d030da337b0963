//! Runtime settings for the reconcilers

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use vmflow_cloud::{OperationContext, OperationKind, PollConfig};
use vmflow_compute::{ExtensionReconciler, ShutdownPolicy, VirtualMachineReconciler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub poll: PollSettings,
    pub timeouts: TimeoutSettings,
    /// Refuse to create a machine that already exists
    pub require_import: bool,
    /// Field name to shutdown rule name, applied over the built-in table
    pub shutdown_policy: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            timeouts: TimeoutSettings::default(),
            require_import: true,
            shutdown_policy: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2000,
            max_interval_ms: 30_000,
            multiplier: 1.5,
        }
    }
}

impl PollSettings {
    pub fn to_poll_config(&self) -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Per-operation deadlines, in minutes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    pub create: u64,
    pub read: u64,
    pub update: u64,
    pub delete: u64,
    pub extension: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create: 45,
            read: 5,
            update: 45,
            delete: 45,
            extension: 30,
        }
    }
}

/// Longest deadline a settings file may ask for: one week
pub const MAX_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

impl TimeoutSettings {
    /// Deadline for a machine operation. Power changes happen inside an
    /// update and share its deadline; lookups share the read deadline.
    pub fn for_operation(&self, op: OperationKind) -> Duration {
        match op {
            OperationKind::Create => minutes(self.create),
            OperationKind::Update | OperationKind::PowerOff | OperationKind::Start => {
                minutes(self.update)
            }
            OperationKind::Delete => minutes(self.delete),
            OperationKind::Read | OperationKind::ListSizes | OperationKind::InstanceView => {
                minutes(self.read)
            }
        }
    }

    pub fn extension(&self) -> Duration {
        minutes(self.extension)
    }

    /// Context bounded by the deadline for `op`
    pub fn context_for(&self, op: OperationKind) -> OperationContext {
        OperationContext::with_timeout(self.for_operation(op))
    }

    pub fn extension_context(&self) -> OperationContext {
        OperationContext::with_timeout(self.extension())
    }
}

impl Settings {
    /// Read and validate a settings file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // an empty document means all defaults
        let settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let poll = &self.poll;
        if poll.initial_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll.initial_interval_ms must be positive".to_string(),
            ));
        }
        if poll.max_interval_ms < poll.initial_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "poll.max_interval_ms ({}) is below poll.initial_interval_ms ({})",
                poll.max_interval_ms, poll.initial_interval_ms
            )));
        }
        if !poll.multiplier.is_finite() || poll.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "poll.multiplier must be at least 1.0, got {}",
                poll.multiplier
            )));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("create", t.create),
            ("read", t.read),
            ("update", t.update),
            ("delete", t.delete),
            ("extension", t.extension),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{name} must be at least one minute"
                )));
            }
            if value > MAX_TIMEOUT_MINUTES {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{name} is {value} minutes, above the limit of {MAX_TIMEOUT_MINUTES}"
                )));
            }
        }

        self.shutdown_policy().map(|_| ())
    }

    /// Configure a machine reconciler with this file's poll cadence, import
    /// guard and shutdown policy
    pub fn apply_to(&self, reconciler: VirtualMachineReconciler) -> Result<VirtualMachineReconciler> {
        let policy = self.shutdown_policy()?;
        tracing::debug!(
            require_import = self.require_import,
            overrides = self.shutdown_policy.len(),
            "Applying settings to machine reconciler"
        );
        Ok(reconciler
            .with_poll_config(self.poll.to_poll_config())
            .with_policy(policy)
            .with_require_import(self.require_import))
    }

    pub fn apply_to_extensions(&self, reconciler: ExtensionReconciler) -> ExtensionReconciler {
        reconciler.with_poll_config(self.poll.to_poll_config())
    }

    /// Built-in shutdown table with this file's overrides applied
    pub fn shutdown_policy(&self) -> Result<ShutdownPolicy> {
        ShutdownPolicy::from_overrides(&self.shutdown_policy)
            .map_err(|e| ConfigError::Invalid(format!("shutdown_policy: {e}")))
    }
}
