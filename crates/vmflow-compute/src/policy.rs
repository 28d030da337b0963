//! Which field changes require the machine to be powered off
//!
//! Some hardware changes can only be applied to a stopped machine. The
//! table here maps every mutable field to a [`ShutdownRule`]; the
//! orchestrator evaluates the rules of the fields a plan changes against
//! what it observes remotely.

use crate::model::Priority;
use crate::planner::Field;
use crate::state::PowerState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use vmflow_cloud::{CloudError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownRule {
    Never,
    Always,
    /// Only when the new size cannot be applied to the running host
    WhenSizeUnavailable,
    /// Only for Spot machines that are currently running
    WhenRunningSpot,
}

impl ShutdownRule {
    pub const ALL: [ShutdownRule; 4] = [
        ShutdownRule::Never,
        ShutdownRule::Always,
        ShutdownRule::WhenSizeUnavailable,
        ShutdownRule::WhenRunningSpot,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ShutdownRule::Never => "never",
            ShutdownRule::Always => "always",
            ShutdownRule::WhenSizeUnavailable => "when_size_unavailable",
            ShutdownRule::WhenRunningSpot => "when_running_spot",
        }
    }

    /// Whether the rule can be decided without looking at the remote machine
    pub fn is_static(&self) -> bool {
        matches!(self, ShutdownRule::Never | ShutdownRule::Always)
    }

    pub fn applies(&self, facts: &ShutdownFacts) -> bool {
        match self {
            ShutdownRule::Never => false,
            ShutdownRule::Always => true,
            ShutdownRule::WhenSizeUnavailable => facts.size_available == Some(false),
            ShutdownRule::WhenRunningSpot => {
                facts.priority == Priority::Spot && !facts.power_state.is_stopped()
            }
        }
    }
}

impl std::fmt::Display for ShutdownRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ShutdownRule {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| CloudError::invalid(format!("unknown shutdown rule {s:?}")))
    }
}

/// What the orchestrator learned about the remote machine before deciding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownFacts {
    pub power_state: PowerState,
    /// `None` when the size was not changed, so nobody asked
    pub size_available: Option<bool>,
    /// Desired priority
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownPolicy {
    rules: BTreeMap<Field, ShutdownRule>,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        let rules = BTreeMap::from([
            (Field::Size, ShutdownRule::WhenSizeUnavailable),
            (Field::MaxBidPrice, ShutdownRule::WhenRunningSpot),
            (Field::OsDiskSize, ShutdownRule::Always),
            (Field::NetworkInterfaces, ShutdownRule::Always),
            (Field::AdditionalCapabilities, ShutdownRule::Always),
        ]);
        Self { rules }
    }
}

impl ShutdownPolicy {
    /// Built-in table with overrides applied, keyed by field and rule name
    pub fn from_overrides<'a>(
        overrides: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self> {
        let mut policy = Self::default();
        for (field, rule) in overrides {
            let field: Field = field.parse()?;
            let rule: ShutdownRule = rule.parse()?;
            policy = policy.with_rule(field, rule)?;
        }
        Ok(policy)
    }

    /// Override the rule of one field. Immutable fields cannot carry a rule.
    pub fn with_rule(mut self, field: Field, rule: ShutdownRule) -> Result<Self> {
        if !field.is_mutable() {
            return Err(CloudError::invalid(format!(
                "{field} cannot be updated in place, so it has no shutdown rule"
            )));
        }
        self.rules.insert(field, rule);
        Ok(self)
    }

    pub fn rule_for(&self, field: Field) -> ShutdownRule {
        self.rules.get(&field).copied().unwrap_or(ShutdownRule::Never)
    }

    /// Every mutable field with its effective rule
    pub fn entries(&self) -> impl Iterator<Item = (Field, ShutdownRule)> + '_ {
        Field::ALL
            .iter()
            .copied()
            .filter(Field::is_mutable)
            .map(|f| (f, self.rule_for(f)))
    }
}
