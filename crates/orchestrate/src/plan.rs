//! Deployment plans: the set of unit instances targeted at one network.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{ContractSpec, ParamDescriptor};
use crate::chain::parse_literal;

/// Identifier of one deployable unit instance within a plan.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::AsRef,
)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A concrete constructor parameter on a unit: either a literal value or a
/// reference to another instance's deployed address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamBinding {
    Literal { lit: String },
    Reference { r#ref: InstanceId },
}

/// One instance to deploy: a contract spec plus its parameter bindings.
///
/// Immutable once a plan begins execution. A unit with no bindings inherits
/// the descriptor defaults from its contract spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    /// Instance identifier, unique within the plan.
    pub id: InstanceId,
    /// Name of the contract spec to instantiate.
    pub contract: String,
    /// Constructor parameter bindings, in constructor order.
    #[serde(default)]
    pub params: Vec<ParamBinding>,
}

/// A full deployment plan for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Target network name, resolved against the profile registry.
    pub network: String,
    /// Pre-seeded references to addresses not owned by this system
    /// (e.g. an already-deployed stablecoin).
    #[serde(default)]
    pub seeds: BTreeMap<InstanceId, Address>,
    /// Units to deploy, in declaration order.
    #[serde(default)]
    pub units: Vec<DeploymentUnit>,
}

impl DeploymentPlan {
    /// Save the plan to a TOML file.
    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployment plan to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write plan to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployment plan saved");
        Ok(())
    }

    /// Load a plan from a TOML file and validate its structure.
    ///
    /// Structural validation happens here, before the plan reaches the
    /// resolver: unit identifiers must be unique and non-empty, and every
    /// literal binding must parse as an address or unsigned integer.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read plan from {}", path.display()))?;
        let plan: Self = toml::from_str(&content).context("Failed to parse plan file as TOML")?;
        plan.validate()?;
        tracing::info!(
            path = %path.display(),
            network = %plan.network,
            units = plan.units.len(),
            "Deployment plan loaded"
        );
        Ok(plan)
    }

    /// Structural plan validation, independent of the catalog and registry.
    pub fn validate(&self) -> Result<()> {
        if self.network.is_empty() {
            anyhow::bail!("Plan has no target network");
        }

        let mut seen = BTreeSet::new();
        for unit in &self.units {
            if unit.id.as_str().is_empty() {
                anyhow::bail!("Plan contains a unit with an empty identifier");
            }
            if !seen.insert(&unit.id) {
                anyhow::bail!("Duplicate unit identifier '{}' in plan", unit.id);
            }
            if unit.contract.is_empty() {
                anyhow::bail!("Unit '{}' has no contract spec name", unit.id);
            }
            for binding in &unit.params {
                if let ParamBinding::Literal { lit } = binding {
                    parse_literal(lit).map_err(|reason| {
                        anyhow::anyhow!(
                            "Unit '{}' has an invalid literal '{}': {}",
                            unit.id,
                            lit,
                            reason
                        )
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Look up a unit by identifier.
    pub fn unit(&self, id: &InstanceId) -> Option<&DeploymentUnit> {
        self.units.iter().find(|u| &u.id == id)
    }
}

/// Effective constructor bindings for a unit.
///
/// A unit with explicit bindings uses them verbatim; a unit without any
/// falls back to the descriptor defaults carried by its contract spec.
pub fn effective_bindings(unit: &DeploymentUnit, spec: &ContractSpec) -> Vec<ParamBinding> {
    if !unit.params.is_empty() {
        return unit.params.clone();
    }
    spec.params
        .iter()
        .map(|descriptor| match descriptor {
            ParamDescriptor::Literal { value } => ParamBinding::Literal { lit: value.clone() },
            ParamDescriptor::Reference { instance } => ParamBinding::Reference {
                r#ref: instance.clone(),
            },
        })
        .collect()
}
