//! Contract spec catalog: templates for deployable units.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chain::parse_literal;
use crate::error::{OrchestrateError, Result};
use crate::plan::InstanceId;

/// A constructor parameter descriptor in a contract spec.
///
/// `Literal` bakes a default value into the template; `Reference` binds the
/// parameter to another instance's deployed address, resolved at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamDescriptor {
    Literal { value: String },
    Reference { instance: InstanceId },
}

/// Template for one deployable unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Unit-type name, unique within the catalog.
    pub name: String,
    /// Creation bytecode as a 0x-prefixed hex string.
    pub bytecode: String,
    /// Ordered constructor parameter descriptors.
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
}

impl ContractSpec {
    fn malformed(&self, reason: impl Into<String>) -> OrchestrateError {
        OrchestrateError::MalformedSpec {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Structural validation, run at registration time.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(self.malformed("spec name is empty"));
        }

        let raw = self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode);
        if raw.is_empty() {
            return Err(self.malformed("bytecode is empty"));
        }
        if raw.len() % 2 != 0 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(self.malformed("bytecode is not valid hex"));
        }

        for (position, descriptor) in self.params.iter().enumerate() {
            match descriptor {
                ParamDescriptor::Reference { instance } if instance.as_str().is_empty() => {
                    return Err(
                        self.malformed(format!("parameter {position} has an empty reference"))
                    );
                }
                ParamDescriptor::Literal { value } => {
                    parse_literal(value).map_err(|_| {
                        self.malformed(format!(
                            "parameter {position} literal '{value}' is not an address or unsigned integer"
                        ))
                    })?;
                }
                ParamDescriptor::Reference { .. } => {}
            }
        }
        Ok(())
    }

    /// Decoded creation bytecode. Call after [`validate`](Self::validate).
    pub fn bytecode_bytes(&self) -> Result<Vec<u8>> {
        let raw = self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode);
        hex::decode(raw).map_err(|e| self.malformed(format!("bytecode is not valid hex: {e}")))
    }
}

/// Catalog of named contract specs, populated at configuration-load time.
#[derive(Debug, Default)]
pub struct ContractSpecCatalog {
    specs: BTreeMap<String, ContractSpec>,
}

impl ContractSpecCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec, validating its structure first.
    pub fn register(&mut self, spec: ContractSpec) -> Result<()> {
        spec.validate()?;
        if self.specs.contains_key(&spec.name) {
            return Err(OrchestrateError::DuplicateSpec {
                name: spec.name.clone(),
            });
        }
        tracing::debug!(spec = %spec.name, params = spec.params.len(), "Contract spec registered");
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Look up a spec by name.
    pub fn resolve_spec(&self, name: &str) -> Result<&ContractSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| OrchestrateError::UnknownSpec {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
