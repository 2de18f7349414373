//! Slipway.toml: network profiles, contract specs, and the book location.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};

use slipway_orchestrate::network::{CredentialRef, GasPolicy};
use slipway_orchestrate::{
    ContractSpec, ContractSpecCatalog, NetworkProfile, NetworkProfileRegistry, ParamDescriptor,
};

fn default_book_dir() -> PathBuf {
    PathBuf::from("addressbook")
}

/// One `[networks.<name>]` table; the name is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub rpc_url: url::Url,
    pub chain_id: u64,
    #[serde(default)]
    pub gas: GasPolicy,
    pub credential: CredentialRef,
    #[serde(default)]
    pub confirmation_depth: Option<u64>,
    #[serde(default)]
    pub confirmation_timeout_secs: Option<u64>,
}

/// One `[contracts.<name>]` table; the name is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEntry {
    pub bytecode: String,
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlipwayConfig {
    /// Directory holding the per-network address book files.
    #[serde(default = "default_book_dir")]
    pub book_dir: PathBuf,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkEntry>,
    #[serde(default)]
    pub contracts: BTreeMap<String, ContractEntry>,
}

impl SlipwayConfig {
    /// Load configuration from a TOML file, with `SLIPWAY_`-prefixed
    /// environment variables taking precedence.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SLIPWAY_").split("__"))
            .extract()
            .context(format!(
                "Failed to load configuration from {}",
                path.display()
            ))?;
        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            contracts = config.contracts.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Build the network profile registry from the configured entries.
    pub fn registry(&self) -> Result<NetworkProfileRegistry> {
        let mut registry = NetworkProfileRegistry::new();
        for (name, entry) in &self.networks {
            registry
                .register(NetworkProfile {
                    name: name.clone(),
                    rpc_url: entry.rpc_url.clone(),
                    chain_id: entry.chain_id,
                    gas: entry.gas.clone(),
                    credential: entry.credential.clone(),
                    confirmation_depth: entry
                        .confirmation_depth
                        .unwrap_or(slipway_orchestrate::network::DEFAULT_CONFIRMATION_DEPTH),
                    confirmation_timeout_secs: entry.confirmation_timeout_secs.unwrap_or(
                        slipway_orchestrate::network::DEFAULT_CONFIRMATION_TIMEOUT_SECS,
                    ),
                })
                .context(format!("Failed to register network '{name}'"))?;
        }
        Ok(registry)
    }

    /// Build the contract spec catalog from the configured entries.
    pub fn catalog(&self) -> Result<ContractSpecCatalog> {
        let mut catalog = ContractSpecCatalog::new();
        for (name, entry) in &self.contracts {
            catalog
                .register(ContractSpec {
                    name: name.clone(),
                    bytecode: entry.bytecode.clone(),
                    params: entry.params.clone(),
                })
                .context(format!("Failed to register contract spec '{name}'"))?;
        }
        Ok(catalog)
    }
}
