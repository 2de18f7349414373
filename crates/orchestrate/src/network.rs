//! Network profiles: per-network configuration for a deployment run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OrchestrateError, Result};

/// Default number of blocks after inclusion before a deployment is final.
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 1;

/// Default number of seconds to wait for a transaction receipt.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;

/// How the gas price for deployment transactions is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum GasPolicy {
    /// A fixed gas price in wei, pinned in configuration.
    Fixed { price_wei: u128 },
    /// Ask the node for its current gas price estimate at submission time.
    #[default]
    Estimated,
}

/// Reference to a signing credential, resolved through an external source.
///
/// The raw secret never appears in configuration files or logs; only the
/// reference does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum CredentialRef {
    /// Read the sender account from an environment variable.
    Env { var: String },
    /// Read the sender account from a file.
    File { path: PathBuf },
}

impl CredentialRef {
    /// Resolve the reference to a sender account.
    pub fn resolve(&self) -> Result<String> {
        let value = match self {
            Self::Env { var } => {
                std::env::var(var).map_err(|_| OrchestrateError::Credential {
                    reason: format!("environment variable '{var}' is not set"),
                })?
            }
            Self::File { path } => std::fs::read_to_string(path)
                .map_err(|e| OrchestrateError::Credential {
                    reason: format!("failed to read '{}': {e}", path.display()),
                })?
                .trim()
                .to_string(),
        };
        if value.is_empty() {
            return Err(OrchestrateError::Credential {
                reason: "resolved credential is empty".to_string(),
            });
        }
        Ok(value)
    }
}

/// Configuration for one target network.
///
/// Treated as immutable for the lifetime of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// Network name, unique within the registry.
    pub name: String,
    /// JSON-RPC endpoint URL.
    pub rpc_url: Url,
    /// Chain identifier, unique within the registry.
    pub chain_id: u64,
    /// Gas price policy for deployment transactions.
    #[serde(default)]
    pub gas: GasPolicy,
    /// Reference to the signing credential.
    pub credential: CredentialRef,
    /// Blocks after inclusion before a deployment is treated as final.
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    /// Seconds to wait for a transaction receipt before giving up.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_confirmation_depth() -> u64 {
    DEFAULT_CONFIRMATION_DEPTH
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

/// Registry of named network profiles.
///
/// Populated once at configuration-load time; adding a network is a data
/// entry, not a new code path.
#[derive(Debug, Default)]
pub struct NetworkProfileRegistry {
    profiles: BTreeMap<String, NetworkProfile>,
}

impl NetworkProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile, rejecting name and chain-id collisions.
    pub fn register(&mut self, profile: NetworkProfile) -> Result<()> {
        if self.profiles.contains_key(&profile.name) {
            return Err(OrchestrateError::DuplicateNetwork {
                name: profile.name.clone(),
                chain_id: profile.chain_id,
            });
        }
        if let Some(existing) = self
            .profiles
            .values()
            .find(|p| p.chain_id == profile.chain_id)
        {
            return Err(OrchestrateError::DuplicateNetwork {
                name: existing.name.clone(),
                chain_id: profile.chain_id,
            });
        }
        tracing::debug!(network = %profile.name, chain_id = profile.chain_id, "Network profile registered");
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Look up a profile by name.
    pub fn lookup(&self, name: &str) -> Result<&NetworkProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| OrchestrateError::UnknownNetwork {
                name: name.to_string(),
            })
    }

    /// Registered network names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
