//! Error kinds for the orchestration core.

use crate::plan::InstanceId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestrateError>;

/// All error kinds the orchestrator can produce.
///
/// Configuration and plan validation errors surface before any network call;
/// resolver errors surface before any deployment begins. Executor errors are
/// always recorded against the instance that produced them.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    #[error("network profile '{name}' already registered (chain id {chain_id})")]
    DuplicateNetwork { name: String, chain_id: u64 },

    #[error("unknown network '{name}'")]
    UnknownNetwork { name: String },

    #[error("contract spec '{name}' already registered")]
    DuplicateSpec { name: String },

    #[error("unknown contract spec '{name}'")]
    UnknownSpec { name: String },

    #[error("malformed contract spec '{name}': {reason}")]
    MalformedSpec { name: String, reason: String },

    #[error("cyclic dependency between units: {}", join_ids(.members))]
    CyclicDependency { members: Vec<InstanceId> },

    #[error("unit '{unit}' references '{reference}', which is neither in the plan nor confirmed in the address book")]
    UnresolvedReference {
        unit: InstanceId,
        reference: InstanceId,
    },

    #[error("transient network error: {reason}")]
    TransientNetwork { reason: String },

    #[error("deployment reverted on-chain: {reason}")]
    OnChainRevert { reason: String },

    #[error("timed out waiting for confirmation of unit '{unit}' (tx {tx})")]
    ConfirmationTimeout { unit: InstanceId, tx: String },

    #[error("address book for network '{network}' is corrupted at line {line}: {reason}")]
    AddressBookCorruption {
        network: String,
        line: usize,
        reason: String,
    },

    #[error("credential reference could not be resolved: {reason}")]
    Credential { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OrchestrateError {
    /// Whether the error is worth retrying with backoff.
    ///
    /// Only transport-level failures qualify; on-chain reverts are
    /// deterministic given the same inputs and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    /// Short machine-readable kind name, used in CLI output and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateNetwork { .. } => "DuplicateNetwork",
            Self::UnknownNetwork { .. } => "UnknownNetwork",
            Self::DuplicateSpec { .. } => "DuplicateSpec",
            Self::UnknownSpec { .. } => "UnknownSpec",
            Self::MalformedSpec { .. } => "MalformedSpec",
            Self::CyclicDependency { .. } => "CyclicDependency",
            Self::UnresolvedReference { .. } => "UnresolvedReference",
            Self::TransientNetwork { .. } => "TransientNetwork",
            Self::OnChainRevert { .. } => "OnChainRevert",
            Self::ConfirmationTimeout { .. } => "ConfirmationTimeout",
            Self::AddressBookCorruption { .. } => "AddressBookCorruption",
            Self::Credential { .. } => "Credential",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
        }
    }
}

fn join_ids(ids: &[InstanceId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_members() {
        let err = OrchestrateError::CyclicDependency {
            members: vec![InstanceId::from("pool"), InstanceId::from("router")],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency between units: pool, router"
        );
    }

    #[test]
    fn test_only_transient_kind_is_retryable() {
        assert!(
            OrchestrateError::TransientNetwork {
                reason: "connection reset".to_string()
            }
            .is_transient()
        );
        assert!(
            !OrchestrateError::OnChainRevert {
                reason: "underflow".to_string()
            }
            .is_transient()
        );
        assert!(
            !OrchestrateError::ConfirmationTimeout {
                unit: InstanceId::from("pool"),
                tx: "0xabc".to_string()
            }
            .is_transient()
        );
    }
}
