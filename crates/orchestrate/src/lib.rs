//! slipway-orchestrate - Contract deployment orchestration.
//!
//! This crate turns a declarative deployment plan into an ordered, resumable
//! sequence of contract deployments against a configured network: profiles
//! and contract specs come from configuration, the resolver orders units by
//! their address references, the executor drives them on chain, and the
//! address book durably records every outcome.

pub mod book;
pub mod catalog;
pub mod chain;
pub mod error;
pub mod executor;
pub mod network;
pub mod plan;
pub mod reporter;
pub mod resolver;
pub mod rpc;

pub use book::{AddressBook, ConfirmedRecords, DeploymentRecord, RecordStatus};
pub use catalog::{ContractSpec, ContractSpecCatalog, ParamDescriptor};
pub use chain::{ArgValue, ChainClient, DeploymentReceipt, JsonRpcChainClient};
pub use error::{OrchestrateError, Result};
pub use executor::{
    DeploymentExecutor, ExecutionSummary, ExecutorConfig, FailurePolicy, execute_concurrently,
};
pub use network::{CredentialRef, GasPolicy, NetworkProfile, NetworkProfileRegistry};
pub use plan::{DeploymentPlan, DeploymentUnit, InstanceId, ParamBinding};
pub use reporter::{ConsoleReporter, DeployObserver, Manifest, ManifestEntry};
pub use resolver::{ResolvedPlan, resolve};
