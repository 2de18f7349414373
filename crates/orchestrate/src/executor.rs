//! Deployment executor: drives a resolved plan against one network.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use backon::{ExponentialBuilder, Retryable};
use futures::future::join_all;

use crate::book::{AddressBook, DeploymentRecord, RecordStatus};
use crate::catalog::ContractSpecCatalog;
use crate::chain::{ArgValue, ChainClient, build_deploy_data, parse_literal};
use crate::error::{OrchestrateError, Result};
use crate::network::NetworkProfile;
use crate::plan::{DeploymentPlan, InstanceId, ParamBinding, effective_bindings};
use crate::reporter::{ConsoleReporter, DeployObserver};
use crate::resolver::{self, transitive_dependents};

/// What to do with the rest of the plan when one unit fails terminally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the whole run on the first terminal failure.
    #[default]
    Strict,
    /// Keep deploying units that do not depend on the failed one.
    Lenient,
}

/// Tunables for a deployment run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Submission attempts per unit before a transient error becomes terminal.
    pub max_attempts: usize,
    /// Interval between receipt polls while awaiting confirmation.
    pub poll_interval: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_interval: Duration::from_secs(2),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Outcome of one deployment run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub network: String,
    /// Units confirmed during this run.
    pub deployed: Vec<InstanceId>,
    /// Units skipped because they were already confirmed.
    pub skipped: Vec<InstanceId>,
    /// Units that failed terminally, with the error that stopped them.
    pub failed: Vec<(InstanceId, String)>,
    /// Units never attempted because a dependency or the run failed first.
    pub abandoned: Vec<InstanceId>,
}

impl ExecutionSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty()
    }
}

/// Drives one plan against one network, strictly sequentially.
///
/// A single signing credential's transactions must be ordered on
/// account-based chains, so units are never submitted concurrently within a
/// run. Concurrency lives across networks, see [`execute_concurrently`].
pub struct DeploymentExecutor<C: ChainClient> {
    profile: NetworkProfile,
    chain: C,
    config: ExecutorConfig,
}

impl<C: ChainClient> DeploymentExecutor<C> {
    pub fn new(profile: NetworkProfile, chain: C, config: ExecutorConfig) -> Self {
        Self {
            profile,
            chain,
            config,
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    /// Execute the plan, appending records to the book as units progress.
    ///
    /// Terminal per-unit failures are recorded and reflected in the summary;
    /// the run itself errors only on invariant violations, book corruption,
    /// or a confirmation timeout (which leaves the unit `pending` so the next
    /// run can reconcile it).
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        catalog: &ContractSpecCatalog,
        book: &mut AddressBook,
        observer: &mut dyn DeployObserver,
    ) -> Result<ExecutionSummary> {
        let network = &self.profile.name;
        let confirmed = book.confirmed_addresses(network)?;
        let latest = book.latest(network)?;
        let resolved = resolver::resolve(plan, catalog, &confirmed)?;
        let sender = self.profile.credential.resolve()?;

        // Addresses visible to reference bindings: prior confirmed records
        // plus the plan's seeds, extended as units confirm in this run.
        let mut addresses: BTreeMap<InstanceId, Address> = confirmed;
        for (id, address) in &plan.seeds {
            addresses.insert(id.clone(), *address);
        }

        let mut summary = ExecutionSummary {
            network: network.clone(),
            skipped: resolved.already_confirmed.clone(),
            ..Default::default()
        };
        let mut blocked: BTreeSet<InstanceId> = BTreeSet::new();
        let mut aborted = false;

        for id in &resolved.order {
            if aborted || blocked.contains(id) {
                tracing::warn!(network, unit = %id, "Skipping unit, a dependency failed");
                summary.abandoned.push(id.clone());
                continue;
            }
            let Some(unit) = plan.unit(id) else {
                // The resolver only emits identifiers taken from the plan.
                return Err(OrchestrateError::UnresolvedReference {
                    unit: id.clone(),
                    reference: id.clone(),
                });
            };

            observer.on_unit_started(network, id);
            // Reconcile a pending record from a previous run first. Errors
            // here must not overwrite the resumable pending state with a
            // terminal record, except when the chain itself reports a revert.
            let outcome = match self.reconcile_pending(unit, latest.get(id)).await {
                Ok(Some(adopted)) => Ok(adopted),
                Ok(None) => {
                    self.deploy_unit(unit, catalog, &addresses, &sender, book)
                        .await
                }
                Err(
                    e @ (OrchestrateError::OnChainRevert { .. }
                    | OrchestrateError::ConfirmationTimeout { .. }),
                ) => Err(e),
                Err(e) => return Err(e),
            };

            match outcome {
                Ok((address, tx_hash)) => {
                    let record = DeploymentRecord::confirmed(id.clone(), network, address, tx_hash);
                    book.append(&record)?;
                    addresses.insert(id.clone(), address);
                    observer.on_unit_confirmed(&record);
                    summary.deployed.push(id.clone());
                }
                Err(e @ OrchestrateError::ConfirmationTimeout { .. }) => {
                    // The record stays pending so the next run reconciles it
                    // instead of resubmitting.
                    observer.on_unit_failed(network, id, &e.to_string());
                    return Err(e);
                }
                Err(
                    e @ (OrchestrateError::OnChainRevert { .. }
                    | OrchestrateError::TransientNetwork { .. }),
                ) => {
                    let reason = e.to_string();
                    book.append(&DeploymentRecord::failed(
                        id.clone(),
                        network,
                        reason.clone(),
                    ))?;
                    observer.on_unit_failed(network, id, &reason);
                    summary.failed.push((id.clone(), reason));
                    match self.config.failure_policy {
                        FailurePolicy::Strict => aborted = true,
                        FailurePolicy::Lenient => {
                            blocked.extend(transitive_dependents(&resolved.dependents, id));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            network,
            deployed = summary.deployed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            abandoned = summary.abandoned.len(),
            "Deployment run finished"
        );
        Ok(summary)
    }

    /// Reconcile a pending record left by a previous run.
    ///
    /// A pending record means that run crashed between submission and
    /// confirmation. If the node still knows the transaction, adopt it and
    /// wait for it; if the node dropped it, a resubmission is safe and
    /// `None` is returned. The lookup is retried with the same backoff as
    /// submissions, since failing it terminally would lose the record's
    /// resumability.
    async fn reconcile_pending(
        &self,
        unit: &crate::plan::DeploymentUnit,
        prior: Option<&DeploymentRecord>,
    ) -> Result<Option<(Address, B256)>> {
        let Some(record) = prior else {
            return Ok(None);
        };
        if record.status != RecordStatus::Pending {
            return Ok(None);
        }
        let Some(tx_hash) = record.tx_hash else {
            return Ok(None);
        };

        let lookup = || async move { self.chain.transaction_known(tx_hash).await };
        let known = lookup
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(self.config.max_attempts.saturating_sub(1)),
            )
            .when(|e: &OrchestrateError| e.is_transient())
            .notify(|e, after| {
                tracing::warn!(
                    unit = %unit.id,
                    error = %e,
                    retry_after = ?after,
                    "Transient lookup failure while reconciling, retrying"
                );
            })
            .await?;

        if known {
            tracing::info!(
                unit = %unit.id,
                tx = %tx_hash,
                "Reconciling pending deployment from a previous run"
            );
            let address = self.await_confirmation(&unit.id, tx_hash).await?;
            return Ok(Some((address, tx_hash)));
        }
        tracing::warn!(
            unit = %unit.id,
            tx = %tx_hash,
            "Pending transaction unknown to the node, resubmitting"
        );
        Ok(None)
    }

    /// Deploy a single unit, returning its confirmed address and
    /// transaction hash.
    async fn deploy_unit(
        &self,
        unit: &crate::plan::DeploymentUnit,
        catalog: &ContractSpecCatalog,
        addresses: &BTreeMap<InstanceId, Address>,
        sender: &str,
        book: &mut AddressBook,
    ) -> Result<(Address, B256)> {
        let spec = catalog.resolve_spec(&unit.contract)?;
        let args = self.resolve_args(unit, spec, addresses)?;
        let data = build_deploy_data(&spec.bytecode_bytes()?, &args);

        let submit = || {
            let data = data.clone();
            async move {
                self.chain
                    .submit_deployment(sender, data, &self.profile.gas)
                    .await
            }
        };
        let tx_hash = submit
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(self.config.max_attempts.saturating_sub(1)),
            )
            .when(|e: &OrchestrateError| e.is_transient())
            .notify(|e, after| {
                tracing::warn!(
                    unit = %unit.id,
                    error = %e,
                    retry_after = ?after,
                    "Transient submission failure, retrying"
                );
            })
            .await?;

        // Record the submission before waiting, so a crash here leaves a
        // reconcilable pending record rather than a silent duplicate.
        book.append(&DeploymentRecord::pending(
            unit.id.clone(),
            &self.profile.name,
            tx_hash,
        ))?;

        let address = self.await_confirmation(&unit.id, tx_hash).await?;
        Ok((address, tx_hash))
    }

    /// Resolve a unit's bindings to concrete constructor arguments.
    ///
    /// Reference bindings missing from the address map signal an internal
    /// invariant violation; the resolver guarantees the referenced units run
    /// earlier or are already confirmed.
    fn resolve_args(
        &self,
        unit: &crate::plan::DeploymentUnit,
        spec: &crate::catalog::ContractSpec,
        addresses: &BTreeMap<InstanceId, Address>,
    ) -> Result<Vec<ArgValue>> {
        effective_bindings(unit, spec)
            .into_iter()
            .map(|binding| match binding {
                ParamBinding::Literal { lit } => {
                    parse_literal(&lit).map_err(|reason| OrchestrateError::MalformedSpec {
                        name: spec.name.clone(),
                        reason: format!("literal '{lit}': {reason}"),
                    })
                }
                ParamBinding::Reference { r#ref } => addresses
                    .get(&r#ref)
                    .map(|address| ArgValue::Address(*address))
                    .ok_or_else(|| OrchestrateError::UnresolvedReference {
                        unit: unit.id.clone(),
                        reference: r#ref,
                    }),
            })
            .collect()
    }

    /// Wait for the transaction to confirm at the profile's depth.
    ///
    /// Transient errors while polling are tolerated; the overall wait is
    /// bounded by the profile's confirmation timeout.
    async fn await_confirmation(&self, unit: &InstanceId, tx_hash: B256) -> Result<Address> {
        let deadline = Duration::from_secs(self.profile.confirmation_timeout_secs);
        let wait = self.poll_until_final(unit, tx_hash);
        match tokio::time::timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrateError::ConfirmationTimeout {
                unit: unit.clone(),
                tx: tx_hash.to_string(),
            }),
        }
    }

    async fn poll_until_final(&self, unit: &InstanceId, tx_hash: B256) -> Result<Address> {
        let receipt = loop {
            match self.chain.receipt(tx_hash).await {
                Ok(Some(receipt)) => break receipt,
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(unit = %unit, error = %e, "Receipt poll failed, will retry");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        if !receipt.success {
            return Err(OrchestrateError::OnChainRevert {
                reason: format!("deployment transaction {tx_hash} reverted"),
            });
        }
        let Some(address) = receipt.contract_address else {
            return Err(OrchestrateError::OnChainRevert {
                reason: format!("receipt for {tx_hash} carries no contract address"),
            });
        };

        // Wait until the inclusion block is buried at the required depth.
        let required = receipt.block_number + self.profile.confirmation_depth.saturating_sub(1);
        loop {
            match self.chain.block_number().await {
                Ok(current) if current >= required => break,
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(unit = %unit, error = %e, "Block poll failed, will retry");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(address)
    }
}

/// Run several single-network deployments concurrently.
///
/// Runs are independent by construction: each network has its own executor,
/// its own address-book partition, and its own credential, so nothing is
/// shared besides the book directory.
pub async fn execute_concurrently<C: ChainClient>(
    runs: Vec<(DeploymentExecutor<C>, DeploymentPlan)>,
    catalog: &ContractSpecCatalog,
    book_dir: &Path,
) -> Vec<Result<ExecutionSummary>> {
    let futures = runs.into_iter().map(|(executor, plan)| async move {
        let mut book = AddressBook::open(book_dir)?;
        let mut reporter = ConsoleReporter;
        executor.execute(&plan, catalog, &mut book, &mut reporter).await
    });
    join_all(futures).await
}
