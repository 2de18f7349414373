//! End-to-end orchestration tests against a scripted in-memory chain.
//!
//! Each test wires a real catalog, plan, resolver, executor, and address book
//! together; only the network is mocked. Run with: cargo test --test orchestration

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use tempdir::TempDir;

use slipway_orchestrate::chain::DeploymentReceipt;
use slipway_orchestrate::network::{CredentialRef, GasPolicy};
use slipway_orchestrate::{
    AddressBook, ChainClient, ContractSpec, ContractSpecCatalog, DeploymentExecutor,
    DeploymentPlan, DeploymentRecord, DeploymentUnit, ExecutorConfig, FailurePolicy, InstanceId,
    Manifest, NetworkProfile, OrchestrateError, ParamBinding, ParamDescriptor, RecordStatus,
};

const MOCK_BLOCK: u64 = 100;

/// What the mock chain does with the next submitted transaction.
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Confirm,
    Revert,
    NeverMine,
}

#[derive(Debug, Default)]
struct MockState {
    submissions: Vec<Bytes>,
    outcomes: VecDeque<Outcome>,
    receipts: HashMap<B256, DeploymentReceipt>,
    known: HashSet<B256>,
    transient_failures: usize,
    lookup_failures: usize,
    attempts: usize,
}

/// Scripted chain client: each submission consumes the next outcome and
/// produces a deterministic transaction hash and contract address.
#[derive(Debug, Default)]
struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    fn with_outcomes(outcomes: &[Outcome]) -> Self {
        Self {
            state: Mutex::new(MockState {
                outcomes: outcomes.iter().copied().collect(),
                ..Default::default()
            }),
        }
    }

    fn failing_first(transient_failures: usize) -> Self {
        Self {
            state: Mutex::new(MockState {
                transient_failures,
                ..Default::default()
            }),
        }
    }

    fn tx_for(index: usize) -> B256 {
        B256::from([index as u8 + 1; 32])
    }

    fn address_for(index: usize) -> Address {
        Address::from([index as u8 + 1; 20])
    }

    fn submissions(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().submissions.clone()
    }

    fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Pretend a previous run already submitted `tx` and it was mined.
    fn seed_mined(&self, tx: B256, address: Address) {
        let mut state = self.state.lock().unwrap();
        state.known.insert(tx);
        state.receipts.insert(
            tx,
            DeploymentReceipt {
                contract_address: Some(address),
                block_number: MOCK_BLOCK,
                success: true,
            },
        );
    }

    /// Pretend a previous run submitted `tx` and it was mined but reverted.
    fn seed_reverted(&self, tx: B256) {
        let mut state = self.state.lock().unwrap();
        state.known.insert(tx);
        state.receipts.insert(
            tx,
            DeploymentReceipt {
                contract_address: None,
                block_number: MOCK_BLOCK,
                success: false,
            },
        );
    }

    /// Make the next `n` transaction lookups fail transiently.
    fn set_lookup_failures(&self, n: usize) {
        self.state.lock().unwrap().lookup_failures = n;
    }
}

impl ChainClient for MockChainClient {
    async fn submit_deployment(
        &self,
        _from: &str,
        data: Bytes,
        _gas: &GasPolicy,
    ) -> slipway_orchestrate::Result<B256> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(OrchestrateError::TransientNetwork {
                reason: "connection reset".to_string(),
            });
        }

        let index = state.submissions.len();
        let tx = Self::tx_for(index);
        state.submissions.push(data);
        state.known.insert(tx);
        match state.outcomes.pop_front().unwrap_or(Outcome::Confirm) {
            Outcome::Confirm => {
                state.receipts.insert(
                    tx,
                    DeploymentReceipt {
                        contract_address: Some(Self::address_for(index)),
                        block_number: MOCK_BLOCK,
                        success: true,
                    },
                );
            }
            Outcome::Revert => {
                state.receipts.insert(
                    tx,
                    DeploymentReceipt {
                        contract_address: None,
                        block_number: MOCK_BLOCK,
                        success: false,
                    },
                );
            }
            Outcome::NeverMine => {}
        }
        Ok(tx)
    }

    async fn receipt(&self, tx: B256) -> slipway_orchestrate::Result<Option<DeploymentReceipt>> {
        Ok(self.state.lock().unwrap().receipts.get(&tx).cloned())
    }

    async fn transaction_known(&self, tx: B256) -> slipway_orchestrate::Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.lookup_failures > 0 {
            state.lookup_failures -= 1;
            return Err(OrchestrateError::TransientNetwork {
                reason: "connection reset".to_string(),
            });
        }
        Ok(state.known.contains(&tx))
    }

    async fn block_number(&self) -> slipway_orchestrate::Result<u64> {
        Ok(MOCK_BLOCK)
    }
}

/// Observer that records callback order, for asserting reporting behavior.
#[derive(Debug, Default)]
struct RecordingObserver {
    events: Vec<String>,
}

impl slipway_orchestrate::DeployObserver for RecordingObserver {
    fn on_unit_started(&mut self, _network: &str, unit: &InstanceId) {
        self.events.push(format!("started:{unit}"));
    }

    fn on_unit_confirmed(&mut self, record: &DeploymentRecord) {
        self.events.push(format!("confirmed:{}", record.instance));
    }

    fn on_unit_failed(&mut self, _network: &str, unit: &InstanceId, _error: &str) {
        self.events.push(format!("failed:{unit}"));
    }
}

struct TestContext {
    _temp_dir: TempDir,
    book: AddressBook,
    profile: NetworkProfile,
    catalog: ContractSpecCatalog,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new("slipway-orchestration").expect("Failed to create temp dir");
        let book = AddressBook::open(temp_dir.path().join("book")).expect("Failed to open book");

        let account_path = temp_dir.path().join("account");
        std::fs::write(&account_path, "0x01b443495834D667b42f54d2b77eEd6951eD94a4")
            .expect("Failed to write account file");

        let profile = NetworkProfile {
            name: "testnet".to_string(),
            rpc_url: "http://localhost:8545".parse().unwrap(),
            chain_id: 31337,
            gas: GasPolicy::Estimated,
            credential: CredentialRef::File { path: account_path },
            confirmation_depth: 1,
            confirmation_timeout_secs: 30,
        };

        let mut catalog = ContractSpecCatalog::new();
        for name in ["Token", "ExchangerPool", "ExchangerRouter"] {
            catalog
                .register(ContractSpec {
                    name: name.to_string(),
                    bytecode: "0x608060405234801561001057600080fd5b50".to_string(),
                    params: vec![],
                })
                .expect("Failed to register spec");
        }
        Self {
            _temp_dir: temp_dir,
            book,
            profile,
            catalog,
        }
    }

    fn executor(&self, chain: MockChainClient) -> DeploymentExecutor<MockChainClient> {
        let config = ExecutorConfig {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        DeploymentExecutor::new(self.profile.clone(), chain, config)
    }

    fn lenient_executor(&self, chain: MockChainClient) -> DeploymentExecutor<MockChainClient> {
        let config = ExecutorConfig {
            poll_interval: Duration::from_millis(1),
            failure_policy: FailurePolicy::Lenient,
            ..Default::default()
        };
        DeploymentExecutor::new(self.profile.clone(), chain, config)
    }
}

fn unit(id: &str, contract: &str, params: Vec<ParamBinding>) -> DeploymentUnit {
    DeploymentUnit {
        id: InstanceId::from(id),
        contract: contract.to_string(),
        params,
    }
}

fn reference(id: &str) -> ParamBinding {
    ParamBinding::Reference {
        r#ref: InstanceId::from(id),
    }
}

fn literal(value: &str) -> ParamBinding {
    ParamBinding::Literal {
        lit: value.to_string(),
    }
}

/// A small DEX-shaped plan: token, a pool holding the seeded stablecoin and
/// the token, and a router over the pool. Declared out of dependency order
/// on purpose.
fn dex_plan() -> DeploymentPlan {
    DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::from([(
            InstanceId::from("usdt"),
            "0x55d398326f99059fF775485246999027B3197955"
                .parse()
                .unwrap(),
        )]),
        units: vec![
            unit(
                "router",
                "ExchangerRouter",
                vec![reference("pool"), literal("1000")],
            ),
            unit(
                "pool",
                "ExchangerPool",
                vec![reference("usdt"), reference("token")],
            ),
            unit("token", "Token", vec![]),
        ],
    }
}

#[tokio::test]
async fn test_full_plan_deploys_in_dependency_order() {
    let mut ctx = TestContext::new();
    let chain = MockChainClient::default();
    let executor = ctx.executor(chain);
    let mut observer = RecordingObserver::default();

    let summary = executor
        .execute(&dex_plan(), &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Deployment run failed");

    assert!(summary.success());
    assert_eq!(
        summary.deployed,
        vec![
            InstanceId::from("token"),
            InstanceId::from("pool"),
            InstanceId::from("router"),
        ]
    );
    assert_eq!(
        observer.events,
        vec![
            "started:token",
            "confirmed:token",
            "started:pool",
            "confirmed:pool",
            "started:router",
            "confirmed:router",
        ]
    );

    let confirmed = ctx.book.confirmed_addresses("testnet").unwrap();
    assert_eq!(confirmed.len(), 3);
    assert_eq!(
        confirmed[&InstanceId::from("token")],
        MockChainClient::address_for(0)
    );
}

#[tokio::test]
async fn test_reference_arguments_carry_deployed_addresses() {
    let mut ctx = TestContext::new();
    let executor = ctx.executor(MockChainClient::default());
    let mut observer = RecordingObserver::default();

    executor
        .execute(&dex_plan(), &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Deployment run failed");

    let submissions = executor.chain().submissions();
    assert_eq!(submissions.len(), 3);

    // Pool was the second submission; its payload ends with the seeded usdt
    // address word followed by the token's deployed address word.
    let pool_data = &submissions[1];
    let words = &pool_data[pool_data.len() - 64..];
    let usdt: Address = "0x55d398326f99059fF775485246999027B3197955"
        .parse()
        .unwrap();
    assert_eq!(&words[12..32], usdt.as_slice());
    assert_eq!(&words[44..64], MockChainClient::address_for(0).as_slice());

    // Router got the pool's address and the literal 1000.
    let router_data = &submissions[2];
    let words = &router_data[router_data.len() - 64..];
    assert_eq!(&words[12..32], MockChainClient::address_for(1).as_slice());
    assert_eq!(u64::from_be_bytes(words[56..64].try_into().unwrap()), 1000);
}

#[tokio::test]
async fn test_rerun_performs_zero_submissions() {
    let mut ctx = TestContext::new();
    let executor = ctx.executor(MockChainClient::default());
    let mut observer = RecordingObserver::default();
    let plan = dex_plan();

    executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("First run failed");
    let summary = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Second run failed");

    assert!(summary.deployed.is_empty());
    assert_eq!(summary.skipped.len(), 3);
    assert_eq!(executor.chain().submissions().len(), 3);
}

#[tokio::test]
async fn test_pending_record_with_mined_tx_is_adopted() {
    let mut ctx = TestContext::new();
    let chain = MockChainClient::default();

    // A previous run submitted the token deployment and crashed before
    // confirming it; the node mined it in the meantime.
    let tx = B256::from([7u8; 32]);
    let mined_at = Address::from([7u8; 20]);
    chain.seed_mined(tx, mined_at);
    ctx.book
        .append(&DeploymentRecord::pending(
            InstanceId::from("token"),
            "testnet",
            tx,
        ))
        .unwrap();

    let executor = ctx.executor(chain);
    let mut observer = RecordingObserver::default();
    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let summary = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    assert!(summary.success());
    assert!(executor.chain().submissions().is_empty());
    let confirmed = ctx.book.confirmed_addresses("testnet").unwrap();
    assert_eq!(confirmed[&InstanceId::from("token")], mined_at);
}

#[tokio::test]
async fn test_flaky_lookup_still_adopts_mined_pending_tx() {
    let mut ctx = TestContext::new();
    let chain = MockChainClient::default();

    let tx = B256::from([7u8; 32]);
    let mined_at = Address::from([7u8; 20]);
    chain.seed_mined(tx, mined_at);
    // The first reconciliation lookup fails transiently.
    chain.set_lookup_failures(1);
    ctx.book
        .append(&DeploymentRecord::pending(
            InstanceId::from("token"),
            "testnet",
            tx,
        ))
        .unwrap();

    let executor = ctx.executor(chain);
    let mut observer = RecordingObserver::default();
    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let summary = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    assert!(summary.success());
    assert!(executor.chain().submissions().is_empty());
    let confirmed = ctx.book.confirmed_addresses("testnet").unwrap();
    assert_eq!(confirmed[&InstanceId::from("token")], mined_at);
}

#[tokio::test]
async fn test_unreachable_node_during_reconciliation_keeps_record_pending() {
    let mut ctx = TestContext::new();
    let chain = MockChainClient::default();

    let tx = B256::from([7u8; 32]);
    chain.seed_mined(tx, Address::from([7u8; 20]));
    chain.set_lookup_failures(usize::MAX);
    ctx.book
        .append(&DeploymentRecord::pending(
            InstanceId::from("token"),
            "testnet",
            tx,
        ))
        .unwrap();

    // A single attempt so the lookup failure surfaces immediately.
    let executor = DeploymentExecutor::new(
        ctx.profile.clone(),
        chain,
        ExecutorConfig {
            max_attempts: 1,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        },
    );
    let mut observer = RecordingObserver::default();
    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let err = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "TransientNetwork");

    // The record must stay pending so a later run can still adopt the
    // transaction once the node answers again.
    assert!(executor.chain().submissions().is_empty());
    let latest = ctx.book.latest("testnet").unwrap();
    assert_eq!(
        latest[&InstanceId::from("token")].status,
        RecordStatus::Pending
    );
}

#[tokio::test]
async fn test_adopted_pending_tx_that_reverted_is_recorded_failed() {
    let mut ctx = TestContext::new();
    let chain = MockChainClient::default();

    // The transaction from the previous run was mined but reverted.
    let tx = B256::from([7u8; 32]);
    chain.seed_reverted(tx);
    ctx.book
        .append(&DeploymentRecord::pending(
            InstanceId::from("token"),
            "testnet",
            tx,
        ))
        .unwrap();

    let executor = ctx.executor(chain);
    let mut observer = RecordingObserver::default();
    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let summary = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    assert!(!summary.success());
    assert!(executor.chain().submissions().is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, InstanceId::from("token"));
    assert!(summary.failed[0].1.contains("reverted"));

    let latest = ctx.book.latest("testnet").unwrap();
    assert_eq!(
        latest[&InstanceId::from("token")].status,
        RecordStatus::Failed
    );
}

#[tokio::test]
async fn test_pending_record_with_dropped_tx_is_resubmitted() {
    let mut ctx = TestContext::new();

    // The pending transaction never reached the node.
    ctx.book
        .append(&DeploymentRecord::pending(
            InstanceId::from("token"),
            "testnet",
            B256::from([7u8; 32]),
        ))
        .unwrap();

    let executor = ctx.executor(MockChainClient::default());
    let mut observer = RecordingObserver::default();
    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let summary = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    assert!(summary.success());
    assert_eq!(executor.chain().submissions().len(), 1);
}

#[tokio::test]
async fn test_revert_aborts_remaining_units_in_strict_mode() {
    let mut ctx = TestContext::new();
    let chain = MockChainClient::with_outcomes(&[Outcome::Confirm, Outcome::Revert]);
    let executor = ctx.executor(chain);
    let mut observer = RecordingObserver::default();

    let summary = executor
        .execute(&dex_plan(), &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    assert!(!summary.success());
    assert_eq!(summary.deployed, vec![InstanceId::from("token")]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, InstanceId::from("pool"));
    assert_eq!(summary.abandoned, vec![InstanceId::from("router")]);

    let latest = ctx.book.latest("testnet").unwrap();
    assert_eq!(
        latest[&InstanceId::from("pool")].status,
        RecordStatus::Failed
    );
    assert!(!latest.contains_key(&InstanceId::from("router")));
}

#[tokio::test]
async fn test_lenient_mode_continues_independent_subgraph() {
    let mut ctx = TestContext::new();
    let chain = MockChainClient::with_outcomes(&[Outcome::Revert, Outcome::Confirm]);
    let executor = ctx.lenient_executor(chain);
    let mut observer = RecordingObserver::default();

    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![
            unit("a", "Token", vec![]),
            unit("b", "ExchangerPool", vec![reference("a")]),
            unit("c", "Token", vec![]),
        ],
    };

    let summary = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, InstanceId::from("a"));
    assert_eq!(summary.abandoned, vec![InstanceId::from("b")]);
    assert_eq!(summary.deployed, vec![InstanceId::from("c")]);
}

#[tokio::test]
async fn test_confirmation_timeout_leaves_record_pending() {
    let mut ctx = TestContext::new();
    ctx.profile.confirmation_timeout_secs = 0;
    let chain = MockChainClient::with_outcomes(&[Outcome::NeverMine]);
    let executor = ctx.executor(chain);
    let mut observer = RecordingObserver::default();

    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let err = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ConfirmationTimeout");

    let latest = ctx.book.latest("testnet").unwrap();
    assert_eq!(
        latest[&InstanceId::from("token")].status,
        RecordStatus::Pending
    );

    // The book still renders into a manifest after the aborted run.
    let manifest = Manifest::from_book(&mut ctx.book, "testnet").unwrap();
    assert_eq!(manifest.units.len(), 1);
    assert_eq!(manifest.units[0].status, RecordStatus::Pending);
}

#[tokio::test]
async fn test_transient_submission_errors_are_retried() {
    let mut ctx = TestContext::new();
    let executor = ctx.executor(MockChainClient::failing_first(2));
    let mut observer = RecordingObserver::default();

    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let summary = executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    assert!(summary.success());
    assert_eq!(executor.chain().attempts(), 3);
    assert_eq!(executor.chain().submissions().len(), 1);
}

#[tokio::test]
async fn test_independent_networks_deploy_concurrently() {
    let ctx = TestContext::new();
    let mut sepolia = ctx.profile.clone();
    sepolia.name = "sepolia".to_string();
    sepolia.chain_id = 11155111;

    let plan_for = |network: &str| DeploymentPlan {
        network: network.to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("token", "Token", vec![])],
    };

    let runs = vec![
        (ctx.executor(MockChainClient::default()), plan_for("testnet")),
        (
            DeploymentExecutor::new(
                sepolia,
                MockChainClient::default(),
                ExecutorConfig {
                    poll_interval: Duration::from_millis(1),
                    ..Default::default()
                },
            ),
            plan_for("sepolia"),
        ),
    ];

    let book_dir = ctx._temp_dir.path().join("book");
    let results =
        slipway_orchestrate::execute_concurrently(runs, &ctx.catalog, &book_dir).await;

    assert_eq!(results.len(), 2);
    for result in results {
        let summary = result.expect("Run failed");
        assert!(summary.success());
        assert_eq!(summary.deployed, vec![InstanceId::from("token")]);
    }

    // Each network got its own book partition.
    let mut book = AddressBook::open(&book_dir).unwrap();
    assert_eq!(book.confirmed_addresses("testnet").unwrap().len(), 1);
    assert_eq!(book.confirmed_addresses("sepolia").unwrap().len(), 1);
}

#[tokio::test]
async fn test_spec_defaults_apply_when_unit_has_no_bindings() {
    let mut ctx = TestContext::new();
    ctx.catalog
        .register(ContractSpec {
            name: "Farm".to_string(),
            bytecode: "0x6001".to_string(),
            params: vec![ParamDescriptor::Literal {
                value: "42".to_string(),
            }],
        })
        .unwrap();

    let executor = ctx.executor(MockChainClient::default());
    let mut observer = RecordingObserver::default();
    let plan = DeploymentPlan {
        network: "testnet".to_string(),
        seeds: BTreeMap::new(),
        units: vec![unit("farm", "Farm", vec![])],
    };

    executor
        .execute(&plan, &ctx.catalog, &mut ctx.book, &mut observer)
        .await
        .expect("Run failed");

    let submissions = executor.chain().submissions();
    let data = &submissions[0];
    assert_eq!(data[data.len() - 1], 42);
}
