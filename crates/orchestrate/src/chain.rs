//! Chain access: constructor-argument encoding and the deployment client.

use alloy_core::primitives::{Address, B256, Bytes, U256};
use serde::Deserialize;
use url::Url;

use crate::error::{OrchestrateError, Result};
use crate::network::GasPolicy;
use crate::rpc;

/// A concrete constructor argument, ready for word encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgValue {
    Address(Address),
    Uint(U256),
}

impl ArgValue {
    /// ABI-encode the argument as a single 32-byte word.
    ///
    /// Addresses are left-padded to 32 bytes; integers are big-endian.
    pub fn encode_word(&self) -> [u8; 32] {
        match self {
            Self::Address(addr) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(addr.as_slice());
                word
            }
            Self::Uint(value) => value.to_be_bytes::<32>(),
        }
    }
}

/// Parse a literal parameter value.
///
/// A 20-byte 0x-hex string is an address; anything else must be an unsigned
/// integer, decimal or 0x-hex.
pub fn parse_literal(raw: &str) -> std::result::Result<ArgValue, String> {
    if let Some(stripped) = raw.strip_prefix("0x") {
        if stripped.len() == 40 {
            return raw
                .parse::<Address>()
                .map(ArgValue::Address)
                .map_err(|e| format!("invalid address: {e}"));
        }
        return U256::from_str_radix(stripped, 16)
            .map(ArgValue::Uint)
            .map_err(|e| format!("invalid hex integer: {e}"));
    }
    U256::from_str_radix(raw, 10)
        .map(ArgValue::Uint)
        .map_err(|e| format!("invalid decimal integer: {e}"))
}

/// Build the deployment transaction payload: creation bytecode followed by
/// the word-encoded constructor arguments.
pub fn build_deploy_data(bytecode: &[u8], args: &[ArgValue]) -> Bytes {
    let mut data = Vec::with_capacity(bytecode.len() + args.len() * 32);
    data.extend_from_slice(bytecode);
    for arg in args {
        data.extend_from_slice(&arg.encode_word());
    }
    Bytes::from(data)
}

/// Receipt of a deployment transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReceipt {
    /// Address of the created contract, absent if the deployment reverted.
    pub contract_address: Option<Address>,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Whether the transaction executed successfully.
    pub success: bool,
}

/// Network-level access needed by the executor.
///
/// Submission is not idempotent by itself; at-most-once semantics come from
/// the executor's address-book pre-check, not from the network.
#[allow(async_fn_in_trait)]
pub trait ChainClient {
    /// Submit a contract-creation transaction, returning its hash.
    async fn submit_deployment(&self, from: &str, data: Bytes, gas: &GasPolicy) -> Result<B256>;

    /// Fetch the receipt for a transaction, `None` while unmined.
    async fn receipt(&self, tx: B256) -> Result<Option<DeploymentReceipt>>;

    /// Whether the node knows the transaction at all (mempool or mined).
    async fn transaction_known(&self, tx: B256) -> Result<bool>;

    /// Latest block number.
    async fn block_number(&self) -> Result<u64>;
}

/// JSON-RPC receipt shape, trimmed to the fields the executor needs.
#[derive(Debug, Deserialize)]
struct RawReceipt {
    #[serde(rename = "contractAddress")]
    contract_address: Option<Address>,
    #[serde(rename = "blockNumber", deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    status: u64,
}

/// Deserialize a u64 from a 0x-prefixed hex string.
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

/// [`ChainClient`] backed by an Ethereum JSON-RPC endpoint.
///
/// Signing is node-side (`eth_sendTransaction` with a `from` account), the
/// same account handling the plan's credential reference resolves to.
pub struct JsonRpcChainClient {
    http: reqwest::Client,
    url: String,
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: &Url) -> Result<Self> {
        Ok(Self {
            http: rpc::create_client()?,
            url: rpc_url.to_string(),
        })
    }

    async fn gas_price(&self, gas: &GasPolicy) -> Result<String> {
        match gas {
            GasPolicy::Fixed { price_wei } => Ok(format!("0x{price_wei:x}")),
            GasPolicy::Estimated => {
                rpc::json_rpc_call(&self.http, &self.url, "eth_gasPrice", vec![]).await
            }
        }
    }
}

impl ChainClient for JsonRpcChainClient {
    async fn submit_deployment(&self, from: &str, data: Bytes, gas: &GasPolicy) -> Result<B256> {
        let gas_price = self.gas_price(gas).await?;
        let tx = serde_json::json!({
            "from": from,
            "data": format!("0x{}", hex::encode(&data)),
            "gasPrice": gas_price,
        });

        let hash: String =
            rpc::json_rpc_call(&self.http, &self.url, "eth_sendTransaction", vec![tx]).await?;
        hash.parse::<B256>()
            .map_err(|e| OrchestrateError::TransientNetwork {
                reason: format!("malformed transaction hash '{hash}': {e}"),
            })
    }

    async fn receipt(&self, tx: B256) -> Result<Option<DeploymentReceipt>> {
        let raw: Option<RawReceipt> = rpc::json_rpc_call(
            &self.http,
            &self.url,
            "eth_getTransactionReceipt",
            vec![serde_json::json!(format!("{tx}"))],
        )
        .await?;

        Ok(raw.map(|r| DeploymentReceipt {
            contract_address: r.contract_address,
            block_number: r.block_number,
            success: r.status == 1,
        }))
    }

    async fn transaction_known(&self, tx: B256) -> Result<bool> {
        let raw: Option<serde_json::Value> = rpc::json_rpc_call(
            &self.http,
            &self.url,
            "eth_getTransactionByHash",
            vec![serde_json::json!(format!("{tx}"))],
        )
        .await?;
        Ok(raw.is_some())
    }

    async fn block_number(&self) -> Result<u64> {
        let hex: String =
            rpc::json_rpc_call(&self.http, &self.url, "eth_blockNumber", vec![]).await?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| {
            OrchestrateError::TransientNetwork {
                reason: format!("malformed block number '{hex}': {e}"),
            }
        })
    }
}
