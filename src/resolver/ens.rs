//! ENS text records over Ethereum JSON-RPC
//!
//! A lookup is two `eth_call`s: the registry names the resolver contract for
//! the domain's node, then that resolver's `text(node, key)` returns the
//! record. Nodes are computed with the EIP-137 namehash.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tracing::debug;

use super::{validate_value, NameResolver};
use crate::error::{ResolutionError, RpcError};

/// ENS registry, same address on mainnet and the public testnets
pub const ENS_REGISTRY: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

const RPC_TIMEOUT: Duration = Duration::from_secs(20);

/// Read-only contract call against the latest block
#[async_trait]
pub trait EthCall: Send + Sync {
    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, RpcError>;
}

/// `eth_call` over HTTP JSON-RPC
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (CallParams<'a>, &'static str),
}

#[derive(Debug, Serialize)]
struct CallParams<'a> {
    to: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

fn call_request<'a>(to: &'a str, data: &[u8]) -> RpcRequest<'a> {
    RpcRequest {
        jsonrpc: "2.0",
        id: 1,
        method: "eth_call",
        params: (
            CallParams {
                to,
                data: format!("0x{}", hex::encode(data)),
            },
            "latest",
        ),
    }
}

#[async_trait]
impl EthCall for JsonRpcClient {
    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let response: RpcResponse = self
            .client
            .post(&self.url)
            .timeout(RPC_TIMEOUT)
            .json(&call_request(to, data))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| RpcError::Malformed("response has no result".to_string()))?;
        hex::decode(result.trim_start_matches("0x")).map_err(|e| RpcError::Malformed(e.to_string()))
    }
}

/// Reads text records through the ENS registry
pub struct EnsResolver {
    rpc: Arc<dyn EthCall>,
    registry: String,
}

impl EnsResolver {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self::with_rpc(Arc::new(JsonRpcClient::new(rpc_url)))
    }

    pub fn with_rpc(rpc: Arc<dyn EthCall>) -> Self {
        Self {
            rpc,
            registry: ENS_REGISTRY.to_string(),
        }
    }
}

#[async_trait]
impl NameResolver for EnsResolver {
    async fn resolve(&self, domain: &str, record_key: &str) -> Result<String, ResolutionError> {
        let lookup = |e: RpcError| ResolutionError::Lookup {
            domain: domain.to_string(),
            reason: e.to_string(),
        };
        let not_found = || ResolutionError::NotFound {
            domain: domain.to_string(),
            key: record_key.to_string(),
        };

        let node = namehash(domain);
        let returned = self
            .rpc
            .call(&self.registry, &resolver_call(&node))
            .await
            .map_err(lookup)?;
        let resolver = decode_address(&returned).map_err(lookup)?.ok_or_else(not_found)?;
        debug!(domain, resolver = %resolver, "found ENS resolver");

        let returned = self
            .rpc
            .call(&resolver, &text_call(&node, record_key))
            .await
            .map_err(lookup)?;
        let value = decode_string(&returned).map_err(lookup)?;
        if value.is_empty() {
            return Err(not_found());
        }
        validate_value(domain, record_key, &value)
    }
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// EIP-137 namehash; labels are lowercased
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.to_lowercase().as_bytes());
        let mut joined = [0u8; 64];
        joined[..32].copy_from_slice(&node);
        joined[32..].copy_from_slice(&label_hash);
        node = keccak256(&joined);
    }
    node
}

/// First four bytes of the signature's hash
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn word(value: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&(value as u64).to_be_bytes());
    out
}

/// `resolver(bytes32)` calldata
pub fn resolver_call(node: &[u8; 32]) -> Vec<u8> {
    let mut data = selector("resolver(bytes32)").to_vec();
    data.extend_from_slice(node);
    data
}

/// `text(bytes32,string)` calldata
pub fn text_call(node: &[u8; 32], key: &str) -> Vec<u8> {
    let mut data = selector("text(bytes32,string)").to_vec();
    data.extend_from_slice(node);
    // Head is two words, so the string tail starts at 0x40
    data.extend_from_slice(&word(0x40));
    data.extend_from_slice(&word(key.len()));
    data.extend_from_slice(key.as_bytes());
    let padding = (32 - key.len() % 32) % 32;
    data.resize(data.len() + padding, 0);
    data
}

/// ABI `address` return value; the zero address means unset
pub fn decode_address(data: &[u8]) -> Result<Option<String>, RpcError> {
    let slot = data
        .get(..32)
        .ok_or_else(|| RpcError::Malformed(format!("address needs 32 bytes, got {}", data.len())))?;
    let address = &slot[12..];
    if address.iter().all(|b| *b == 0) {
        return Ok(None);
    }
    Ok(Some(format!("0x{}", hex::encode(address))))
}

fn read_word(data: &[u8], at: usize) -> Result<usize, RpcError> {
    let slot = at
        .checked_add(32)
        .and_then(|end| data.get(at..end))
        .ok_or_else(|| RpcError::Malformed(format!("no word at offset {}", at)))?;
    if slot[..24].iter().any(|b| *b != 0) {
        return Err(RpcError::Malformed(format!("word at offset {} out of range", at)));
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&slot[24..]);
    usize::try_from(u64::from_be_bytes(low))
        .map_err(|_| RpcError::Malformed(format!("word at offset {} out of range", at)))
}

/// ABI `string` return value; an empty return is an empty string
pub fn decode_string(data: &[u8]) -> Result<String, RpcError> {
    if data.is_empty() {
        return Ok(String::new());
    }
    let offset = read_word(data, 0)?;
    let len = read_word(data, offset)?;
    let start = offset + 32;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| RpcError::Malformed(format!("string of {} bytes truncated", len)))?;
    String::from_utf8(bytes.to_vec()).map_err(|e| RpcError::Malformed(e.to_string()))
}
