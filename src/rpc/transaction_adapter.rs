//! Real transaction signing, broadcast, and receipt polling for the
//! `eip155` namespace: builds a legacy EIP-155 transaction from whatever
//! fields the dApp supplied (filling in `nonce`/`gasPrice`/`gas` from the
//! active node when absent), signs it through the keyring, and submits
//! it with `eth_sendRawTransaction`.

use std::sync::Arc;

use async_trait::async_trait;
use rlp::RlpStream;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};

use crate::common::error::{Result, WalletError};
use crate::controllers::NetworkController;
use crate::keyring::KeyringService;
use crate::rpc::json_rpc;
use crate::types::ChainRef;

#[async_trait]
pub trait TransactionAdapter: Send + Sync {
    /// Build, sign, and broadcast a transaction draft; returns the
    /// transaction hash the node accepted it under.
    async fn sign_and_broadcast(&self, chain_ref: &ChainRef, from: &str, params: &Value) -> Result<String>;

    /// Poll for a receipt; `Ok(None)` means the node hasn't mined it yet.
    async fn fetch_receipt(&self, chain_ref: &ChainRef, hash: &str) -> Result<Option<Value>>;
}

pub struct Eip155TransactionAdapter {
    keyring: Arc<KeyringService>,
    network: Arc<NetworkController>,
    http: reqwest::Client,
}

impl Eip155TransactionAdapter {
    pub fn new(keyring: Arc<KeyringService>, network: Arc<NetworkController>, http: reqwest::Client) -> Self {
        Self { keyring, network, http }
    }

    async fn resolve_quantity(&self, chain_ref: &ChainRef, explicit: Option<String>, method: &str, params: Value) -> Result<Vec<u8>> {
        match explicit {
            Some(hex_value) => hex_to_minimal_bytes(&hex_value),
            None => {
                let result = json_rpc::call(&self.http, &self.network, chain_ref, method, params).await?;
                let hex_value = result
                    .as_str()
                    .ok_or_else(|| WalletError::internal(format!("rpc node returned non-string {}", method)))?;
                hex_to_minimal_bytes(hex_value)
            }
        }
    }
}

fn field(params: &Value, key: &str) -> Option<String> {
    params.get(0).and_then(|p| p.get(key)).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn hex_to_minimal_bytes(value: &str) -> Result<Vec<u8>> {
    let stripped = value.trim_start_matches("0x");
    let padded = if stripped.len() % 2 == 1 { format!("0{}", stripped) } else { stripped.to_string() };
    let bytes = hex::decode(&padded).map_err(|_| WalletError::InvalidParams(format!("bad hex quantity: {}", value)))?;
    Ok(trim_leading_zeros(&bytes).to_vec())
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b != 0) {
        Some(index) => &bytes[index..],
        None => &[],
    }
}

fn encode_legacy_tx(nonce: &[u8], gas_price: &[u8], gas_limit: &[u8], to: &[u8], value: &[u8], data: &[u8], v: &[u8], r: &[u8], s: &[u8]) -> Vec<u8> {
    let mut stream = RlpStream::new_list(9);
    for field in [nonce, gas_price, gas_limit, to, value, data, v, r, s] {
        stream.append(&field.to_vec());
    }
    stream.out().to_vec()
}

#[async_trait]
impl TransactionAdapter for Eip155TransactionAdapter {
    async fn sign_and_broadcast(&self, chain_ref: &ChainRef, from: &str, params: &Value) -> Result<String> {
        let chain_id: u64 = chain_ref
            .reference()
            .parse()
            .map_err(|_| WalletError::internal(format!("chain reference {} is not a numeric chain id", chain_ref)))?;

        let to_bytes = match field(params, "to") {
            Some(addr) => hex::decode(addr.trim_start_matches("0x")).map_err(|_| WalletError::InvalidParams("to is not hex".to_string()))?,
            None => Vec::new(),
        };
        let value_bytes = field(params, "value").map(|v| hex_to_minimal_bytes(&v)).transpose()?.unwrap_or_default();
        let data_bytes = match field(params, "data") {
            Some(d) => hex::decode(d.trim_start_matches("0x")).map_err(|_| WalletError::InvalidParams("data is not hex".to_string()))?,
            None => Vec::new(),
        };

        let nonce_bytes = self
            .resolve_quantity(chain_ref, field(params, "nonce"), "eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let gas_price_bytes = self
            .resolve_quantity(chain_ref, field(params, "gasPrice"), "eth_gasPrice", json!([]))
            .await?;
        let gas_limit_bytes = self
            .resolve_quantity(
                chain_ref,
                field(params, "gas").or_else(|| field(params, "gasLimit")),
                "eth_estimateGas",
                json!([params.get(0).cloned().unwrap_or_else(|| json!({}))]),
            )
            .await?;

        let chain_id_bytes = trim_leading_zeros(&chain_id.to_be_bytes()).to_vec();
        let unsigned = encode_legacy_tx(
            &nonce_bytes,
            &gas_price_bytes,
            &gas_limit_bytes,
            &to_bytes,
            &value_bytes,
            &data_bytes,
            &chain_id_bytes,
            &[],
            &[],
        );
        let hash: [u8; 32] = Keccak256::digest(&unsigned).into();

        let (r, s, recovery_id) = self.keyring.sign_transaction_hash(from.trim_start_matches("0x"), &hash).await?;
        let v = recovery_id as u64 + chain_id * 2 + 35;
        let v_bytes = trim_leading_zeros(&v.to_be_bytes()).to_vec();

        let signed = encode_legacy_tx(
            &nonce_bytes,
            &gas_price_bytes,
            &gas_limit_bytes,
            &to_bytes,
            &value_bytes,
            &data_bytes,
            &v_bytes,
            trim_leading_zeros(&r),
            trim_leading_zeros(&s),
        );

        let raw_hex = format!("0x{}", hex::encode(signed));
        let result = json_rpc::call(&self.http, &self.network, chain_ref, "eth_sendRawTransaction", json!([raw_hex])).await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| WalletError::internal("rpc node returned no transaction hash"))
    }

    async fn fetch_receipt(&self, chain_ref: &ChainRef, hash: &str) -> Result<Option<Value>> {
        let result = json_rpc::call(&self.http, &self.network, chain_ref, "eth_getTransactionReceipt", json!([hash])).await?;
        if result.is_null() {
            Ok(None)
        } else {
            Ok(Some(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_to_minimal_bytes_strips_leading_zeros_and_pads_odd_length() {
        assert_eq!(hex_to_minimal_bytes("0x0000002a").unwrap(), vec![0x2a]);
        assert_eq!(hex_to_minimal_bytes("0x0").unwrap(), Vec::<u8>::new());
        assert_eq!(hex_to_minimal_bytes("0xa").unwrap(), vec![0x0a]);
    }

    #[test]
    fn encode_legacy_tx_produces_a_nine_item_rlp_list() {
        let encoded = encode_legacy_tx(&[1], &[2], &[3], &[0u8; 20], &[], &[], &[4], &[5], &[6]);
        let decoded: Vec<Vec<u8>> = rlp::decode_list(&encoded);
        assert_eq!(decoded.len(), 9);
        assert_eq!(decoded[0], vec![1]);
        assert_eq!(decoded[6], vec![4]);
    }
}
