//! `eip155` namespace adapter
//!
//! Canonical address codec and signing primitives for EVM-family chains.
//! BIP-32/secp256k1 are vetted crates (`bip32`, `k256`), never
//! reimplemented here.

use bip32::{DerivationPath, XPrv};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use sha3::{Digest, Keccak256};

use crate::common::error::{Result, WalletError};

pub const NAMESPACE: &str = "eip155";

/// `m/44'/60'/0'/0/{index}` — the standard Ethereum HD path.
pub fn derivation_path(index: u32) -> Result<DerivationPath> {
    format!("m/44'/60'/0'/0/{}", index)
        .parse()
        .map_err(|_| WalletError::IndexOutOfRange)
}

/// Derive a signing key from a BIP-39 seed at the standard Ethereum path.
pub fn derive_signing_key(seed: &[u8], index: u32) -> Result<SigningKey> {
    let path = derivation_path(index)?;
    let xprv = XPrv::derive_from_path(seed, &path)
        .map_err(|e| WalletError::internal(format!("hd derivation failed: {}", e)))?;
    Ok(xprv.private_key().clone())
}

/// A signing key parsed directly from a raw 32-byte private key (the
/// private-key-keyring case; no HD derivation involved).
pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(bytes).map_err(|_| WalletError::InvalidPrivateKey)
}

/// Canonical `0x`-prefixed, lowercase address for a signing key, computed
/// as the last 20 bytes of `keccak256(uncompressed_pubkey[1..])`.
pub fn address_from_signing_key(key: &SigningKey) -> String {
    let verifying_key = key.verifying_key();
    let encoded_point = verifying_key.to_encoded_point(false);
    let pubkey_bytes = encoded_point.as_bytes();
    // Strip the leading 0x04 uncompressed-point tag.
    let hash = Keccak256::digest(&pubkey_bytes[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Validate the shallow `0x` + 40 hex chars shape this process needs.
pub fn validate_address(address: &str) -> Result<()> {
    let stripped = address
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::InvalidAddress(address.to_string()))?;
    if stripped.len() != 40 || !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WalletError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// `personal_sign`: Ethereum signed-message hash is
/// `keccak256("\x19Ethereum Signed Message:\n" + len(message) + message)`.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Sign a 32-byte hash, returning the raw `(r, s, recovery_id)` triple.
/// Callers that need EIP-155's chain-bound `v` (transaction signing)
/// compute it themselves from `recovery_id`; `sign_prehash` below covers
/// the plain `27 + recovery_id` case `personal_sign`/EIP-712 clients expect.
pub fn sign_prehash_parts(key: &SigningKey, hash: &[u8; 32]) -> Result<([u8; 32], [u8; 32], u8)> {
    let (signature, recovery_id): (Signature, RecoveryId) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| WalletError::internal(format!("signing failed: {}", e)))?;

    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Ok((r, s, recovery_id.to_byte()))
}

/// Sign a 32-byte hash, returning the 65-byte `r || s || v` signature
/// EIP-191/EIP-1474 clients expect, hex-encoded with a `0x` prefix.
pub fn sign_prehash(key: &SigningKey, hash: &[u8; 32]) -> Result<String> {
    let (r, s, recovery_id) = sign_prehash_parts(key, hash)?;
    let mut bytes = Vec::with_capacity(65);
    bytes.extend_from_slice(&r);
    bytes.extend_from_slice(&s);
    bytes.push(27 + recovery_id);
    Ok(format!("0x{}", hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_path_follows_the_standard_ethereum_prefix() {
        let path = derivation_path(3).unwrap();
        assert_eq!(path.to_string(), "m/44'/60'/0'/0/3");
    }

    #[test]
    fn address_validation_rejects_wrong_length_and_missing_prefix() {
        assert!(validate_address("0x1234").is_err());
        assert!(validate_address(&"1".repeat(42)).is_err());
        assert!(validate_address(&format!("0x{}", "a".repeat(40))).is_ok());
    }

    #[test]
    fn personal_message_hash_includes_the_ethereum_prefix() {
        let hash_hello = personal_message_hash(b"hello");
        let hash_world = personal_message_hash(b"world");
        assert_ne!(hash_hello, hash_world);
    }

    #[test]
    fn signing_is_deterministic_for_the_same_key_and_hash() {
        let key = signing_key_from_bytes(&[7u8; 32]).unwrap();
        let hash = personal_message_hash(b"hello");
        let sig1 = sign_prehash(&key, &hash).unwrap();
        let sig2 = sign_prehash(&key, &hash).unwrap();
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 2 + 130);
    }
}
