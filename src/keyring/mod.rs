//! KeyringService
//!
//! Holds the namespace-scoped keyrings (HD, private-key) that derive and
//! import accounts and sign payloads on their behalf. On unlock it loads a
//! JSON payload - itself encrypted at rest by the [`crate::vault::Vault`] -
//! listing every registered keyring entry (a mnemonic phrase or a raw
//! private key); every mutation re-derives that payload and hands it back
//! to the vault to reseal, then persists metadata through the storage
//! port, mirroring the teacher's `frost_server::keystore` persistence
//! cycle generalized to many keyrings instead of one key share.

pub mod eip155;

use std::collections::HashMap;
use std::sync::Arc;

use bip0039::{Count, English, Mnemonic};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::common::error::{Result, WalletError};
use crate::storage::{Namespace, StoragePort, StoredRecord};
use crate::types::{AccountRecord, AccountSource, KeyringMeta, KeyringType};
use crate::vault::Vault;

/// Word counts the generator supports, per BIP-39.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnemonicWordCount {
    Twelve,
    Fifteen,
    Eighteen,
    TwentyOne,
    TwentyFour,
}

impl From<MnemonicWordCount> for Count {
    fn from(value: MnemonicWordCount) -> Self {
        match value {
            MnemonicWordCount::Twelve => Count::Words12,
            MnemonicWordCount::Fifteen => Count::Words15,
            MnemonicWordCount::Eighteen => Count::Words18,
            MnemonicWordCount::TwentyOne => Count::Words21,
            MnemonicWordCount::TwentyFour => Count::Words24,
        }
    }
}

/// One registered keyring's secret material, as stored in the vault's
/// resealed JSON payload. Never persisted outside the vault ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum KeyringEntry {
    Hd { phrase: String, next_index: u32 },
    PrivateKey { hex: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyringPayload {
    keyrings: HashMap<Uuid, KeyringEntry>,
}

struct KeyringServiceState {
    /// Plaintext secret material, present only while the vault is
    /// unlocked. `None` while locked; never serialized as-is.
    payload: Option<KeyringPayload>,
    metas: Vec<KeyringMeta>,
    accounts: Vec<AccountRecord>,
}

pub struct KeyringService {
    vault: Arc<Vault>,
    storage: Arc<dyn StoragePort>,
    state: RwLock<KeyringServiceState>,
}

impl KeyringService {
    pub fn new(vault: Arc<Vault>, storage: Arc<dyn StoragePort>) -> Self {
        Self {
            vault,
            storage,
            state: RwLock::new(KeyringServiceState {
                payload: None,
                metas: Vec::new(),
                accounts: Vec::new(),
            }),
        }
    }

    /// Generate a fresh BIP-39 mnemonic with the English wordlist.
    pub fn generate_mnemonic(word_count: MnemonicWordCount) -> String {
        Mnemonic::<English>::generate(word_count.into()).phrase().to_string()
    }

    /// Load keyring metadata/accounts from storage and decrypt the secret
    /// payload from the vault. Called right after `Vault::unlock`.
    pub async fn load(&self) -> Result<()> {
        let secret_bytes = self.vault.export_key().await?;
        let payload: KeyringPayload = if secret_bytes.is_empty() {
            KeyringPayload::default()
        } else {
            serde_json::from_slice(&secret_bytes).unwrap_or_default()
        };

        let meta_records = self.storage.get_all(Namespace::Keyrings).await.map_err(|e| {
            WalletError::storage(e.to_string())
        })?;
        let account_records = self.storage.get_all(Namespace::Accounts).await.map_err(|e| {
            WalletError::storage(e.to_string())
        })?;

        let metas = meta_records
            .into_iter()
            .filter_map(|(_, record)| serde_json::from_value(record.payload).ok())
            .collect();
        let accounts = account_records
            .into_iter()
            .filter_map(|(_, record)| serde_json::from_value(record.payload).ok())
            .collect();

        let mut state = self.state.write().await;
        state.payload = Some(payload);
        state.metas = metas;
        state.accounts = accounts;
        Ok(())
    }

    /// Drop plaintext secret material on lock. Metadata (non-secret)
    /// remains in the projection.
    pub async fn unload(&self) {
        let mut state = self.state.write().await;
        state.payload = None;
    }

    pub async fn list_accounts(&self, namespace: &str, include_hidden: bool) -> Vec<AccountRecord> {
        let state = self.state.read().await;
        state
            .accounts
            .iter()
            .filter(|a| a.namespace == namespace && (include_hidden || !a.hidden))
            .cloned()
            .collect()
    }

    async fn persist(&self, state: &KeyringServiceState) -> Result<()> {
        let payload = state.payload.clone().unwrap_or_default();
        let payload_bytes =
            serde_json::to_vec(&payload).map_err(|e| WalletError::internal(e.to_string()))?;
        self.vault.reseal(&payload_bytes).await?;

        for meta in &state.metas {
            let record = StoredRecord::new(
                serde_json::to_value(meta).map_err(|e| WalletError::internal(e.to_string()))?,
            );
            self.storage
                .put(Namespace::Keyrings, &meta.keyring_id.to_string(), record)
                .await
                .map_err(|e| WalletError::storage(e.to_string()))?;
        }
        for account in &state.accounts {
            let record = StoredRecord::new(
                serde_json::to_value(account).map_err(|e| WalletError::internal(e.to_string()))?,
            );
            self.storage
                .put(Namespace::Accounts, &account.account_id, record)
                .await
                .map_err(|e| WalletError::storage(e.to_string()))?;
        }
        Ok(())
    }

    fn account_id(namespace: &str, address: &str) -> String {
        format!("{}:{}", namespace, address)
    }

    /// Add an HD keyring from a mnemonic (freshly generated or imported).
    /// Rejects duplicates across existing HD keyrings of the same
    /// namespace by comparing the derived address at index 0.
    pub async fn add_hd_keyring(
        &self,
        phrase: &str,
        namespace: &str,
    ) -> Result<(Uuid, AccountRecord)> {
        let mnemonic = Mnemonic::<English>::from_phrase(phrase).map_err(|_| WalletError::InvalidMnemonic)?;
        let seed = mnemonic.to_seed("");

        let signing_key = eip155::derive_signing_key(&seed, 0)?;
        let address = eip155::address_from_signing_key(&signing_key);

        let mut state = self.state.write().await;

        for meta in state.metas.iter().filter(|m| {
            m.kind == KeyringType::Hd && m.namespace == namespace
        }) {
            if let Some(KeyringEntry::Hd { phrase: existing, .. }) = state
                .payload
                .as_ref()
                .and_then(|p| p.keyrings.get(&meta.keyring_id))
            {
                let existing_mnemonic = Mnemonic::<English>::from_phrase(existing)
                    .map_err(|_| WalletError::InvalidMnemonic)?;
                let existing_seed = existing_mnemonic.to_seed("");
                let existing_key = eip155::derive_signing_key(&existing_seed, 0)?;
                if eip155::address_from_signing_key(&existing_key) == address {
                    return Err(WalletError::DuplicateAccount);
                }
            }
        }

        let keyring_id = Uuid::new_v4();
        let meta = KeyringMeta {
            keyring_id,
            kind: KeyringType::Hd,
            namespace: namespace.to_string(),
            alias: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            backed_up: false,
        };
        let account = AccountRecord {
            account_id: Self::account_id(namespace, &address),
            keyring_id,
            namespace: namespace.to_string(),
            payload_hex: address.trim_start_matches("0x").to_string(),
            derivation_path: Some(eip155::derivation_path(0)?.to_string()),
            derivation_index: Some(0),
            source: AccountSource::Derived,
            hidden: false,
            alias: None,
        };

        state
            .payload
            .get_or_insert_with(KeyringPayload::default)
            .keyrings
            .insert(
                keyring_id,
                KeyringEntry::Hd {
                    phrase: phrase.to_string(),
                    next_index: 1,
                },
            );
        state.metas.push(meta);
        state.accounts.push(account.clone());

        self.persist(&state).await?;
        Ok((keyring_id, account))
    }

    /// Derive the next HD account for `keyring_id`, using a monotonically
    /// increasing index.
    pub async fn derive_next_account(&self, keyring_id: Uuid) -> Result<AccountRecord> {
        let mut state = self.state.write().await;

        let meta = state
            .metas
            .iter()
            .find(|m| m.keyring_id == keyring_id)
            .cloned()
            .ok_or_else(|| WalletError::account_not_found(keyring_id.to_string()))?;
        if meta.kind != KeyringType::Hd {
            return Err(WalletError::InvalidPrivateKey);
        }

        let phrase = match state
            .payload
            .as_ref()
            .and_then(|p| p.keyrings.get(&keyring_id))
        {
            Some(KeyringEntry::Hd { phrase, .. }) => phrase.clone(),
            _ => return Err(WalletError::SecretUnavailable),
        };
        let next_index = match state.payload.as_ref().unwrap().keyrings.get(&keyring_id) {
            Some(KeyringEntry::Hd { next_index, .. }) => *next_index,
            _ => return Err(WalletError::SecretUnavailable),
        };

        let mnemonic = Mnemonic::<English>::from_phrase(&phrase).map_err(|_| WalletError::InvalidMnemonic)?;
        let seed = mnemonic.to_seed("");
        let signing_key = eip155::derive_signing_key(&seed, next_index)?;
        let address = eip155::address_from_signing_key(&signing_key);
        let account_id = Self::account_id(&meta.namespace, &address);

        if state.accounts.iter().any(|a| a.account_id == account_id) {
            return Err(WalletError::DuplicateAccount);
        }

        let account = AccountRecord {
            account_id,
            keyring_id,
            namespace: meta.namespace.clone(),
            payload_hex: address.trim_start_matches("0x").to_string(),
            derivation_path: Some(eip155::derivation_path(next_index)?.to_string()),
            derivation_index: Some(next_index),
            source: AccountSource::Derived,
            hidden: false,
            alias: None,
        };

        if let Some(KeyringEntry::Hd { next_index: n, .. }) =
            state.payload.as_mut().unwrap().keyrings.get_mut(&keyring_id)
        {
            *n += 1;
        }
        state.accounts.push(account.clone());

        self.persist(&state).await?;
        Ok(account)
    }

    /// Import a raw private key as its own keyring. Rejects the import if
    /// its derived address already exists.
    pub async fn import_private_key(
        &self,
        hex_key: &str,
        namespace: &str,
    ) -> Result<(Uuid, AccountRecord)> {
        let bytes = hex::decode(hex_key.trim_start_matches("0x"))
            .map_err(|_| WalletError::InvalidPrivateKey)?;
        let signing_key = eip155::signing_key_from_bytes(&bytes)?;
        let address = eip155::address_from_signing_key(&signing_key);
        let account_id = Self::account_id(namespace, &address);

        let mut state = self.state.write().await;
        if state.accounts.iter().any(|a| a.account_id == account_id) {
            return Err(WalletError::DuplicateAccount);
        }

        let keyring_id = Uuid::new_v4();
        let meta = KeyringMeta {
            keyring_id,
            kind: KeyringType::PrivateKey,
            namespace: namespace.to_string(),
            alias: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            backed_up: true,
        };
        let account = AccountRecord {
            account_id,
            keyring_id,
            namespace: namespace.to_string(),
            payload_hex: address.trim_start_matches("0x").to_string(),
            derivation_path: None,
            derivation_index: None,
            source: AccountSource::Imported,
            hidden: false,
            alias: None,
        };

        state
            .payload
            .get_or_insert_with(KeyringPayload::default)
            .keyrings
            .insert(
                keyring_id,
                KeyringEntry::PrivateKey {
                    hex: hex::encode(&bytes),
                },
            );
        state.metas.push(meta);
        state.accounts.push(account.clone());

        self.persist(&state).await?;
        Ok((keyring_id, account))
    }

    pub async fn set_hidden(&self, account_id: &str, hidden: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.account_id == account_id)
            .ok_or_else(|| WalletError::account_not_found(account_id))?;
        account.hidden = hidden;
        let snapshot = KeyringServiceState {
            payload: state.payload.clone(),
            metas: state.metas.clone(),
            accounts: state.accounts.clone(),
        };
        self.persist(&snapshot).await
    }

    /// Remove a private-key keyring and its sole account.
    pub async fn remove_private_key_keyring(&self, keyring_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let meta = state
            .metas
            .iter()
            .find(|m| m.keyring_id == keyring_id)
            .cloned()
            .ok_or_else(|| WalletError::account_not_found(keyring_id.to_string()))?;
        if meta.kind != KeyringType::PrivateKey {
            return Err(WalletError::InvalidPrivateKey);
        }

        state.metas.retain(|m| m.keyring_id != keyring_id);
        state.accounts.retain(|a| a.keyring_id != keyring_id);
        if let Some(payload) = state.payload.as_mut() {
            payload.keyrings.remove(&keyring_id);
        }

        self.persist(&state).await
    }

    /// Remove an HD keyring. Only legal once every derived account for it
    /// has already been removed.
    pub async fn remove_hd_keyring(&self, keyring_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let meta = state
            .metas
            .iter()
            .find(|m| m.keyring_id == keyring_id)
            .cloned()
            .ok_or_else(|| WalletError::account_not_found(keyring_id.to_string()))?;
        if meta.kind != KeyringType::Hd {
            return Err(WalletError::InvalidPrivateKey);
        }
        if state.accounts.iter().any(|a| a.keyring_id == keyring_id) {
            return Err(WalletError::denied("HD keyring still has derived accounts"));
        }

        state.metas.retain(|m| m.keyring_id != keyring_id);
        if let Some(payload) = state.payload.as_mut() {
            payload.keyrings.remove(&keyring_id);
        }

        self.persist(&state).await
    }

    fn find_signing_key(state: &KeyringServiceState, address_payload_hex: &str) -> Result<k256::ecdsa::SigningKey> {
        let account = state
            .accounts
            .iter()
            .find(|a| a.payload_hex.eq_ignore_ascii_case(address_payload_hex))
            .ok_or_else(|| WalletError::account_not_found(address_payload_hex))?;

        let payload = state.payload.as_ref().ok_or(WalletError::Locked)?;
        match payload.keyrings.get(&account.keyring_id) {
            Some(KeyringEntry::Hd { phrase, .. }) => {
                let mnemonic = Mnemonic::<English>::from_phrase(phrase).map_err(|_| WalletError::InvalidMnemonic)?;
                let seed = mnemonic.to_seed("");
                eip155::derive_signing_key(&seed, account.derivation_index.unwrap_or(0))
            }
            Some(KeyringEntry::PrivateKey { hex: hex_key }) => {
                let bytes = hex::decode(hex_key).map_err(|_| WalletError::InvalidPrivateKey)?;
                eip155::signing_key_from_bytes(&bytes)
            }
            None => Err(WalletError::SecretUnavailable),
        }
    }

    /// Sign a personal message for `address` (40-hex, no `0x` prefix).
    pub async fn sign_personal_message(&self, address: &str, message: &[u8]) -> Result<String> {
        let state = self.state.read().await;
        let signing_key = Self::find_signing_key(&state, address)?;
        let hash = eip155::personal_message_hash(message);
        eip155::sign_prehash(&signing_key, &hash)
    }

    /// Sign a pre-hashed EIP-712 typed-data digest for `address`.
    pub async fn sign_typed_data_hash(&self, address: &str, hash: &[u8; 32]) -> Result<String> {
        let state = self.state.read().await;
        let signing_key = Self::find_signing_key(&state, address)?;
        eip155::sign_prehash(&signing_key, hash)
    }

    /// Sign a pre-hashed transaction digest for `address`, returning the
    /// raw `(r, s, recovery_id)` triple so the caller can fold in the
    /// EIP-155 chain id to compute `v` itself.
    pub async fn sign_transaction_hash(&self, address: &str, hash: &[u8; 32]) -> Result<([u8; 32], [u8; 32], u8)> {
        let state = self.state.read().await;
        let signing_key = Self::find_signing_key(&state, address)?;
        eip155::sign_prehash_parts(&signing_key, hash)
    }

    /// Export a keyring's mnemonic, gated on the vault password.
    pub async fn export_mnemonic(&self, keyring_id: Uuid, password: &str) -> Result<String> {
        if !self.vault.verify_password(password).await? {
            return Err(WalletError::InvalidPassword);
        }
        let state = self.state.read().await;
        match state.payload.as_ref().and_then(|p| p.keyrings.get(&keyring_id)) {
            Some(KeyringEntry::Hd { phrase, .. }) => Ok(phrase.clone()),
            Some(KeyringEntry::PrivateKey { .. }) => Err(WalletError::InvalidMnemonic),
            None => Err(WalletError::SecretUnavailable),
        }
    }

    /// Export a keyring's private key, gated on the vault password.
    pub async fn export_private_key(&self, keyring_id: Uuid, password: &str) -> Result<String> {
        if !self.vault.verify_password(password).await? {
            return Err(WalletError::InvalidPassword);
        }
        let state = self.state.read().await;
        match state.payload.as_ref().and_then(|p| p.keyrings.get(&keyring_id)) {
            Some(KeyringEntry::PrivateKey { hex: hex_key }) => Ok(hex_key.clone()),
            Some(KeyringEntry::Hd { phrase, next_index }) => {
                let mnemonic = Mnemonic::<English>::from_phrase(phrase).map_err(|_| WalletError::InvalidMnemonic)?;
                let seed = mnemonic.to_seed("");
                let index = next_index.saturating_sub(1);
                let key = eip155::derive_signing_key(&seed, index)?;
                Ok(hex::encode(key.to_bytes()))
            }
            None => Err(WalletError::SecretUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    async fn service_with_initialized_vault() -> KeyringService {
        let vault = Arc::new(Vault::new(600_000));
        vault.initialize("hunter2").await.unwrap();
        let storage = Arc::new(MemoryStore::new());
        let service = KeyringService::new(vault, storage);
        service.load().await.unwrap();
        service
    }

    #[tokio::test]
    async fn add_hd_keyring_derives_index_zero_account() {
        let service = service_with_initialized_vault().await;
        let phrase = KeyringService::generate_mnemonic(MnemonicWordCount::Twelve);
        let (keyring_id, account) = service.add_hd_keyring(&phrase, "eip155").await.unwrap();

        assert_eq!(account.keyring_id, keyring_id);
        assert_eq!(account.derivation_index, Some(0));
    }

    #[tokio::test]
    async fn importing_the_same_mnemonic_twice_fails_duplicate_account() {
        let service = service_with_initialized_vault().await;
        let phrase = KeyringService::generate_mnemonic(MnemonicWordCount::Twelve);
        service.add_hd_keyring(&phrase, "eip155").await.unwrap();

        let result = service.add_hd_keyring(&phrase, "eip155").await;
        assert!(matches!(result, Err(WalletError::DuplicateAccount)));
    }

    #[tokio::test]
    async fn derive_next_account_increments_index_monotonically() {
        let service = service_with_initialized_vault().await;
        let phrase = KeyringService::generate_mnemonic(MnemonicWordCount::Twelve);
        let (keyring_id, _) = service.add_hd_keyring(&phrase, "eip155").await.unwrap();

        let account1 = service.derive_next_account(keyring_id).await.unwrap();
        let account2 = service.derive_next_account(keyring_id).await.unwrap();

        assert_eq!(account1.derivation_index, Some(1));
        assert_eq!(account2.derivation_index, Some(2));
        assert_ne!(account1.account_id, account2.account_id);
    }

    #[tokio::test]
    async fn hd_keyring_cannot_be_removed_while_accounts_remain() {
        let service = service_with_initialized_vault().await;
        let phrase = KeyringService::generate_mnemonic(MnemonicWordCount::Twelve);
        let (keyring_id, _) = service.add_hd_keyring(&phrase, "eip155").await.unwrap();

        assert!(service.remove_hd_keyring(keyring_id).await.is_err());
    }

    #[tokio::test]
    async fn sign_personal_message_round_trips_through_export() {
        let service = service_with_initialized_vault().await;
        let phrase = KeyringService::generate_mnemonic(MnemonicWordCount::Twelve);
        let (_, account) = service.add_hd_keyring(&phrase, "eip155").await.unwrap();

        let signature = service
            .sign_personal_message(&account.payload_hex, b"hello")
            .await
            .unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 2 + 130);
    }

    #[tokio::test]
    async fn export_mnemonic_requires_correct_password() {
        let service = service_with_initialized_vault().await;
        let phrase = KeyringService::generate_mnemonic(MnemonicWordCount::Twelve);
        let (keyring_id, _) = service.add_hd_keyring(&phrase, "eip155").await.unwrap();

        assert!(matches!(
            service.export_mnemonic(keyring_id, "wrong").await,
            Err(WalletError::InvalidPassword)
        ));
        assert_eq!(service.export_mnemonic(keyring_id, "hunter2").await.unwrap(), phrase);
    }
}
