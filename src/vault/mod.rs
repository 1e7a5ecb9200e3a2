//! Vault
//!
//! Password-sealed secret store. Holds the single [`VaultCiphertext`] an
//! installation owns and, once unlocked, a zeroisable copy of the derived
//! key and the plaintext secret in memory. Adapted from the teacher's
//! `frost_server::keystore::Keystore`, upgraded from a single SHA-256 pass
//! to PBKDF2-SHA256 with a configurable (>= 600,000) iteration count, and
//! given real in-memory unlocked/locked session state instead of being
//! purely file-backed.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use tokio::sync::RwLock;
use zeroize::Zeroize;

use crate::common::error::{Result, WalletError};
use crate::types::VaultCiphertext;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const SECRET_LEN: usize = 32;
const KEY_LEN: usize = 32;

/// A secret byte buffer that zeroises on drop and cannot be cloned, so a
/// copy always has to go through an explicit, auditable path.
struct SecretBuffer(Vec<u8>);

impl SecretBuffer {
    fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns an owned copy; the caller is responsible for zeroising it
    /// when done (callers in this crate wrap returned secrets in
    /// `secrecy::Secret` or zeroise explicitly on drop).
    fn copy_out(&self) -> Vec<u8> {
        self.0.clone()
    }
}

enum VaultState {
    Uninitialised,
    Locked {
        ciphertext: VaultCiphertext,
    },
    Unlocked {
        ciphertext: VaultCiphertext,
        derived_key: SecretBuffer,
        secret: SecretBuffer,
    },
}

/// The password-sealed vault. `Uninitialised -> Unlocked <-> Locked`;
/// `Locked` is the only state a password can advance from.
pub struct Vault {
    state: RwLock<VaultState>,
    iterations: u32,
}

impl Vault {
    pub fn new(iterations: u32) -> Self {
        Self {
            state: RwLock::new(VaultState::Uninitialised),
            iterations,
        }
    }

    /// Restore a previously-sealed vault into the `Locked` state, e.g. on
    /// process startup after reading the ciphertext back from storage.
    pub async fn restore_locked(&self, ciphertext: VaultCiphertext) {
        let mut state = self.state.write().await;
        *state = VaultState::Locked { ciphertext };
    }

    fn derive_key(password: &str, salt: &[u8], iterations: u32) -> SecretBuffer {
        let mut key = vec![0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
        SecretBuffer::new(key)
    }

    fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| WalletError::internal("vault encryption failed"))
    }

    fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| WalletError::InvalidPassword)
    }

    /// Generate a random salt/secret, derive a key, and seal a fresh
    /// ciphertext. Fails if the vault is already initialised.
    pub async fn initialize(&self, password: &str) -> Result<VaultCiphertext> {
        let mut state = self.state.write().await;
        if !matches!(*state, VaultState::Uninitialised) {
            return Err(WalletError::AlreadyInitialized);
        }

        let mut rng = rand::thread_rng();
        let mut salt = vec![0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut secret = vec![0u8; SECRET_LEN];
        rng.fill_bytes(&mut secret);
        let mut iv = vec![0u8; IV_LEN];
        rng.fill_bytes(&mut iv);

        let derived_key = Self::derive_key(password, &salt, self.iterations);
        let cipher_bytes = Self::encrypt(derived_key.as_slice(), &iv, &secret)?;

        let ciphertext = VaultCiphertext::new(
            BASE64.encode(&salt),
            self.iterations,
            BASE64.encode(&iv),
            BASE64.encode(&cipher_bytes),
        );

        *state = VaultState::Unlocked {
            ciphertext: ciphertext.clone(),
            derived_key,
            secret: SecretBuffer::new(secret),
        };

        Ok(ciphertext)
    }

    /// Re-derive the key from `password` against the stored (or supplied)
    /// ciphertext, decrypt the secret, and enter the unlocked state.
    pub async fn unlock(&self, password: &str, ciphertext: Option<VaultCiphertext>) -> Result<Vec<u8>> {
        let mut state = self.state.write().await;

        let ciphertext = match (ciphertext, &*state) {
            (Some(ct), _) => ct,
            (None, VaultState::Locked { ciphertext }) => ciphertext.clone(),
            (None, VaultState::Unlocked { ciphertext, .. }) => ciphertext.clone(),
            (None, VaultState::Uninitialised) => return Err(WalletError::NotInitialized),
        };

        let salt = BASE64
            .decode(&ciphertext.salt)
            .map_err(|e| WalletError::InvalidCiphertext(e.to_string()))?;
        let iv = BASE64
            .decode(&ciphertext.iv)
            .map_err(|e| WalletError::InvalidCiphertext(e.to_string()))?;
        let cipher_bytes = BASE64
            .decode(&ciphertext.cipher)
            .map_err(|e| WalletError::InvalidCiphertext(e.to_string()))?;

        let derived_key = Self::derive_key(password, &salt, ciphertext.iterations);

        let decrypted = match Self::decrypt(derived_key.as_slice(), &iv, &cipher_bytes) {
            Ok(secret) => secret,
            Err(e) => {
                *state = VaultState::Locked { ciphertext };
                return Err(e);
            }
        };

        let secret_copy = decrypted.clone();
        *state = VaultState::Unlocked {
            ciphertext,
            derived_key,
            secret: SecretBuffer::new(decrypted),
        };

        Ok(secret_copy)
    }

    /// Zero the derived key and secret; retain the ciphertext.
    pub async fn lock(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match &*state {
            VaultState::Unlocked { ciphertext, .. } => {
                let ciphertext = ciphertext.clone();
                *state = VaultState::Locked { ciphertext };
                Ok(())
            }
            VaultState::Locked { .. } => Ok(()),
            VaultState::Uninitialised => Err(WalletError::NotInitialized),
        }
    }

    /// Rewrite the ciphertext with a new IV, keeping the current password's
    /// derived key. Requires the vault to be unlocked.
    pub async fn reseal(&self, secret: &[u8]) -> Result<VaultCiphertext> {
        let mut state = self.state.write().await;
        match &*state {
            VaultState::Unlocked {
                ciphertext,
                derived_key,
                ..
            } => {
                let mut iv = vec![0u8; IV_LEN];
                rand::thread_rng().fill_bytes(&mut iv);
                let cipher_bytes = Self::encrypt(derived_key.as_slice(), &iv, secret)?;

                let new_ciphertext = VaultCiphertext::new(
                    ciphertext.salt.clone(),
                    ciphertext.iterations,
                    BASE64.encode(&iv),
                    BASE64.encode(&cipher_bytes),
                );

                let new_secret = secret.to_vec();
                *state = VaultState::Unlocked {
                    ciphertext: new_ciphertext.clone(),
                    derived_key: SecretBuffer::new(derived_key.copy_out()),
                    secret: SecretBuffer::new(new_secret),
                };

                Ok(new_ciphertext)
            }
            VaultState::Locked { .. } => Err(WalletError::Locked),
            VaultState::Uninitialised => Err(WalletError::NotInitialized),
        }
    }

    /// Rewrite the ciphertext using an explicitly supplied password,
    /// deriving a fresh key and salt. Used when the password itself
    /// changes.
    pub async fn seal(&self, password: &str, secret: &[u8]) -> Result<VaultCiphertext> {
        let mut state = self.state.write().await;
        if matches!(*state, VaultState::Uninitialised) {
            return Err(WalletError::NotInitialized);
        }

        let mut rng = rand::thread_rng();
        let mut salt = vec![0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut iv = vec![0u8; IV_LEN];
        rng.fill_bytes(&mut iv);

        let derived_key = Self::derive_key(password, &salt, self.iterations);
        let cipher_bytes = Self::encrypt(derived_key.as_slice(), &iv, secret)?;

        let ciphertext = VaultCiphertext::new(
            BASE64.encode(&salt),
            self.iterations,
            BASE64.encode(&iv),
            BASE64.encode(&cipher_bytes),
        );

        *state = VaultState::Unlocked {
            ciphertext: ciphertext.clone(),
            derived_key,
            secret: SecretBuffer::new(secret.to_vec()),
        };

        Ok(ciphertext)
    }

    /// Return a copy of the current secret. Fails `Locked` otherwise.
    pub async fn export_key(&self) -> Result<Vec<u8>> {
        let state = self.state.read().await;
        match &*state {
            VaultState::Unlocked { secret, .. } => Ok(secret.copy_out()),
            VaultState::Locked { .. } => Err(WalletError::Locked),
            VaultState::Uninitialised => Err(WalletError::NotInitialized),
        }
    }

    /// Re-derive and decrypt without mutating session state.
    pub async fn verify_password(&self, password: &str) -> Result<bool> {
        let state = self.state.read().await;
        let ciphertext = match &*state {
            VaultState::Locked { ciphertext } => ciphertext,
            VaultState::Unlocked { ciphertext, .. } => ciphertext,
            VaultState::Uninitialised => return Err(WalletError::NotInitialized),
        };

        let salt = BASE64
            .decode(&ciphertext.salt)
            .map_err(|e| WalletError::InvalidCiphertext(e.to_string()))?;
        let iv = BASE64
            .decode(&ciphertext.iv)
            .map_err(|e| WalletError::InvalidCiphertext(e.to_string()))?;
        let cipher_bytes = BASE64
            .decode(&ciphertext.cipher)
            .map_err(|e| WalletError::InvalidCiphertext(e.to_string()))?;

        let derived_key = Self::derive_key(password, &salt, ciphertext.iterations);
        Ok(Self::decrypt(derived_key.as_slice(), &iv, &cipher_bytes).is_ok())
    }

    pub async fn is_unlocked(&self) -> bool {
        matches!(*self.state.read().await, VaultState::Unlocked { .. })
    }

    pub async fn is_initialized(&self) -> bool {
        !matches!(*self.state.read().await, VaultState::Uninitialised)
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlock_after_seal_returns_the_same_secret() {
        let vault = Vault::new(600_000);
        let ciphertext = vault.initialize("correct horse").await.unwrap();
        let secret = vault.export_key().await.unwrap();

        vault.lock().await.unwrap();
        let unlocked_secret = vault.unlock("correct horse", Some(ciphertext)).await.unwrap();

        assert_eq!(secret, unlocked_secret);
    }

    #[tokio::test]
    async fn wrong_password_fails_invalid_password_and_relocks() {
        let vault = Vault::new(600_000);
        let ciphertext = vault.initialize("correct horse").await.unwrap();
        vault.lock().await.unwrap();

        let result = vault.unlock("wrong password", Some(ciphertext)).await;
        assert!(matches!(result, Err(WalletError::InvalidPassword)));
        assert!(!vault.is_unlocked().await);
    }

    #[tokio::test]
    async fn reseal_preserves_salt_and_iterations() {
        let vault = Vault::new(600_000);
        let ciphertext = vault.initialize("pw").await.unwrap();
        let new_secret = b"brand new secret material!!!!!!".to_vec();

        let resealed = vault.reseal(&new_secret).await.unwrap();
        assert_eq!(resealed.salt, ciphertext.salt);
        assert_eq!(resealed.iterations, ciphertext.iterations);

        vault.lock().await.unwrap();
        let unlocked = vault.unlock("pw", Some(resealed)).await.unwrap();
        assert_eq!(unlocked, new_secret);
    }

    #[tokio::test]
    async fn export_key_fails_while_locked() {
        let vault = Vault::new(600_000);
        vault.initialize("pw").await.unwrap();
        vault.lock().await.unwrap();

        assert!(matches!(vault.export_key().await, Err(WalletError::Locked)));
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let vault = Vault::new(600_000);
        vault.initialize("pw").await.unwrap();
        assert!(matches!(
            vault.initialize("pw").await,
            Err(WalletError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn verify_password_does_not_mutate_session_state() {
        let vault = Vault::new(600_000);
        vault.initialize("pw").await.unwrap();
        vault.lock().await.unwrap();

        assert!(vault.verify_password("pw").await.unwrap());
        assert!(!vault.verify_password("wrong").await.unwrap());
        assert!(!vault.is_unlocked().await);
    }
}
