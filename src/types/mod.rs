//! Shared Types Module
//!
//! Design-level entities shared across the wallet core: vault ciphertext
//! shape, keyring/account metadata, chain registry records, permission
//! grants, approval tasks, transaction records, and port/session context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A CAIP-2 chain reference, `namespace:reference` (e.g. `eip155:1`).
///
/// Validation here is intentionally shallow: we check the two-part shape
/// this process needs, not a full CAIP-2 registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainRef {
    namespace: String,
    reference: String,
}

impl ChainRef {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut parts = raw.splitn(2, ':');
        let namespace = parts.next().unwrap_or_default();
        let reference = parts.next().unwrap_or_default();
        if namespace.is_empty() || reference.is_empty() {
            return Err(format!("malformed chain reference: {}", raw));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            reference: reference.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl std::fmt::Display for ChainRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl TryFrom<String> for ChainRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChainRef> for String {
    fn from(value: ChainRef) -> Self {
        value.to_string()
    }
}

/// Ciphertext shape for the password-sealed vault. Exactly one exists per
/// installation once initialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultCiphertext {
    pub version: u32,
    pub algorithm: String,
    /// base64-encoded random salt.
    pub salt: String,
    pub iterations: u32,
    /// base64-encoded random IV/nonce.
    pub iv: String,
    /// base64-encoded AES-GCM ciphertext (includes the auth tag).
    pub cipher: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
}

impl VaultCiphertext {
    pub fn new(salt: String, iterations: u32, iv: String, cipher: String) -> Self {
        Self {
            version: 1,
            algorithm: "pbkdf2-sha256".to_string(),
            salt,
            iterations,
            iv,
            cipher,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Keyring kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyringType {
    Hd,
    PrivateKey,
}

/// Persisted keyring metadata. Owned by the keyring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyringMeta {
    pub keyring_id: Uuid,
    #[serde(rename = "type")]
    pub kind: KeyringType,
    pub namespace: String,
    pub alias: Option<String>,
    pub created_at: i64,
    pub backed_up: bool,
}

/// How an account entered the keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSource {
    Derived,
    Imported,
}

/// A derived or imported account, unique by `account_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub keyring_id: Uuid,
    pub namespace: String,
    /// Hex-encoded address bytes.
    pub payload_hex: String,
    pub derivation_path: Option<String>,
    pub derivation_index: Option<u32>,
    pub source: AccountSource,
    pub hidden: bool,
    pub alias: Option<String>,
}

/// A registered chain's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub chain_ref: ChainRef,
    pub namespace: String,
    /// 0x-prefixed hex chain id.
    pub chain_id: String,
    pub display_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_endpoints: Vec<String>,
    pub block_explorers: Vec<String>,
    pub features: Vec<String>,
    pub provider_policies: Option<ProviderPolicies>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Per-chain overrides for locked-session behavior, consulted by the RPC
/// engine's locked guard before namespace-level passthrough lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderPolicies {
    /// method name (or "*" wildcard) -> locked-session policy.
    pub locked: std::collections::HashMap<String, LockedMethodPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedMethodPolicy {
    pub allow: Option<bool>,
    pub response: Option<serde_json::Value>,
}

/// Permission capability domain. Closed set per spec: no other capability
/// kinds may be introduced without a design change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Basic,
    Accounts,
    Sign,
    Transaction,
}

/// One capability grant within a [`PermissionRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub capability: Capability,
    pub chain_refs: Vec<ChainRef>,
}

/// An origin's permission record for one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub origin: String,
    pub namespace: String,
    pub grants: Vec<Grant>,
    pub account_ids: Vec<String>,
}

impl PermissionRecord {
    /// An Accounts grant is legal only when `account_ids` is non-empty;
    /// an empty list means "not connected" even if other capabilities exist.
    pub fn is_connected(&self) -> bool {
        self.grants
            .iter()
            .any(|g| g.capability == Capability::Accounts)
            && !self.account_ids.is_empty()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.grants.iter().any(|g| g.capability == capability)
    }

    pub fn capability_covers_chain(&self, capability: Capability, chain_ref: &ChainRef) -> bool {
        self.grants
            .iter()
            .any(|g| g.capability == capability && g.chain_refs.contains(chain_ref))
    }
}

/// Context a request arrived under, needed to expire approvals by origin
/// when a port disconnects or a session rotates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub port_id: u64,
    pub session_id: String,
    pub request_id: String,
}

/// A pending user-confirmation task. Exists only in memory; re-created on
/// every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: Uuid,
    pub task_type: ApprovalType,
    pub origin: String,
    pub namespace: Option<String>,
    pub chain_ref: Option<ChainRef>,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub request_context: Option<RequestContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    RequestAccounts,
    SignMessage,
    SignTypedData,
    Transaction,
    AddChain,
    SwitchChain,
}

/// Transaction pipeline status. Forced ordering:
/// `pending -> approved -> signed -> broadcast -> (confirmed | failed | replaced)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Signed,
    Broadcast,
    Confirmed,
    Failed,
    Replaced,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Signed => "signed",
            TransactionStatus::Broadcast => "broadcast",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Replaced => "replaced",
        };
        write!(f, "{}", s)
    }
}

impl TransactionStatus {
    /// Whether `self -> next` is a legal pipeline transition.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Failed)
                | (Approved, Signed)
                | (Approved, Failed)
                | (Signed, Broadcast)
                | (Signed, Failed)
                | (Broadcast, Confirmed)
                | (Broadcast, Failed)
                | (Broadcast, Replaced)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Confirmed | TransactionStatus::Failed | TransactionStatus::Replaced
        )
    }
}

/// A transaction's full lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub namespace: String,
    pub chain_ref: ChainRef,
    pub origin: String,
    pub from: String,
    pub request: serde_json::Value,
    pub status: TransactionStatus,
    pub hash: Option<String>,
    pub receipt: Option<serde_json::Value>,
    pub error: Option<String>,
    pub user_rejected: bool,
    pub warnings: Vec<String>,
    pub issues: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransactionRecord {
    pub fn new(
        namespace: impl Into<String>,
        chain_ref: ChainRef,
        origin: impl Into<String>,
        from: impl Into<String>,
        request: serde_json::Value,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            chain_ref,
            origin: origin.into(),
            from: from.into(),
            request,
            status: TransactionStatus::Pending,
            hash: None,
            receipt: None,
            error: None,
            user_rejected: false,
            warnings: Vec::new(),
            issues: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Transition to `next`, rejecting a transition that is not on the
    /// whitelist.
    pub fn transition(&mut self, next: TransactionStatus) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!("transaction {} is already terminal", self.id));
        }
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "illegal transition {} -> {} for transaction {}",
                self.status, next, self.id
            ));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn mark_signed(&mut self) -> Result<(), String> {
        self.transition(TransactionStatus::Signed)
    }

    pub fn mark_broadcast(&mut self, hash: impl Into<String>) -> Result<(), String> {
        self.transition(TransactionStatus::Broadcast)?;
        self.hash = Some(hash.into());
        Ok(())
    }

    pub fn mark_confirmed(&mut self, receipt: serde_json::Value) -> Result<(), String> {
        self.transition(TransactionStatus::Confirmed)?;
        self.receipt = Some(receipt);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), String> {
        self.transition(TransactionStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn mark_rejected(&mut self) -> Result<(), String> {
        self.user_rejected = true;
        self.transition(TransactionStatus::Failed)
    }

    pub fn mark_replaced(&mut self) -> Result<(), String> {
        self.transition(TransactionStatus::Replaced)
    }
}

/// Per-port context: origin, namespace, and active chain. Owned by the
/// port router; one per live dApp port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortContext {
    pub origin: String,
    pub namespace: String,
    pub chain_ref: Option<ChainRef>,
    pub chain_id: Option<String>,
    pub meta: Option<serde_json::Value>,
}

/// Unlock state, persisted as vault metadata for cross-restart recovery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnlockState {
    pub is_unlocked: bool,
    pub timeout_ms: u64,
    pub last_unlocked_at: Option<i64>,
    pub next_auto_lock_at: Option<i64>,
}

impl Default for UnlockState {
    fn default() -> Self {
        Self {
            is_unlocked: false,
            timeout_ms: 900_000,
            last_unlocked_at: None,
            next_auto_lock_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ref_parses_namespace_and_reference() {
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        assert_eq!(chain_ref.namespace(), "eip155");
        assert_eq!(chain_ref.reference(), "1");
        assert_eq!(chain_ref.to_string(), "eip155:1");
    }

    #[test]
    fn chain_ref_rejects_malformed_input() {
        assert!(ChainRef::parse("eip155").is_err());
        assert!(ChainRef::parse(":1").is_err());
        assert!(ChainRef::parse("eip155:").is_err());
    }

    #[test]
    fn permission_record_requires_account_ids_for_connected() {
        let mut record = PermissionRecord {
            origin: "https://dapp.example".to_string(),
            namespace: "eip155".to_string(),
            grants: vec![Grant {
                capability: Capability::Accounts,
                chain_refs: vec![ChainRef::parse("eip155:1").unwrap()],
            }],
            account_ids: Vec::new(),
        };
        assert!(!record.is_connected());
        record.account_ids.push("eip155:1:0xabc".to_string());
        assert!(record.is_connected());
    }

    #[test]
    fn transaction_record_follows_whitelisted_transitions() {
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        let mut tx = TransactionRecord::new(
            "eip155",
            chain_ref,
            "https://dapp.example",
            "0xabc",
            serde_json::json!({}),
        );
        tx.transition(TransactionStatus::Approved).unwrap();
        tx.mark_signed().unwrap();
        tx.mark_broadcast("0xdeadbeef").unwrap();
        tx.mark_confirmed(serde_json::json!({"status": "0x1"}))
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert!(tx.mark_failed("too late").is_err());
    }

    #[test]
    fn transaction_record_rejects_out_of_order_transition() {
        let chain_ref = ChainRef::parse("eip155:1").unwrap();
        let mut tx = TransactionRecord::new(
            "eip155",
            chain_ref,
            "https://dapp.example",
            "0xabc",
            serde_json::json!({}),
        );
        assert!(tx.mark_broadcast("0xdead").is_err());
    }
}
