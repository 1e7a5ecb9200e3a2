//! Accounts controller
//!
//! A read-through projection over the account list the keyring service
//! maintains. Owns no mutation logic of its own (the keyring service is
//! the source of truth for derivation/import); it exists so the RPC
//! engine and port router can query the current address list without
//! reaching into the keyring service directly, and so the projection can
//! dedupe-publish `accounts.changed` using sorted-id structural equality.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::messenger::Messenger;
use crate::types::AccountRecord;

pub struct AccountsController {
    accounts: RwLock<Vec<AccountRecord>>,
    messenger: Messenger,
}

impl AccountsController {
    pub fn new(messenger: Messenger) -> Self {
        Self {
            accounts: RwLock::new(Vec::new()),
            messenger,
        }
    }

    pub async fn get_state(&self, namespace: &str, include_hidden: bool) -> Vec<AccountRecord> {
        self.accounts
            .read()
            .await
            .iter()
            .filter(|a| a.namespace == namespace && (include_hidden || !a.hidden))
            .cloned()
            .collect()
    }

    fn sorted_visible_ids(accounts: &[AccountRecord]) -> Vec<&str> {
        let mut ids: Vec<&str> = accounts
            .iter()
            .filter(|a| !a.hidden)
            .map(|a| a.account_id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Replace the full projection (e.g. after a keyring mutation) and
    /// publish `accounts.changed` only if the visible id set actually
    /// changed.
    pub async fn sync(&self, accounts: Vec<AccountRecord>) {
        let mut current = self.accounts.write().await;
        let changed = Self::sorted_visible_ids(&current) != Self::sorted_visible_ids(&accounts);
        *current = accounts;
        if changed {
            let visible: Vec<&str> = Self::sorted_visible_ids(&current);
            self.messenger
                .publish("accounts.changed", serde_json::json!({ "accountIds": visible }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountSource;
    use uuid::Uuid;

    fn account(id: &str, namespace: &str, hidden: bool) -> AccountRecord {
        AccountRecord {
            account_id: id.to_string(),
            keyring_id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            payload_hex: "abc".to_string(),
            derivation_path: None,
            derivation_index: Some(0),
            source: AccountSource::Derived,
            hidden,
            alias: None,
        }
    }

    #[tokio::test]
    async fn sync_publishes_only_when_visible_ids_change() {
        let messenger = Messenger::new(16);
        let mut sub = messenger.subscribe();
        let controller = AccountsController::new(messenger);

        controller
            .sync(vec![account("eip155:0xa", "eip155", false)])
            .await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.topic, "accounts.changed");

        // Re-syncing the same set must not publish again.
        controller
            .sync(vec![account("eip155:0xa", "eip155", false)])
            .await;
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn get_state_excludes_hidden_unless_requested() {
        let messenger = Messenger::new(16);
        let controller = AccountsController::new(messenger);
        controller
            .sync(vec![
                account("eip155:0xa", "eip155", false),
                account("eip155:0xb", "eip155", true),
            ])
            .await;

        assert_eq!(controller.get_state("eip155", false).await.len(), 1);
        assert_eq!(controller.get_state("eip155", true).await.len(), 2);
    }
}
