use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use ledgerflow_core::AccountId;

use super::{Account, AccountDirectory, AccountStatus, DirectoryError};

#[derive(Debug, Default)]
struct Inner {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    unreachable: AtomicBool,
}

/// In-memory account directory.
///
/// Intended for tests/dev. Ids are assigned sequentially from 1 by `create`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountDirectory {
    inner: Arc<Inner>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active account and return its id.
    pub fn create(&self, name: impl Into<String>) -> AccountId {
        let mut accounts = self
            .inner
            .accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = accounts.keys().next_back().map_or(1, |id| id.get() + 1);
        let id = AccountId::new(next);
        accounts.insert(
            id,
            Account {
                id,
                name: name.into(),
                is_active: true,
            },
        );
        id
    }

    /// Insert or replace an account.
    pub fn insert(&self, account: Account) {
        self.inner
            .accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(account.id, account);
    }

    /// Returns `false` if the account does not exist.
    pub fn set_active(&self, id: AccountId, active: bool) -> bool {
        let mut accounts = self
            .inner
            .accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match accounts.get_mut(&id) {
            Some(account) => {
                account.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Make every lookup fail as if the directory were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn get_account(&self, id: AccountId) -> Result<AccountStatus, DirectoryError> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unreachable("directory marked unreachable".to_string()));
        }

        let accounts = self
            .inner
            .accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(accounts
            .get(&id)
            .map_or(AccountStatus::MISSING, Account::status))
    }
}
