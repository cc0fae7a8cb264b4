//! Account directory client.
//!
//! Accounts are owned outside the ledger. The ledger only asks, on every
//! operation, whether an account exists and is active, and caches nothing.
//!
//! ## Implementations
//!
//! - `InMemoryAccountDirectory`: tests/dev
//! - `PostgresAccountDirectory`: reads an `accounts` table in the same database

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerflow_core::AccountId;

mod in_memory;
mod postgres;

pub use in_memory::InMemoryAccountDirectory;
pub use postgres::PostgresAccountDirectory;

/// Live answer for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountStatus {
    pub exists: bool,
    pub active: bool,
}

impl AccountStatus {
    pub const MISSING: AccountStatus = AccountStatus {
        exists: false,
        active: false,
    };

    pub fn is_available(&self) -> bool {
        self.exists && self.active
    }
}

/// An account as recorded by a directory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub is_active: bool,
}

impl Account {
    pub fn status(&self) -> AccountStatus {
        AccountStatus {
            exists: true,
            active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("account directory unreachable: {0}")]
    Unreachable(String),

    #[error("account directory error: {0}")]
    Backend(String),
}

/// Answers "does account X exist and is it active".
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<AccountStatus, DirectoryError>;
}

#[async_trait]
impl<D> AccountDirectory for Arc<D>
where
    D: AccountDirectory + ?Sized,
{
    async fn get_account(&self, id: AccountId) -> Result<AccountStatus, DirectoryError> {
        (**self).get_account(id).await
    }
}
