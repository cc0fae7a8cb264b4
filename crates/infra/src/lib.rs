//! Infrastructure layer: stores, account directory, message bus transports,
//! the ledger service, the outbox relay, and configuration.

pub mod config;
pub mod directory;
pub mod event_bus;
pub mod ledger_service;
pub mod store;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, Settings};
pub use directory::{
    Account, AccountDirectory, AccountStatus, DirectoryError, InMemoryAccountDirectory,
    PostgresAccountDirectory,
};
pub use ledger_service::{
    ErrorCode, ErrorKind, LedgerError, LedgerService, OperationOutcome, OperationResponse,
    TransferReceipt,
};
pub use store::{Database, InMemoryDatabase, IsolationLevel, PgDatabase, StoreError, UnitOfWork};
pub use workers::{OutboxRelay, RelayConfig, RelayHandle, RelayState, RelayStats};
