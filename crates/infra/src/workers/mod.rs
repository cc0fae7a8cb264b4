//! Background workers.

pub mod outbox_relay;

pub use outbox_relay::{
    BatchReport, OutboxRelay, RelayConfig, RelayHandle, RelayState, RelayStats,
};
