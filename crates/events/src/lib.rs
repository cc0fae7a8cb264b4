//! Domain events, the transactional outbox model, and the message-bus boundary.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod outbox;

pub use bus::{BusError, MessageBus, Subscription};
pub use event::{Event, TransactionCreated, TransactionKind};
pub use in_memory_bus::{InMemoryMessageBus, PublishedMessage};
pub use outbox::{NewOutboxEvent, OutboxEvent, OutboxStatus};
