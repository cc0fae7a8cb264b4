use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ledgerflow_events::{MessageBus, OutboxEvent};

use crate::store::{Database, IsolationLevel, OutboxStore, StoreError, UnitOfWork};

pub const DEFAULT_RELAY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RELAY_BATCH_SIZE: usize = 10;
pub const DEFAULT_RELAY_TOPIC: &str = "transaction.events";
/// Shortest tick the relay runs at; `tokio::time::interval` rejects zero.
pub const MIN_RELAY_INTERVAL: Duration = Duration::from_millis(1);

/// Outbox relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Maximum events fetched per tick
    pub batch_size: usize,
    /// Bus topic every event is published to
    pub topic: String,
    /// Name for logging
    pub name: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RELAY_INTERVAL,
            batch_size: DEFAULT_RELAY_BATCH_SIZE,
            topic: DEFAULT_RELAY_TOPIC.to_string(),
            name: "outbox-relay".to_string(),
        }
    }
}

impl RelayConfig {
    /// Clamped to `MIN_RELAY_INTERVAL`.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_RELAY_INTERVAL);
        self
    }

    /// Clamped to at least one event.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }
}

/// Where the relay currently is in its tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    Idle,
    Fetching,
    Publishing,
    /// Terminal.
    Stopped,
}

/// Cumulative relay counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub ticks: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub mark_failures: u64,
    pub fetch_failures: u64,
}

/// Outcome of one drained batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RelayState>,
    stats: Mutex<RelayStats>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stats(&self) -> MutexGuard<'_, RelayStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: RelayState) {
        *self.state() = state;
    }
}

/// Drains pending outbox events to the message bus.
///
/// Each tick fetches up to `batch_size` pending events oldest first, publishes
/// each one keyed by its aggregate id, and marks it processed after a
/// successful publish. A failed publish leaves the event pending for the next
/// tick (no backoff, no dead-lettering). Delivery is at-least-once: a crash
/// between publish and mark causes the event to be published again.
#[derive(Debug)]
pub struct OutboxRelay<D, B> {
    db: D,
    bus: B,
    config: RelayConfig,
    shared: Arc<Shared>,
}

impl<D, B> OutboxRelay<D, B>
where
    D: Database,
    B: MessageBus,
{
    pub fn new(db: D, bus: B, config: RelayConfig) -> Self {
        // The fields are public, so re-apply the builder bounds.
        let config = RelayConfig {
            interval: config.interval.max(MIN_RELAY_INTERVAL),
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            db,
            bus,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(RelayState::Idle),
                stats: Mutex::new(RelayStats::default()),
            }),
        }
    }

    pub fn state(&self) -> RelayState {
        *self.shared.state()
    }

    pub fn stats(&self) -> RelayStats {
        self.shared.stats().clone()
    }

    /// Drain one batch.
    ///
    /// Only a failed fetch is returned as an error; publish and mark failures
    /// are logged, counted and left for the next batch.
    pub async fn run_once(&self) -> Result<BatchReport, StoreError> {
        self.shared.set_state(RelayState::Fetching);
        let events = match self.fetch_pending().await {
            Ok(events) => events,
            Err(e) => {
                self.shared.stats().fetch_failures += 1;
                self.shared.set_state(RelayState::Idle);
                return Err(e);
            }
        };

        let mut report = BatchReport {
            fetched: events.len(),
            ..BatchReport::default()
        };

        for event in events {
            self.shared.set_state(RelayState::Publishing);
            if self.relay_event(&event).await {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }

        self.shared.set_state(RelayState::Idle);
        if report.fetched > 0 {
            debug!(
                relay = %self.config.name,
                fetched = report.fetched,
                published = report.published,
                failed = report.failed,
                "relayed outbox batch"
            );
        }
        Ok(report)
    }

    async fn fetch_pending(&self) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut uow = self.db.begin(IsolationLevel::ReadCommitted).await?;
        let events = uow.fetch_pending(self.config.batch_size).await?;
        uow.commit().await?;
        Ok(events)
    }

    /// Publish then mark. Returns whether the event was published.
    async fn relay_event(&self, event: &OutboxEvent) -> bool {
        if let Err(e) = self
            .bus
            .publish(&self.config.topic, &event.partition_key(), &event.payload)
            .await
        {
            self.shared.stats().publish_failures += 1;
            warn!(
                relay = %self.config.name,
                event_id = %event.id,
                error = %e,
                "failed to publish outbox event; will retry next tick"
            );
            return false;
        }
        self.shared.stats().published += 1;

        if let Err(e) = self.mark_processed(event).await {
            self.shared.stats().mark_failures += 1;
            warn!(
                relay = %self.config.name,
                event_id = %event.id,
                error = %e,
                "published event could not be marked processed; it will be redelivered"
            );
        }
        true
    }

    async fn mark_processed(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        let mut uow = self.db.begin(IsolationLevel::ReadCommitted).await?;
        let transitioned = uow.mark_processed(event.id).await?;
        uow.commit().await?;
        if !transitioned {
            debug!(event_id = %event.id, "outbox event was already processed");
        }
        Ok(())
    }
}

impl<D, B> OutboxRelay<D, B>
where
    D: Database + 'static,
    B: MessageBus + 'static,
{
    /// Run the relay as a background task until the handle is shut down.
    pub fn spawn(db: D, bus: B, config: RelayConfig) -> RelayHandle {
        let relay = Self::new(db, bus, config);
        let shared = relay.shared.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(relay_loop(relay, shutdown_rx));

        RelayHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            shared,
        }
    }
}

async fn relay_loop<D, B>(relay: OutboxRelay<D, B>, mut shutdown: watch::Receiver<bool>)
where
    D: Database,
    B: MessageBus,
{
    let mut ticker = tokio::time::interval(relay.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        relay = %relay.config.name,
        topic = %relay.config.topic,
        interval_ms = relay.config.interval.as_millis() as u64,
        batch_size = relay.config.batch_size,
        "outbox relay started"
    );

    loop {
        tokio::select! {
            biased;
            // A dropped handle also stops the relay.
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                relay.shared.stats().ticks += 1;
                // The batch always completes before shutdown is observed.
                if let Err(e) = relay.run_once().await {
                    error!(relay = %relay.config.name, error = %e, "failed to fetch pending outbox events");
                }
            }
        }
    }

    relay.shared.set_state(RelayState::Stopped);
    info!(relay = %relay.config.name, "outbox relay stopped");
}

/// Handle to control and join a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl RelayHandle {
    /// Request shutdown and wait for the current batch to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "outbox relay task failed");
            }
        }
    }

    pub fn state(&self) -> RelayState {
        *self.shared.state()
    }

    pub fn stats(&self) -> RelayStats {
        self.shared.stats().clone()
    }
}
