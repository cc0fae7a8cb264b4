//! Integration tests for the full ledger pipeline.
//!
//! Tests: LedgerService → stores (one unit of work) → outbox → OutboxRelay → MessageBus
//!
//! Verifies:
//! - Idempotent replays never double-apply
//! - Concurrent withdrawals and transfers cannot double-spend
//! - Every committed deposit/withdraw reaches the bus exactly once per relay pass
//! - Failed units of work leave no ledger, outbox or idempotency state behind

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ledgerflow_core::AccountId;
    use ledgerflow_events::{InMemoryMessageBus, TransactionCreated, TransactionKind};
    use ledgerflow_ledger::{EntryType, derive_balance};

    use crate::directory::InMemoryAccountDirectory;
    use crate::ledger_service::{LedgerError, LedgerService, OperationOutcome};
    use crate::store::InMemoryDatabase;
    use crate::workers::{OutboxRelay, RelayConfig};

    type Service = LedgerService<InMemoryDatabase, InMemoryAccountDirectory>;

    fn setup() -> (Arc<Service>, InMemoryDatabase, InMemoryAccountDirectory) {
        let db = InMemoryDatabase::new();
        let directory = InMemoryAccountDirectory::new();
        let service = Arc::new(LedgerService::new(db.clone(), directory.clone()));
        (service, db, directory)
    }

    async fn stored_balance(db: &InMemoryDatabase, account: AccountId) -> i64 {
        let entries = db.entries().await;
        derive_balance(entries.iter().filter(|e| e.account_id == account)).unwrap()
    }

    #[tokio::test]
    async fn idempotent_replay_does_not_double_apply() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");

        let first = service.deposit("k", a, 10_000, "x").await.unwrap();
        let second = service.deposit("k", a, 10_000, "y").await.unwrap();

        assert!(matches!(first, OperationOutcome::Applied(_)));
        assert_eq!(second, OperationOutcome::Duplicate);
        assert_eq!(service.balance(a).await.unwrap(), 10_000);
        assert_eq!(db.entries().await.len(), 1);
        assert_eq!(db.outbox_events().await.len(), 1);

        // The key is bound to its first operation, whatever is replayed under it.
        let replay = service.withdraw("k", a, 1, "z").await.unwrap();
        assert!(replay.is_duplicate());
        assert_eq!(service.balance(a).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_balance_unchanged() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");
        service.deposit("", a, 3_000, "seed").await.unwrap();

        let err = service.withdraw("", a, 3_001, "too much").await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(err.code().as_str(), "INSUFFICIENT_FUNDS");

        assert_eq!(service.balance(a).await.unwrap(), 3_000);
        assert_eq!(db.entries().await.len(), 1);
        assert_eq!(db.outbox_events().await.len(), 1);

        // Exactly the balance is allowed.
        service.withdraw("", a, 3_000, "all of it").await.unwrap();
        assert_eq!(service.balance(a).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transfer_moves_exactly_the_amount() {
        let (service, db, directory) = setup();
        let a = directory.create("a");
        let b = directory.create("b");
        service.deposit("", a, 10_000, "seed").await.unwrap();
        service.deposit("", b, 500, "seed").await.unwrap();

        let receipt = service.transfer(a, b, 2_500, "split").await.unwrap();

        assert_eq!(receipt.debit.entry_type, EntryType::TransferOut);
        assert_eq!(receipt.debit.account_id, a);
        assert_eq!(receipt.debit.amount.minor_units(), 2_500);
        assert_eq!(receipt.credit.entry_type, EntryType::TransferIn);
        assert_eq!(receipt.credit.account_id, b);
        assert_eq!(receipt.credit.amount.minor_units(), 2_500);

        assert_eq!(service.balance(a).await.unwrap(), 7_500);
        assert_eq!(service.balance(b).await.unwrap(), 3_000);

        let err = service.transfer(a, b, 7_501, "too much").await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(db.entries().await.len(), 4);
    }

    #[tokio::test]
    async fn transfer_to_inactive_account_writes_nothing() {
        let (service, db, directory) = setup();
        let a = directory.create("a");
        let b = directory.create("b");
        service.deposit("", a, 1_000, "seed").await.unwrap();
        directory.set_active(b, false);

        assert_eq!(
            service.transfer(a, b, 100, "x").await,
            Err(LedgerError::AccountUnavailable(b))
        );
        assert_eq!(db.entries().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_withdrawals_cannot_double_spend() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");
        service.deposit("", a, 10_000, "seed").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..2 {
            let service = service.clone();
            let key = format!("w-{i}");
            tasks.push(tokio::spawn(async move {
                service.withdraw(&key, a, 8_000, "race").await
            }));
        }

        let mut ok = 0;
        let mut insufficient = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(OperationOutcome::Applied(_)) => ok += 1,
                Err(LedgerError::InsufficientFunds { .. }) => insufficient += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!((ok, insufficient), (1, 1));
        assert_eq!(service.balance(a).await.unwrap(), 2_000);
        assert_eq!(stored_balance(&db, a).await, 2_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_submissions_apply_once() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service.deposit("same-key", a, 1_000, "retry storm").await
            }));
        }

        let mut applied = 0;
        for task in tasks {
            if !task.await.unwrap().unwrap().is_duplicate() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(service.balance(a).await.unwrap(), 1_000);
        assert_eq!(db.outbox_events().await.len(), 1);
        assert_eq!(db.idempotency_records().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transfers_and_withdrawals_respect_the_source_balance() {
        let (service, _db, directory) = setup();
        let a = directory.create("a");
        let b = directory.create("b");
        service.deposit("", a, 10_000, "seed").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    service.transfer(a, b, 3_000, "race").await.map(|_| ())
                } else {
                    service.withdraw("", a, 3_000, "race").await.map(|_| ())
                }
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => succeeded += 1,
                Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(succeeded, 3);
        let balance_a = service.balance(a).await.unwrap();
        assert_eq!(balance_a, 1_000);
        assert!(balance_a >= 0);
    }

    #[tokio::test]
    async fn committed_operations_reach_the_bus_through_the_relay() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");
        let b = directory.create("bob");
        let bus = Arc::new(InMemoryMessageBus::new());
        let subscription = bus.subscribe();

        let deposit = service.deposit("d-1", a, 5_000, "pay").await.unwrap();
        let withdraw = service.withdraw("w-1", a, 2_000, "rent").await.unwrap();
        service.transfer(a, b, 1_000, "gift").await.unwrap();

        let pending = db.outbox_events().await;
        assert_eq!(pending.len(), 2, "transfers emit no outbox event");
        assert!(pending.iter().all(|e| e.is_pending()));

        let relay = OutboxRelay::new(db.clone(), bus.clone(), RelayConfig::default());
        let report = relay.run_once().await.unwrap();
        assert_eq!(report.published, 2);

        let messages = subscription.drain();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.topic == "transaction.events"));
        assert!(messages.iter().all(|m| m.key == a.to_string()));

        let events: Vec<TransactionCreated> = messages
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect();
        assert_eq!(events[0].kind, TransactionKind::Deposit);
        assert_eq!(Some(events[0].entry_id), deposit.entry().map(|e| e.id));
        assert_eq!(events[0].amount, 5_000);
        assert_eq!(events[1].kind, TransactionKind::Withdraw);
        assert_eq!(Some(events[1].entry_id), withdraw.entry().map(|e| e.id));
        assert_eq!(events[1].note, "rent");

        let outbox = db.outbox_events().await;
        assert!(outbox.iter().all(|e| !e.is_pending() && e.processed_at.is_some()));
        assert_eq!(
            outbox.iter().map(|e| e.id).collect::<Vec<_>>(),
            events.iter().map(|e| e.event_id).collect::<Vec<_>>()
        );

        assert_eq!(relay.run_once().await.unwrap().fetched, 0);
        assert!(subscription.drain().is_empty());
    }

    #[tokio::test]
    async fn publish_failures_are_retried_until_delivered() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");
        let bus = Arc::new(InMemoryMessageBus::new());
        service.deposit("", a, 100, "one").await.unwrap();

        let relay = OutboxRelay::new(db.clone(), bus.clone(), RelayConfig::default());

        bus.set_unavailable(true);
        for _ in 0..5 {
            assert_eq!(relay.run_once().await.unwrap().failed, 1);
        }
        assert!(db.outbox_events().await[0].is_pending());

        bus.set_unavailable(false);
        assert_eq!(relay.run_once().await.unwrap().published, 1);
        assert_eq!(bus.published().len(), 1);
        assert!(!db.outbox_events().await[0].is_pending());
    }

    #[tokio::test]
    async fn outbox_write_failure_rolls_back_the_entry_and_the_claim() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");

        db.set_fail_outbox_writes(true);
        let err = service.deposit("k-1", a, 1_000, "x").await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert!(err.is_retryable());

        assert!(db.entries().await.is_empty());
        assert!(db.outbox_events().await.is_empty());
        assert!(db.idempotency_records().await.is_empty());

        // The same key is free again, so the client's retry applies once.
        db.set_fail_outbox_writes(false);
        let outcome = service.deposit("k-1", a, 1_000, "x").await.unwrap();
        assert!(!outcome.is_duplicate());
        assert_eq!(service.balance(a).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn commit_failure_leaves_nothing_behind() {
        let (service, db, directory) = setup();
        let a = directory.create("alice");

        db.set_fail_commits(true);
        let err = service.deposit("k-2", a, 1_000, "x").await.unwrap_err();
        db.set_fail_commits(false);

        assert!(matches!(err, LedgerError::Conflict(_)));
        assert_eq!(err.code().as_str(), "INTERNAL");
        assert!(db.entries().await.is_empty());
        assert!(db.idempotency_records().await.is_empty());
        assert!(service.idempotency_record("k-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_scenario() {
        let (service, _db, directory) = setup();
        let a = directory.create("alice");

        service.deposit("key1", a, 5_000, "pay").await.unwrap();
        let history = service.history(a).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entry_type, EntryType::Deposit);
        assert_eq!(history[0].amount.minor_units(), 5_000);

        service.withdraw("", a, 2_000, "rent").await.unwrap();
        let history = service.history(a).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].entry_type, EntryType::Withdraw, "most recent first");
        assert_eq!(history[0].note, "rent");
        assert_eq!(history[1].entry_type, EntryType::Deposit);
        assert_eq!(service.balance(a).await.unwrap(), 3_000);
    }

    #[tokio::test]
    async fn balance_always_matches_the_signed_entries() {
        let (service, db, directory) = setup();
        let a = directory.create("a");
        let b = directory.create("b");

        service.deposit("", a, 9_000, "seed").await.unwrap();
        service.withdraw("", a, 1_500, "fee").await.unwrap();
        service.transfer(a, b, 2_000, "p").await.unwrap();
        service.transfer(b, a, 500, "q").await.unwrap();
        let _ = service.withdraw("", b, 10_000, "nope").await;
        service.deposit("", b, 250, "tip").await.unwrap();

        for account in [a, b] {
            assert_eq!(
                service.balance(account).await.unwrap(),
                stored_balance(&db, account).await
            );
        }
        assert_eq!(service.balance(a).await.unwrap(), 6_000);
        assert_eq!(service.balance(b).await.unwrap(), 1_750);
    }
}
