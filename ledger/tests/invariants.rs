//! Ledger invariants under arbitrary and concurrent workloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use bakripay_common::monetary::from_minor_units;
use bakripay_common::{AccountId, IdempotencyKey, LedgerError, TransactionId, UserId};
use bakripay_ledger::{InMemoryStore, LedgerConfig, LedgerEngine, Transaction, TransactionType};

const ACCOUNTS: usize = 4;

fn create_engine() -> LedgerEngine {
    let config = LedgerConfig {
        lock_timeout: Duration::from_secs(5),
        ..LedgerConfig::default()
    };
    assert_ok!(LedgerEngine::new(Arc::new(InMemoryStore::new()), config))
}

async fn open_accounts(engine: &LedgerEngine, count: usize) -> Vec<AccountId> {
    let directory = engine.directory();
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let account = assert_ok!(directory.open_account(UserId::new(format!("user-{i}"))).await);
        ids.push(account.id);
    }
    ids
}

async fn balance(engine: &LedgerEngine, id: &AccountId) -> Decimal {
    assert_ok!(engine.balance(id).await).balance
}

#[derive(Debug, Clone)]
enum Op {
    Deposit(usize, i64),
    Withdraw(usize, i64),
    Transfer(usize, usize, i64),
    Reverse(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..ACCOUNTS, 1i64..50_000).prop_map(|(a, c)| Op::Deposit(a, c)),
        (0..ACCOUNTS, 1i64..50_000).prop_map(|(a, c)| Op::Withdraw(a, c)),
        (0..ACCOUNTS, 0..ACCOUNTS, 1i64..50_000).prop_map(|(a, b, c)| Op::Transfer(a, b, c)),
        (0usize..64).prop_map(Op::Reverse),
    ]
}

/// Expected balances, updated from the transactions the engine returns.
#[derive(Default)]
struct Model {
    balances: HashMap<AccountId, Decimal>,
    issued: Decimal,
    reversible: Vec<TransactionId>,
}

impl Model {
    fn apply(&mut self, tx: &Transaction) {
        if let Some(source) = &tx.source {
            *self.balances.entry(source.clone()).or_default() -= tx.amount;
        }
        if let Some(destination) = &tx.destination {
            *self.balances.entry(destination.clone()).or_default() += tx.amount;
        }
        match tx.kind {
            TransactionType::Deposit => self.issued += tx.amount,
            TransactionType::Withdrawal => self.issued -= tx.amount,
            TransactionType::Transfer => {}
        }
        if tx.reverses.is_none() {
            self.reversible.push(tx.id);
        }
    }
}

async fn run_ops(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let engine = create_engine();
    let ids = open_accounts(&engine, ACCOUNTS).await;
    let mut model = Model::default();

    for op in ops {
        let result = match op {
            Op::Deposit(a, cents) => {
                engine
                    .deposit(ids[a].clone(), from_minor_units(cents), None, None)
                    .await
            }
            Op::Withdraw(a, cents) => {
                engine
                    .withdraw(ids[a].clone(), from_minor_units(cents), None, None)
                    .await
            }
            Op::Transfer(a, b, cents) => {
                engine
                    .transfer(ids[a].clone(), ids[b].clone(), from_minor_units(cents), None, None)
                    .await
            }
            Op::Reverse(n) => {
                if model.reversible.is_empty() {
                    continue;
                }
                let target = model.reversible[n % model.reversible.len()];
                engine.reverse(target).await
            }
        };

        match result {
            Ok(tx) => model.apply(&tx),
            Err(
                LedgerError::InsufficientFunds { .. }
                | LedgerError::SameAccount(_)
                | LedgerError::AlreadyReversed(_),
            ) => {}
            Err(other) => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
        }

        for id in &ids {
            prop_assert!(balance(&engine, id).await >= Decimal::ZERO);
        }
    }

    let mut total = Decimal::ZERO;
    for id in &ids {
        let actual = balance(&engine, id).await;
        prop_assert_eq!(actual, model.balances.get(id).copied().unwrap_or_default());
        total += actual;
    }
    prop_assert_eq!(total, model.issued);

    let report = assert_ok!(engine.verify_integrity().await);
    prop_assert!(report.is_consistent(), "{:?}", report);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balances_are_conserved_and_never_negative(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_ops(ops))?;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crossing_transfers_do_not_deadlock() {
    let engine = Arc::new(create_engine());
    let ids = open_accounts(&engine, 2).await;
    let (a, b) = (ids[0].clone(), ids[1].clone());
    assert_ok!(engine.deposit(a.clone(), dec!(1000), None, None).await);
    assert_ok!(engine.deposit(b.clone(), dec!(1000), None, None).await);

    let mut tasks = Vec::new();
    for i in 0..200 {
        let engine = engine.clone();
        let (from, to) = if i % 2 == 0 {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        tasks.push(tokio::spawn(async move {
            engine.transfer(from, to, dec!(1), None, None).await
        }));
    }

    let results = tokio::time::timeout(Duration::from_secs(30), join_all(tasks))
        .await
        .expect("transfers deadlocked");
    for result in results {
        assert_ok!(result.unwrap());
    }

    assert_eq!(balance(&engine, &a).await, dec!(1000));
    assert_eq!(balance(&engine, &b).await, dec!(1000));
    assert!(assert_ok!(engine.verify_integrity().await).is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_apply_once() {
    let engine = Arc::new(create_engine());
    let ids = open_accounts(&engine, 1).await;
    let key = IdempotencyKey::new("dup-deposit");

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            let account = ids[0].clone();
            let key = key.clone();
            tokio::spawn(async move { engine.deposit(account, dec!(50), None, Some(key)).await })
        })
        .collect();

    let mut seen = Vec::new();
    for result in join_all(tasks).await {
        seen.push(assert_ok!(result.unwrap()).id);
    }
    seen.dedup();
    assert_eq!(seen.len(), 1);
    assert_eq!(balance(&engine, &ids[0]).await, dec!(50));
    assert_eq!(engine.metrics().snapshot().idempotent_replays, 15);
}

#[tokio::test]
async fn same_key_twice_returns_same_transaction() {
    let engine = create_engine();
    let ids = open_accounts(&engine, 2).await;
    assert_ok!(engine.deposit(ids[0].clone(), dec!(80), None, None).await);
    let key = IdempotencyKey::new("tr-1");

    let first = assert_ok!(
        engine
            .transfer(ids[0].clone(), ids[1].clone(), dec!(30), None, Some(key.clone()))
            .await
    );
    let second = assert_ok!(
        engine
            .transfer(ids[0].clone(), ids[1].clone(), dec!(30), None, Some(key))
            .await
    );

    assert_eq!(first.id, second.id);
    assert_eq!(balance(&engine, &ids[0]).await, dec!(50));
    assert_eq!(balance(&engine, &ids[1]).await, dec!(30));
}

#[tokio::test]
async fn withdrawing_one_cent_too_much_changes_nothing() {
    let engine = create_engine();
    let ids = open_accounts(&engine, 1).await;
    assert_ok!(engine.deposit(ids[0].clone(), dec!(42.10), None, None).await);

    let err = assert_err!(engine.withdraw(ids[0].clone(), dec!(42.11), None, None).await);
    assert_eq!(
        err,
        LedgerError::InsufficientFunds {
            account_id: ids[0].clone(),
            required: dec!(42.11),
            available: dec!(42.10),
        }
    );
    assert_eq!(balance(&engine, &ids[0]).await, dec!(42.10));
}

#[tokio::test]
async fn reversing_a_deposit_restores_the_balance_once() {
    let engine = create_engine();
    let ids = open_accounts(&engine, 1).await;
    assert_ok!(engine.deposit(ids[0].clone(), dec!(25), None, None).await);
    let deposit = assert_ok!(engine.deposit(ids[0].clone(), dec!(100), None, None).await);
    assert_eq!(balance(&engine, &ids[0]).await, dec!(125));

    let compensation = assert_ok!(engine.reverse(deposit.id).await);
    assert_eq!(compensation.kind, TransactionType::Withdrawal);
    assert_eq!(
        compensation.reference,
        Some(format!("reversal of {}", deposit.id))
    );
    assert_eq!(balance(&engine, &ids[0]).await, dec!(25));

    let err = assert_err!(engine.reverse(deposit.id).await);
    assert_eq!(err, LedgerError::AlreadyReversed(deposit.id));
    assert_eq!(balance(&engine, &ids[0]).await, dec!(25));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reversals_apply_once() {
    let engine = Arc::new(create_engine());
    let ids = open_accounts(&engine, 2).await;
    assert_ok!(engine.deposit(ids[0].clone(), dec!(100), None, None).await);
    let transfer = assert_ok!(
        engine
            .transfer(ids[0].clone(), ids[1].clone(), dec!(40), None, None)
            .await
    );

    let handles = (0..8).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.reverse(transfer.id).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let compensations: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(compensations.len(), 1);
    assert_eq!(compensations[0].reverses, Some(transfer.id));
    for result in &results {
        if let Err(err) = result {
            assert_eq!(*err, LedgerError::AlreadyReversed(transfer.id));
        }
    }

    assert_eq!(balance(&engine, &ids[0]).await, dec!(100));
    assert_eq!(balance(&engine, &ids[1]).await, dec!(0));
    let original = assert_ok!(engine.get_transaction(transfer.id).await);
    assert_eq!(original.reversed_by, Some(compensations[0].id));
    assert_eq!(engine.metrics().snapshot().reversals_total, 1);
}

#[tokio::test]
async fn history_is_newest_first_and_clamped() {
    let config = LedgerConfig {
        history_default_limit: 3,
        history_max_limit: 5,
        ..LedgerConfig::default()
    };
    let engine = assert_ok!(LedgerEngine::new(Arc::new(InMemoryStore::new()), config));
    let ids = open_accounts(&engine, 1).await;

    let mut created = Vec::new();
    for cents in 1..=8 {
        let tx = assert_ok!(
            engine
                .deposit(ids[0].clone(), from_minor_units(cents), None, None)
                .await
        );
        created.push(tx.id);
    }

    let page = assert_ok!(engine.history(&ids[0], None, 0).await);
    assert_eq!(
        page.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![created[7], created[6], created[5]]
    );
    assert_eq!(assert_ok!(engine.history(&ids[0], Some(50), 0).await).len(), 5);
    assert_eq!(assert_ok!(engine.history(&ids[0], Some(5), 6).await).len(), 2);

    let missing = AccountId::new("nobody");
    assert_eq!(
        assert_err!(engine.history(&missing, None, 0).await),
        LedgerError::AccountNotFound(missing)
    );
}
