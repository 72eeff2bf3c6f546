//! Ledger integrity verification.
//!
//! Replays the journal entries of every transaction that moved money and
//! compares the result with stored balances. The ledger is consistent when
//! every account matches its replay, no balance is negative, every
//! transaction's entries add up to its own effect, and the sum of all
//! balances equals net issuance (deposits minus withdrawals).

use std::collections::HashMap;

use bakripay_common::{AccountId, TransactionId};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::account::Account;
use crate::journal::net_outflow;
use crate::transaction::{Transaction, TransactionType};

/// Stored balance that disagrees with the journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceMismatch {
    pub account_id: AccountId,
    pub stored: Decimal,
    pub replayed: Decimal,
}

/// Result of an integrity check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub accounts_checked: usize,
    pub transactions_checked: usize,
    /// Sum of stored balances.
    pub total_balance: Decimal,
    /// Deposits minus withdrawals, compensations included.
    pub net_issuance: Decimal,
    pub negative_balances: Vec<AccountId>,
    pub mismatched_accounts: Vec<BalanceMismatch>,
    /// Transactions whose entries do not describe their own kind and amount.
    pub unbalanced_transactions: Vec<TransactionId>,
}

impl IntegrityReport {
    /// Whether every check passed.
    pub fn is_consistent(&self) -> bool {
        self.total_balance == self.net_issuance
            && self.negative_balances.is_empty()
            && self.mismatched_accounts.is_empty()
            && self.unbalanced_transactions.is_empty()
    }
}

/// Check a full set of accounts against a full set of transactions.
pub fn verify(accounts: &[Account], transactions: &[Transaction]) -> IntegrityReport {
    let mut replayed: HashMap<&AccountId, Decimal> = HashMap::new();
    let mut net_issuance = Decimal::ZERO;
    let mut unbalanced_transactions = Vec::new();

    for tx in transactions {
        if !entries_consistent(tx) {
            unbalanced_transactions.push(tx.id);
        }
        if !tx.moved_funds() {
            continue;
        }
        net_issuance += tx.net_issuance();
        for entry in &tx.entries {
            *replayed.entry(&entry.account_id).or_default() += entry.signed_amount();
        }
    }

    let mut total_balance = Decimal::ZERO;
    let mut negative_balances = Vec::new();
    let mut mismatched_accounts = Vec::new();

    for account in accounts {
        total_balance += account.balance;
        if account.balance < Decimal::ZERO {
            negative_balances.push(account.id.clone());
        }
        let expected = replayed.remove(&account.id).unwrap_or_default();
        if expected != account.balance {
            mismatched_accounts.push(BalanceMismatch {
                account_id: account.id.clone(),
                stored: account.balance,
                replayed: expected,
            });
        }
    }

    // Entries against accounts that no longer exist.
    for (account_id, amount) in replayed {
        if !amount.is_zero() {
            mismatched_accounts.push(BalanceMismatch {
                account_id: account_id.clone(),
                stored: Decimal::ZERO,
                replayed: amount,
            });
        }
    }

    IntegrityReport {
        accounts_checked: accounts.len(),
        transactions_checked: transactions.len(),
        total_balance,
        net_issuance,
        negative_balances,
        mismatched_accounts,
        unbalanced_transactions,
    }
}

fn entries_consistent(tx: &Transaction) -> bool {
    if !tx.moved_funds() {
        return tx.entries.is_empty();
    }
    let expected_len = match tx.kind {
        TransactionType::Deposit | TransactionType::Withdrawal => 1,
        TransactionType::Transfer => 2,
    };
    tx.entries.len() == expected_len
        && tx.entries.iter().all(|e| e.amount == tx.amount)
        && net_outflow(&tx.entries) == -tx.net_issuance()
}
