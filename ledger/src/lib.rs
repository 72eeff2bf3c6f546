//! BakriPay Ledger Engine
//!
//! Atomic deposits, withdrawals, transfers and reversals over accounts that
//! never go negative, with an auditable transaction record for every
//! balance change.

pub mod account;
pub mod balance;
pub mod config;
pub mod directory;
pub mod engine;
pub mod hooks;
pub mod integrity;
pub mod journal;
pub mod lock_manager;
pub mod metrics;
pub mod store;
pub mod transaction;

pub use account::Account;
pub use balance::BalanceSnapshot;
pub use config::LedgerConfig;
pub use directory::AccountDirectory;
pub use engine::LedgerEngine;
pub use hooks::{ChannelHook, HookError, LargeAmountFlagHook, LoggingHook, PostCommitHook};
pub use integrity::IntegrityReport;
pub use journal::{EntryDirection, JournalEntry};
pub use lock_manager::{LockManager, LockSet};
pub use metrics::{ActiveOperation, Metrics, MetricsSnapshot, SharedMetrics};
pub use store::{CommitBatch, InMemoryStore, LedgerStore};
pub use transaction::{Transaction, TransactionType};
