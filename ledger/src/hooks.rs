//! Post-commit hooks.
//!
//! Hooks run on their own tasks after an operation has committed and
//! released its locks. They see the committed transaction but cannot change
//! the outcome of the operation that produced it.

use async_trait::async_trait;
use dashmap::DashSet;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use bakripay_common::monetary::format_amount;
use bakripay_common::{TransactionId, TransactionStatus};

use crate::transaction::Transaction;

/// Failure reported by a hook.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    /// Downstream consumer cannot keep up.
    #[error("Hook channel full, dropped transaction {0}")]
    ChannelFull(TransactionId),

    /// Downstream consumer is gone.
    #[error("Hook channel closed")]
    ChannelClosed,

    #[error("Hook failed: {0}")]
    Other(String),
}

/// Observer of committed transactions.
#[async_trait]
pub trait PostCommitHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once for every committed transaction, compensations included.
    async fn on_commit(&self, transaction: &Transaction) -> Result<(), HookError>;
}

/// Writes one notification line per committed transaction.
#[derive(Debug, Default)]
pub struct LoggingHook;

#[async_trait]
impl PostCommitHook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_commit(&self, transaction: &Transaction) -> Result<(), HookError> {
        info!(
            transaction_id = %transaction.id,
            kind = %transaction.kind,
            amount = %format_amount(transaction.amount),
            source = ?transaction.source,
            destination = ?transaction.destination,
            status = %transaction.status,
            "Transaction notification"
        );
        Ok(())
    }
}

/// Forwards committed transactions to a bounded channel.
///
/// Never waits for the receiver: when the channel is full the event is
/// dropped and reported as [`HookError::ChannelFull`].
pub struct ChannelHook {
    sender: mpsc::Sender<Transaction>,
}

impl ChannelHook {
    /// Create a hook and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Transaction>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl PostCommitHook for ChannelHook {
    fn name(&self) -> &str {
        "channel"
    }

    async fn on_commit(&self, transaction: &Transaction) -> Result<(), HookError> {
        self.sender
            .try_send(transaction.clone())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(tx) => HookError::ChannelFull(tx.id),
                mpsc::error::TrySendError::Closed(_) => HookError::ChannelClosed,
            })
    }
}

/// Flags completed transactions at or above an amount threshold for review.
pub struct LargeAmountFlagHook {
    threshold: Decimal,
    flagged: DashSet<TransactionId>,
}

impl LargeAmountFlagHook {
    pub fn new(threshold: Decimal) -> Self {
        Self {
            threshold,
            flagged: DashSet::new(),
        }
    }

    pub fn is_flagged(&self, id: &TransactionId) -> bool {
        self.flagged.contains(id)
    }

    /// Flagged transaction ids, in no particular order.
    pub fn flagged(&self) -> Vec<TransactionId> {
        self.flagged.iter().map(|id| *id).collect()
    }
}

#[async_trait]
impl PostCommitHook for LargeAmountFlagHook {
    fn name(&self) -> &str {
        "large-amount-flag"
    }

    async fn on_commit(&self, transaction: &Transaction) -> Result<(), HookError> {
        if transaction.status == TransactionStatus::Completed
            && transaction.amount >= self.threshold
        {
            warn!(
                transaction_id = %transaction.id,
                amount = %transaction.amount,
                threshold = %self.threshold,
                "Large transaction flagged for review"
            );
            self.flagged.insert(transaction.id);
        }
        Ok(())
    }
}
