use crate::domain::account::{AccountId, Amount};
use crate::domain::entry::NewEntry;
use crate::domain::lock_order::LockOrder;
use crate::domain::ports::{LedgerStore, LedgerStoreBox, UnitOfWork, in_transaction};
use crate::domain::transfer::{NewTransfer, TransferResult};
use crate::error::{LedgerError, Result};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How hard the coordinator tries before giving up on a conflicting transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` sleeps `backoff * n` before retrying.
    pub backoff: Duration,
    /// Upper bound on one attempt. An attempt that runs over is rolled back
    /// and counted as a conflict.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
            attempt_timeout: None,
        }
    }
}

/// Moves money between two accounts as one atomic unit of work.
///
/// The coordinator is stateless apart from the store it drives; all
/// serialization between concurrent transfers is left to the store's row
/// claims, taken in [`LockOrder`].
pub struct TransferCoordinator {
    store: LedgerStoreBox,
    policy: RetryPolicy,
}

impl TransferCoordinator {
    pub fn new(store: LedgerStoreBox) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    pub fn with_policy(store: LedgerStoreBox, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    /// Transfers `amount` minor units from `from` to `to`.
    ///
    /// Rejects non-positive amounts and self-transfers before touching the
    /// store. Conflicts are retried with linear backoff; any other failure is
    /// returned as is. Every failure leaves the store unchanged.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn execute_transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<TransferResult> {
        let amount = Amount::new(amount)?;
        if from == to {
            return Err(LedgerError::ValidationError(format!(
                "Cannot transfer from account {} to itself",
                from
            )));
        }

        let mut attempt = 1;
        loop {
            match self.attempt(from, to, amount).await {
                Ok(result) => {
                    info!(
                        transfer_id = result.transfer.id,
                        attempt, "Transfer committed"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(attempt, error = %e, "Transfer aborted on conflict, retrying");
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Transfer aborted, retries exhausted");
                    return Err(LedgerError::TransactionConflict(format!(
                        "gave up after {} attempts: {}",
                        attempt, e
                    )));
                }
                Err(e) => {
                    debug!(error = %e, "Transfer aborted");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, from: AccountId, to: AccountId, amount: Amount) -> Result<TransferResult> {
        let unit_of_work = in_transaction(self.store(), move |uow| {
            Box::pin(async move { apply_transfer(uow, from, to, amount).await })
        });

        match self.policy.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, unit_of_work)
                .await
                .map_err(|_| {
                    LedgerError::TransactionConflict(format!(
                        "attempt exceeded {:?}",
                        limit
                    ))
                })?,
            None => unit_of_work.await,
        }
    }
}

/// The body of one transfer attempt.
///
/// Both rows are claimed lowest id first and their balances are written in
/// the same order, so overlapping transfers never wait on each other in a
/// cycle.
async fn apply_transfer(
    uow: &mut dyn UnitOfWork,
    from: AccountId,
    to: AccountId,
    amount: Amount,
) -> Result<TransferResult> {
    let [first, second] = LockOrder::new(from, to).as_array();
    let first = uow.get_account_for_update(first).await?;
    let second = uow.get_account_for_update(second).await?;

    let transfer = uow
        .create_transfer(NewTransfer {
            from_account_id: from,
            to_account_id: to,
            amount,
        })
        .await?;
    let from_entry = uow.create_entry(NewEntry::new(from, amount.debit())).await?;
    let to_entry = uow.create_entry(NewEntry::new(to, amount.credit())).await?;

    let delta = |id: AccountId| if id == from { amount.debit() } else { amount.credit() };
    let first = uow
        .update_account_balance(first.id, first.balance.apply(delta(first.id))?)
        .await?;
    let second = uow
        .update_account_balance(second.id, second.balance.apply(delta(second.id))?)
        .await?;

    let (from_account, to_account) = if first.id == from {
        (first, second)
    } else {
        (second, first)
    };

    Ok(TransferResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}
