use super::account::{Account, AccountId, Balance, NewAccount};
use super::entry::{Entry, NewEntry};
use super::transfer::{NewTransfer, Transfer};
use super::user::{NewUser, User};
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Limit/offset window for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

/// Row-level persistence for the ledger tables.
///
/// Each method is its own write; nothing here composes writes across rows.
/// Multi-row work goes through [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn get_user(&self, username: &str) -> Result<User>;

    async fn create_account(&self, account: NewAccount) -> Result<Account>;
    async fn get_account(&self, id: AccountId) -> Result<Account>;
    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;
    async fn update_account_balance(&self, id: AccountId, balance: Balance) -> Result<Account>;
    async fn delete_account(&self, id: AccountId) -> Result<()>;

    async fn create_entry(&self, entry: NewEntry) -> Result<Entry>;
    async fn get_entry(&self, id: i64) -> Result<Entry>;
    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;

    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer>;
    async fn get_transfer(&self, id: i64) -> Result<Transfer>;
    /// Transfers leaving `from` or arriving at `to`, oldest first.
    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> Result<Vec<Transfer>>;

    /// Opens an atomic unit of work.
    async fn begin<'a>(&'a self) -> Result<UnitOfWorkBox<'a>>;
}

/// Handle to one open transaction.
///
/// Reads through [`UnitOfWork::get_account_for_update`] claim the row for the
/// rest of the unit of work. Nothing written through the handle is visible to
/// other callers before [`UnitOfWork::commit`]; dropping the handle without
/// committing discards every write.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account>;
    async fn update_account_balance(&mut self, id: AccountId, balance: Balance) -> Result<Account>;
    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer>;
    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry>;
    async fn commit(self: Box<Self>) -> Result<()>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;
pub type UnitOfWorkBox<'a> = Box<dyn UnitOfWork + 'a>;
pub type LedgerStoreFactory = Box<dyn Fn() -> LedgerStoreBox + Send + Sync>;

/// Runs `work` inside one unit of work.
///
/// Commits when `work` succeeds. On error, or if the returned future is
/// dropped before completion, the handle is dropped and nothing is applied.
pub async fn in_transaction<T, F>(store: &dyn LedgerStore, work: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> BoxFuture<'t, Result<T>>,
{
    let mut uow = store.begin().await?;
    let value = work(uow.as_mut()).await?;
    uow.commit().await?;
    Ok(value)
}
