use crate::domain::account::{Account, AccountId, Balance, NewAccount};
use crate::domain::entry::{Entry, NewEntry};
use crate::domain::ports::{LedgerStore, Page, UnitOfWork, UnitOfWorkBox};
use crate::domain::transfer::{NewTransfer, Transfer};
use crate::domain::user::{NewUser, User};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    account_seq: i64,
    entry_seq: i64,
    transfer_seq: i64,
}

impl Tables {
    fn next_account_id(&mut self) -> AccountId {
        self.account_seq += 1;
        AccountId(self.account_seq)
    }

    fn next_entry_id(&mut self) -> i64 {
        self.entry_seq += 1;
        self.entry_seq
    }

    fn next_transfer_id(&mut self) -> i64 {
        self.transfer_seq += 1;
        self.transfer_seq
    }

    fn require_account(&self, id: AccountId) -> Result<()> {
        if self.accounts.contains_key(&id) {
            Ok(())
        } else {
            Err(LedgerError::ForeignKeyViolation(format!(
                "account {} does not exist",
                id
            )))
        }
    }
}

/// A thread-safe in-memory ledger.
///
/// Behaves like a SQL database running `SELECT ... FOR UPDATE`: each account
/// row has its own lock, taken by a unit of work the first time it touches the
/// row and held until commit or rollback. Committed data lives behind a single
/// `RwLock`, and a commit applies all of its buffered writes under one write
/// guard, so readers never see half a transfer.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<Mutex<HashMap<AccountId, Arc<Mutex<()>>>>>,
    injected_conflicts: Arc<AtomicUsize>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a transaction conflict.
    ///
    /// Lets tests drive the retry path without depending on scheduling.
    pub fn inject_commit_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    async fn lock_row(&self, id: AccountId) -> OwnedMutexGuard<()> {
        let row = {
            let mut locks = self.row_locks.lock().await;
            locks.entry(id).or_default().clone()
        };
        row.lock_owned().await
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.username) {
            return Err(LedgerError::UniqueViolation(format!(
                "username {} already taken",
                user.username
            )));
        }
        let now = Utc::now();
        let user = User {
            username: user.username,
            hashed_password: user.hashed_password,
            full_name: user.full_name,
            email: user.email,
            password_changed_at: now,
            created_at: now,
        };
        tables.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("user", username))
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&account.owner) {
            return Err(LedgerError::ForeignKeyViolation(format!(
                "owner {} does not exist",
                account.owner
            )));
        }
        if tables
            .accounts
            .values()
            .any(|a| a.owner == account.owner && a.currency == account.currency)
        {
            return Err(LedgerError::UniqueViolation(format!(
                "{} already has a {} account",
                account.owner, account.currency
            )));
        }
        let account = Account {
            id: tables.next_account_id(),
            owner: account.owner,
            balance: account.balance,
            currency: account.currency,
            created_at: Utc::now(),
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        let tables = self.tables.read().await;
        tables
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().cloned().collect())
    }

    async fn update_account_balance(&self, id: AccountId, balance: Balance) -> Result<Account> {
        let _row = self.lock_row(id).await;
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("account", id))?;
        account.balance = balance;
        Ok(account.clone())
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let _row = self.lock_row(id).await;
        self.tables.write().await.accounts.remove(&id);
        // Ids are never reused, so a waiter still holding the old lock finds
        // the row gone once it gets in.
        self.row_locks.lock().await.remove(&id);
        Ok(())
    }

    async fn create_entry(&self, entry: NewEntry) -> Result<Entry> {
        let mut tables = self.tables.write().await;
        tables.require_account(entry.account_id)?;
        let entry = Entry {
            id: tables.next_entry_id(),
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: Utc::now(),
        };
        tables.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: i64) -> Result<Entry> {
        let tables = self.tables.read().await;
        tables
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer> {
        let mut tables = self.tables.write().await;
        tables.require_account(transfer.from_account_id)?;
        tables.require_account(transfer.to_account_id)?;
        let transfer = Transfer {
            id: tables.next_transfer_id(),
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: Utc::now(),
        };
        tables.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer> {
        let tables = self.tables.read().await;
        tables
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("transfer", id))
    }

    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transfers
            .values()
            .filter(|t| t.from_account_id == from || t.to_account_id == to)
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn begin<'a>(&'a self) -> Result<UnitOfWorkBox<'a>> {
        Ok(Box::new(InMemoryUnitOfWork {
            store: self.clone(),
            rows: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        }))
    }
}

/// A row claimed by a unit of work: the lock guard plus the working copy.
struct ClaimedRow {
    _guard: OwnedMutexGuard<()>,
    account: Account,
    dirty: bool,
}

/// Open transaction against an [`InMemoryLedgerStore`].
///
/// Dropping it releases the claimed rows and forgets the buffered writes.
pub struct InMemoryUnitOfWork {
    store: InMemoryLedgerStore,
    rows: BTreeMap<AccountId, ClaimedRow>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl InMemoryUnitOfWork {
    async fn claim(&mut self, id: AccountId) -> Result<&mut ClaimedRow> {
        if !self.rows.contains_key(&id) {
            let guard = self.store.lock_row(id).await;
            let account = self
                .store
                .tables
                .read()
                .await
                .accounts
                .get(&id)
                .cloned()
                .ok_or_else(|| LedgerError::not_found("account", id))?;
            self.rows.insert(
                id,
                ClaimedRow {
                    _guard: guard,
                    account,
                    dirty: false,
                },
            );
        }
        self.rows
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    /// Checks that an account is either claimed here or committed.
    async fn require_account(&self, id: AccountId) -> Result<()> {
        if self.rows.contains_key(&id) {
            return Ok(());
        }
        self.store.tables.read().await.require_account(id)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        Ok(self.claim(id).await?.account.clone())
    }

    async fn update_account_balance(&mut self, id: AccountId, balance: Balance) -> Result<Account> {
        let row = self.claim(id).await?;
        row.account.balance = balance;
        row.dirty = true;
        Ok(row.account.clone())
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        self.require_account(transfer.from_account_id).await?;
        self.require_account(transfer.to_account_id).await?;
        let id = self.store.tables.write().await.next_transfer_id();
        let transfer = Transfer {
            id,
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry> {
        self.require_account(entry.account_id).await?;
        let id = self.store.tables.write().await.next_entry_id();
        let entry = Entry {
            id,
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.store.take_injected_conflict() {
            return Err(LedgerError::TransactionConflict(
                "injected commit conflict".to_string(),
            ));
        }

        let InMemoryUnitOfWork {
            store,
            rows,
            entries,
            transfers,
        } = *self;

        let mut tables = store.tables.write().await;
        for row in rows.values().filter(|row| row.dirty) {
            tables.accounts.insert(row.account.id, row.account.clone());
        }
        for transfer in transfers {
            tables.transfers.insert(transfer.id, transfer);
        }
        for entry in entries {
            tables.entries.insert(entry.id, entry);
        }
        drop(tables);
        // Row guards are released only after the writes are visible.
        drop(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{Amount, Currency};
    use std::time::Duration;

    async fn seeded() -> (InMemoryLedgerStore, Account, Account) {
        let store = InMemoryLedgerStore::new();
        for name in ["alice", "bob"] {
            store
                .create_user(NewUser {
                    username: name.to_string(),
                    hashed_password: "secret".to_string(),
                    full_name: name.to_string(),
                    email: format!("{}@example.com", name),
                })
                .await
                .unwrap();
        }
        let a = store
            .create_account(NewAccount::new("alice", 1000, Currency::Usd))
            .await
            .unwrap();
        let b = store
            .create_account(NewAccount::new("bob", 500, Currency::Usd))
            .await
            .unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_account_crud() {
        let (store, a, b) = seeded().await;
        assert_eq!(a.id, AccountId(1));
        assert_eq!(b.id, AccountId(2));

        let fetched = store.get_account(a.id).await.unwrap();
        assert_eq!(fetched, a);

        let updated = store
            .update_account_balance(a.id, Balance::new(42))
            .await
            .unwrap();
        assert_eq!(updated.balance, Balance::new(42));

        store.delete_account(a.id).await.unwrap();
        assert!(matches!(
            store.get_account(a.id).await,
            Err(LedgerError::NotFound { .. })
        ));
        // Deleting an absent row is not an error.
        store.delete_account(a.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_releases_row_lock() {
        let (store, a, b) = seeded().await;
        store.update_account_balance(a.id, Balance::new(7)).await.unwrap();
        store.update_account_balance(b.id, Balance::new(8)).await.unwrap();
        assert_eq!(store.row_locks.lock().await.len(), 2);

        store.delete_account(a.id).await.unwrap();

        let locks = store.row_locks.lock().await;
        assert!(!locks.contains_key(&a.id));
        assert!(locks.contains_key(&b.id));
    }

    #[tokio::test]
    async fn test_account_constraints() {
        let (store, _, _) = seeded().await;
        assert!(matches!(
            store
                .create_account(NewAccount::new("alice", 0, Currency::Usd))
                .await,
            Err(LedgerError::UniqueViolation(_))
        ));
        assert!(matches!(
            store
                .create_account(NewAccount::new("mallory", 0, Currency::Usd))
                .await,
            Err(LedgerError::ForeignKeyViolation(_))
        ));
        assert!(
            store
                .create_account(NewAccount::new("alice", 0, Currency::Cad))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_list_accounts_pages() {
        let (store, a, _) = seeded().await;
        let euro = store
            .create_account(NewAccount::new("alice", 0, Currency::Euro))
            .await
            .unwrap();

        let first = store.list_accounts("alice", Page::new(1, 0)).await.unwrap();
        assert_eq!(first, vec![a]);
        let second = store.list_accounts("alice", Page::new(5, 1)).await.unwrap();
        assert_eq!(second, vec![euro]);
        assert!(store.list_accounts("nobody", Page::new(5, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_and_transfers() {
        let (store, a, b) = seeded().await;
        let entry = store.create_entry(NewEntry::new(a.id, -10)).await.unwrap();
        assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
        assert!(matches!(
            store.create_entry(NewEntry::new(AccountId(99), 1)).await,
            Err(LedgerError::ForeignKeyViolation(_))
        ));

        for _ in 0..3 {
            store
                .create_transfer(NewTransfer {
                    from_account_id: a.id,
                    to_account_id: b.id,
                    amount: Amount::new(10).unwrap(),
                })
                .await
                .unwrap();
        }
        let listed = store
            .list_transfers(a.id, b.id, Page::new(2, 1))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, 2);
        assert!(matches!(
            store.get_transfer(99).await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unit_of_work_commit_applies_all_writes() {
        let (store, a, b) = seeded().await;
        let mut uow = store.begin().await.unwrap();
        uow.get_account_for_update(a.id).await.unwrap();
        uow.update_account_balance(a.id, Balance::new(900))
            .await
            .unwrap();
        uow.create_entry(NewEntry::new(a.id, -100)).await.unwrap();
        uow.create_entry(NewEntry::new(b.id, 100)).await.unwrap();

        // Nothing is visible before commit.
        assert_eq!(store.get_account(a.id).await.unwrap().balance, Balance::new(1000));
        assert!(store.list_entries(a.id, Page::new(10, 0)).await.unwrap().is_empty());

        uow.commit().await.unwrap();
        assert_eq!(store.get_account(a.id).await.unwrap().balance, Balance::new(900));
        assert_eq!(store.list_entries(b.id, Page::new(10, 0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unit_of_work_drop_rolls_back() {
        let (store, a, _) = seeded().await;
        {
            let mut uow = store.begin().await.unwrap();
            uow.update_account_balance(a.id, Balance::new(1)).await.unwrap();
            uow.create_entry(NewEntry::new(a.id, -999)).await.unwrap();
        }
        assert_eq!(store.get_account(a.id).await.unwrap().balance, Balance::new(1000));
        assert!(store.list_entries(a.id, Page::new(10, 0)).await.unwrap().is_empty());
        // The row lock went away with the handle.
        store
            .update_account_balance(a.id, Balance::new(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_claimed_row_blocks_other_writers() {
        let (store, a, _) = seeded().await;
        let mut uow = store.begin().await.unwrap();
        uow.get_account_for_update(a.id).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            store.update_account_balance(a.id, Balance::new(0)),
        )
        .await;
        assert!(blocked.is_err(), "row should still be locked");

        uow.commit().await.unwrap();
        store
            .update_account_balance(a.id, Balance::new(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_account_in_unit_of_work() {
        let (store, _, _) = seeded().await;
        let mut uow = store.begin().await.unwrap();
        assert!(matches!(
            uow.get_account_for_update(AccountId(77)).await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let (store, a, _) = seeded().await;
        store.inject_commit_conflicts(1);

        let mut uow = store.begin().await.unwrap();
        uow.update_account_balance(a.id, Balance::new(1)).await.unwrap();
        assert!(matches!(
            uow.commit().await,
            Err(LedgerError::TransactionConflict(_))
        ));
        assert_eq!(store.get_account(a.id).await.unwrap().balance, Balance::new(1000));

        let mut uow = store.begin().await.unwrap();
        uow.update_account_balance(a.id, Balance::new(1)).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.get_account(a.id).await.unwrap().balance, Balance::new(1));
    }
}
