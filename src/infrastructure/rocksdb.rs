use crate::domain::account::{Account, AccountId, Balance, NewAccount};
use crate::domain::entry::{Entry, NewEntry};
use crate::domain::ports::{LedgerStore, Page, UnitOfWork, UnitOfWorkBox};
use crate::domain::transfer::{NewTransfer, Transfer};
use crate::domain::user::{NewUser, User};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, IteratorMode, OptimisticTransactionDB, Options,
    Transaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Column Family for user rows, keyed by username.
pub const CF_USERS: &str = "users";
/// Column Family for account rows.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for ledger entries.
pub const CF_ENTRIES: &str = "entries";
/// Column Family for transfers.
pub const CF_TRANSFERS: &str = "transfers";
/// Unique index over `(owner, currency)`, pointing at the account id.
pub const CF_ACCOUNT_OWNER_CURRENCY: &str = "account_owner_currency";

type Db = OptimisticTransactionDB;

fn id_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

fn owner_currency_key(account: &NewAccount) -> Vec<u8> {
    format!("{}\0{}", account.owner, account.currency).into_bytes()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// A persistent ledger backed by RocksDB.
///
/// Every table lives in its own Column Family with JSON values under
/// big-endian ids, so iteration order is id order. Multi-row work runs in
/// optimistic transactions: rows read with `get_for_update` are checked at
/// commit time, and a commit that lost the race fails with `Busy`, which
/// surfaces as [`LedgerError::TransactionConflict`].
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<Db>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<Db>,
    sequences: Arc<Sequences>,
}

/// Id allocators, seeded from the highest key on disk.
struct Sequences {
    account: AtomicI64,
    entry: AtomicI64,
    transfer: AtomicI64,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every ledger column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [
            CF_USERS,
            CF_ACCOUNTS,
            CF_ENTRIES,
            CF_TRANSFERS,
            CF_ACCOUNT_OWNER_CURRENCY,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db: Db = OptimisticTransactionDB::open_cf_descriptors(&opts, path, cfs)?;
        let sequences = Sequences {
            account: AtomicI64::new(last_id(&db, CF_ACCOUNTS)?),
            entry: AtomicI64::new(last_id(&db, CF_ENTRIES)?),
            transfer: AtomicI64::new(last_id(&db, CF_TRANSFERS)?),
        };

        Ok(Self {
            db: Arc::new(db),
            sequences: Arc::new(sequences),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        cf_handle(&self.db, name)
    }

    fn get_row<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn require_account(&self, id: AccountId) -> Result<()> {
        if self.db.get_cf(self.cf(CF_ACCOUNTS)?, id_key(id.0))?.is_some() {
            Ok(())
        } else {
            Err(LedgerError::ForeignKeyViolation(format!(
                "account {} does not exist",
                id
            )))
        }
    }

    fn next_account_id(&self) -> AccountId {
        AccountId(self.sequences.account.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_entry_id(&self) -> i64 {
        self.sequences.entry.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_transfer_id(&self) -> i64 {
        self.sequences.transfer.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn cf_handle<'a>(db: &'a Db, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name).ok_or_else(|| {
        LedgerError::StorageError(Box::new(std::io::Error::other(format!(
            "{} column family not found",
            name
        ))))
    })
}

fn last_id(db: &Db, cf: &str) -> Result<i64> {
    let mut iter = db.iterator_cf(cf_handle(db, cf)?, IteratorMode::End);
    match iter.next() {
        Some(item) => {
            let (key, _value) = item?;
            let bytes: [u8; 8] = key[..].try_into().map_err(|_| {
                LedgerError::StorageError(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Malformed key in {}", cf),
                )))
            })?;
            Ok(i64::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let cf = self.cf(CF_USERS)?;
        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(cf, user.username.as_bytes(), true)?
            .is_some()
        {
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
        txn.put_cf(cf, user.username.as_bytes(), encode(&user)?)?;
        txn.commit()?;
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<User> {
        self.get_row(CF_USERS, username.as_bytes())?
            .ok_or_else(|| LedgerError::not_found("user", username))
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let users = self.cf(CF_USERS)?;
        let index = self.cf(CF_ACCOUNT_OWNER_CURRENCY)?;
        let accounts = self.cf(CF_ACCOUNTS)?;

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(users, account.owner.as_bytes(), false)?
            .is_none()
        {
            return Err(LedgerError::ForeignKeyViolation(format!(
                "owner {} does not exist",
                account.owner
            )));
        }
        let index_key = owner_currency_key(&account);
        if txn.get_for_update_cf(index, &index_key, true)?.is_some() {
            return Err(LedgerError::UniqueViolation(format!(
                "{} already has a {} account",
                account.owner, account.currency
            )));
        }

        let account = Account {
            id: self.next_account_id(),
            owner: account.owner,
            balance: account.balance,
            currency: account.currency,
            created_at: Utc::now(),
        };
        txn.put_cf(index, &index_key, id_key(account.id.0))?;
        txn.put_cf(accounts, id_key(account.id.0), encode(&account)?)?;
        txn.commit()?;
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.get_row(CF_ACCOUNTS, &id_key(id.0))?
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>> {
        Ok(self
            .scan::<Account>(CF_ACCOUNTS)?
            .into_iter()
            .filter(|a| a.owner == owner)
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS)
    }

    async fn update_account_balance(&self, id: AccountId, balance: Balance) -> Result<Account> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let txn = self.db.transaction();
        let mut account: Account = match txn.get_for_update_cf(cf, id_key(id.0), true)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(LedgerError::not_found("account", id)),
        };
        account.balance = balance;
        txn.put_cf(cf, id_key(id.0), encode(&account)?)?;
        txn.commit()?;
        Ok(account)
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let accounts = self.cf(CF_ACCOUNTS)?;
        let index = self.cf(CF_ACCOUNT_OWNER_CURRENCY)?;
        let txn = self.db.transaction();
        if let Some(bytes) = txn.get_for_update_cf(accounts, id_key(id.0), true)? {
            let account: Account = decode(&bytes)?;
            let key = owner_currency_key(&NewAccount {
                owner: account.owner,
                balance: account.balance,
                currency: account.currency,
            });
            txn.delete_cf(index, key)?;
            txn.delete_cf(accounts, id_key(id.0))?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn create_entry(&self, entry: NewEntry) -> Result<Entry> {
        self.require_account(entry.account_id)?;
        let entry = Entry {
            id: self.next_entry_id(),
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: Utc::now(),
        };
        self.db
            .put_cf(self.cf(CF_ENTRIES)?, id_key(entry.id), encode(&entry)?)?;
        Ok(entry)
    }

    async fn get_entry(&self, id: i64) -> Result<Entry> {
        self.get_row(CF_ENTRIES, &id_key(id))?
            .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        Ok(self
            .scan::<Entry>(CF_ENTRIES)?
            .into_iter()
            .filter(|e| e.account_id == account_id)
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer> {
        self.require_account(transfer.from_account_id)?;
        self.require_account(transfer.to_account_id)?;
        let transfer = Transfer {
            id: self.next_transfer_id(),
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: Utc::now(),
        };
        self.db.put_cf(
            self.cf(CF_TRANSFERS)?,
            id_key(transfer.id),
            encode(&transfer)?,
        )?;
        Ok(transfer)
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer> {
        self.get_row(CF_TRANSFERS, &id_key(id))?
            .ok_or_else(|| LedgerError::not_found("transfer", id))
    }

    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        Ok(self
            .scan::<Transfer>(CF_TRANSFERS)?
            .into_iter()
            .filter(|t| t.from_account_id == from || t.to_account_id == to)
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    async fn begin<'a>(&'a self) -> Result<UnitOfWorkBox<'a>> {
        Ok(Box::new(RocksDBUnitOfWork {
            store: self,
            txn: self.db.transaction(),
        }))
    }
}

/// Open optimistic transaction against a [`RocksDBStore`].
///
/// Dropping it without committing discards the transaction.
pub struct RocksDBUnitOfWork<'a> {
    store: &'a RocksDBStore,
    txn: Transaction<'a, Db>,
}

impl<'a> RocksDBUnitOfWork<'a> {
    fn require_account(&self, id: AccountId) -> Result<()> {
        let cf = self.store.cf(CF_ACCOUNTS)?;
        if self.txn.get_cf(cf, id_key(id.0))?.is_some() {
            Ok(())
        } else {
            Err(LedgerError::ForeignKeyViolation(format!(
                "account {} does not exist",
                id
            )))
        }
    }
}

#[async_trait]
impl<'a> UnitOfWork for RocksDBUnitOfWork<'a> {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        let cf = self.store.cf(CF_ACCOUNTS)?;
        match self.txn.get_for_update_cf(cf, id_key(id.0), true)? {
            Some(bytes) => decode(&bytes),
            None => Err(LedgerError::not_found("account", id)),
        }
    }

    async fn update_account_balance(&mut self, id: AccountId, balance: Balance) -> Result<Account> {
        let mut account = self.get_account_for_update(id).await?;
        account.balance = balance;
        let cf = self.store.cf(CF_ACCOUNTS)?;
        self.txn.put_cf(cf, id_key(id.0), encode(&account)?)?;
        Ok(account)
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        self.require_account(transfer.from_account_id)?;
        self.require_account(transfer.to_account_id)?;
        let transfer = Transfer {
            id: self.store.next_transfer_id(),
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: Utc::now(),
        };
        let cf = self.store.cf(CF_TRANSFERS)?;
        self.txn
            .put_cf(cf, id_key(transfer.id), encode(&transfer)?)?;
        Ok(transfer)
    }

    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry> {
        self.require_account(entry.account_id)?;
        let entry = Entry {
            id: self.store.next_entry_id(),
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: Utc::now(),
        };
        let cf = self.store.cf(CF_ENTRIES)?;
        self.txn.put_cf(cf, id_key(entry.id), encode(&entry)?)?;
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }
}
