use super::account::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One signed balance movement against one account.
///
/// Entries are append-only: the store never updates one after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: i64,
}

impl NewEntry {
    pub fn new(account_id: AccountId, amount: i64) -> Self {
        Self { account_id, amount }
    }
}
