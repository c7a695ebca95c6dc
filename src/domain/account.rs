use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an account row.
///
/// Ordered numerically; the ordering is what transfers use to decide which
/// row to lock first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Account balance in minor currency units.
///
/// Balances are signed: nothing in the ledger forbids an account from going
/// below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub i64);

impl Balance {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Applies a signed delta, refusing to wrap around.
    pub fn apply(self, delta: i64) -> Result<Self> {
        self.0.checked_add(delta).map(Self).ok_or_else(|| {
            LedgerError::ValidationError(format!(
                "Balance overflow applying {} to {}",
                delta, self.0
            ))
        })
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A strictly positive amount moved by a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(LedgerError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Delta applied to the paying account.
    pub fn debit(&self) -> i64 {
        -self.0
    }

    /// Delta applied to the receiving account.
    pub fn credit(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EURO")]
    Euro,
    #[serde(rename = "CAD")]
    Cad,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Euro => "EURO",
            Currency::Cad => "CAD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "USD" => Ok(Currency::Usd),
            "EURO" => Ok(Currency::Euro),
            "CAD" => Ok(Currency::Cad),
            other => Err(LedgerError::ValidationError(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}

/// An account row.
///
/// `balance` is only ever changed by a transfer (or the raw store primitive);
/// it always equals the opening balance plus the sum of the account's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: Balance,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner: String,
    pub balance: Balance,
    pub currency: Currency,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, balance: i64, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance: Balance::new(balance),
            currency,
        }
    }
}
