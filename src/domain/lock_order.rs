//! Canonical acquisition order for the two accounts touched by a transfer.
//!
//! Every transfer locks its accounts lowest id first, whatever the direction
//! of the money. Two transfers over the same pair therefore queue on the same
//! first row instead of each holding one row and waiting for the other.

use super::account::AccountId;

/// The two accounts of a transfer, in the order their rows must be acquired
/// and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOrder {
    pub first: AccountId,
    pub second: AccountId,
}

impl LockOrder {
    pub fn new(a: AccountId, b: AccountId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// Both ids in acquisition order.
    pub fn as_array(&self) -> [AccountId; 2] {
        [self.first, self.second]
    }
}
