use crate::domain::account::Account;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow<'a> {
    id: i64,
    owner: &'a str,
    currency: &'a str,
    balance: i64,
}

/// Writes the final account report as CSV.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per account, in the order given, then flushes.
    pub fn write_accounts(&mut self, accounts: Vec<Account>) -> Result<()> {
        for account in &accounts {
            self.writer.serialize(AccountRow {
                id: account.id.0,
                owner: &account.owner,
                currency: account.currency.as_str(),
                balance: account.balance.value(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
