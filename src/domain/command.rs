use super::account::Currency;
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Open,
    Transfer,
}

/// One row of a replay file.
///
/// `open` uses `owner`, `currency` and `amount` (the opening balance).
/// `transfer` uses `from`, `to` and `amount`; `currency`, when present, is
/// checked against both accounts.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct LedgerCommand {
    pub r#type: CommandType,
    pub owner: Option<String>,
    pub currency: Option<Currency>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub amount: Option<i64>,
}
