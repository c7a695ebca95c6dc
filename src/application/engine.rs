use crate::application::transfer::TransferCoordinator;
use crate::domain::account::{Account, AccountId, Currency, NewAccount};
use crate::domain::command::{CommandType, LedgerCommand};
use crate::domain::ports::LedgerStore;
use crate::domain::transfer::TransferResult;
use crate::domain::user::NewUser;
use crate::error::{LedgerError, Result};
use tracing::{debug, instrument};

/// What a successfully processed command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Opened(Account),
    Transferred(Box<TransferResult>),
}

/// Front door for replayed ledger commands.
///
/// Performs the request-level checks a serving layer owes the coordinator
/// (accounts exist, currencies agree) and then hands transfers to
/// [`TransferCoordinator`].
pub struct LedgerEngine {
    coordinator: TransferCoordinator,
}

impl LedgerEngine {
    /// Creates a new `LedgerEngine` driving the given coordinator.
    pub fn new(coordinator: TransferCoordinator) -> Self {
        Self { coordinator }
    }

    fn store(&self) -> &dyn LedgerStore {
        self.coordinator.store()
    }

    /// Processes a single command.
    #[instrument(skip(self))]
    pub async fn process_command(&self, command: LedgerCommand) -> Result<CommandOutcome> {
        match command.r#type {
            CommandType::Open => {
                let owner = required(command.owner, "owner")?;
                let currency = required(command.currency, "currency")?;
                let account = self
                    .open_account(&owner, currency, command.amount.unwrap_or(0))
                    .await?;
                Ok(CommandOutcome::Opened(account))
            }
            CommandType::Transfer => {
                let from = AccountId(required(command.from, "from")?);
                let to = AccountId(required(command.to, "to")?);
                let amount = required(command.amount, "amount")?;
                let result = self
                    .transfer(from, to, amount, command.currency)
                    .await?;
                Ok(CommandOutcome::Transferred(Box::new(result)))
            }
        }
    }

    /// Opens an account, registering the owner on first sight.
    pub async fn open_account(
        &self,
        owner: &str,
        currency: Currency,
        opening_balance: i64,
    ) -> Result<Account> {
        match self.store().get_user(owner).await {
            Ok(_) => {}
            Err(LedgerError::NotFound { .. }) => {
                debug!(owner, "Registering new owner");
                self.store()
                    .create_user(NewUser {
                        username: owner.to_string(),
                        hashed_password: String::new(),
                        full_name: owner.to_string(),
                        email: format!("{}@ledger.local", owner),
                    })
                    .await?;
            }
            Err(e) => return Err(e),
        }
        self.store()
            .create_account(NewAccount::new(owner, opening_balance, currency))
            .await
    }

    /// Validates a transfer request and executes it.
    ///
    /// Both accounts must exist and hold the same currency; if `currency` is
    /// given it must match too. Conversion between currencies is not offered.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
        currency: Option<Currency>,
    ) -> Result<TransferResult> {
        let from_account = self.store().get_account(from).await?;
        let to_account = self.store().get_account(to).await?;
        let expected = currency.unwrap_or(from_account.currency);
        for account in [&from_account, &to_account] {
            if account.currency != expected {
                return Err(LedgerError::ValidationError(format!(
                    "account {} doesn't support currency {}",
                    account.id, expected
                )));
            }
        }
        self.coordinator.execute_transfer(from, to, amount).await
    }

    /// Consumes the engine and returns the final state of all accounts.
    pub async fn into_results(self) -> Result<Vec<Account>> {
        self.store().all_accounts().await
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| LedgerError::ValidationError(format!("missing field: {}", field)))
}
