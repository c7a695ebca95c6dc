#![allow(dead_code)]

use bankledger::domain::account::{Account, Currency, NewAccount};
use bankledger::domain::ports::LedgerStore;
use bankledger::domain::user::NewUser;
use std::fs::File;
use std::io::Error;
use std::path::Path;

/// Registers `owner` if needed and opens a USD account for them.
pub async fn open_account(store: &dyn LedgerStore, owner: &str, balance: i64) -> Account {
    if store.get_user(owner).await.is_err() {
        store
            .create_user(NewUser {
                username: owner.to_string(),
                hashed_password: "secret".to_string(),
                full_name: owner.to_string(),
                email: format!("{}@example.com", owner),
            })
            .await
            .expect("Failed to create user");
    }
    store
        .create_account(NewAccount::new(owner, balance, Currency::Usd))
        .await
        .expect("Failed to create account")
}

/// Writes a replay file that opens `accounts` USD accounts with 1000 each
/// and then moves 1 unit around the ring `rounds` times.
pub fn generate_ring_csv(path: &Path, accounts: usize, rounds: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["type", "owner", "currency", "from", "to", "amount"])?;
    for i in 1..=accounts {
        let owner = format!("owner{}", i);
        wtr.write_record(["open", owner.as_str(), "USD", "", "", "1000"])?;
    }
    for _ in 0..rounds {
        for i in 1..=accounts {
            let from = i.to_string();
            let to = (i % accounts + 1).to_string();
            wtr.write_record(["transfer", "", "", from.as_str(), to.as_str(), "1"])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
