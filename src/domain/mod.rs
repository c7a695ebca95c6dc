//! Ledger data model and the storage ports the application layer drives.

pub mod account;
pub mod command;
pub mod entry;
pub mod lock_order;
pub mod ports;
pub mod transfer;
pub mod user;
