//! Application layer containing the core business logic orchestration.
//!
//! [`transfer::TransferCoordinator`] owns the atomic funds-transfer algorithm
//! and its retry loop. [`engine::LedgerEngine`] sits in front of it and turns
//! replayed commands into validated calls.

pub mod engine;
pub mod transfer;
