//! Ledger domain - per-user credit balances and the append-only entry log
//!
//! Every mutation follows lock → read → compute → write → log inside the
//! caller's transaction. Activities that open their own transaction run it
//! under an `OpContext`.

pub mod activities;
pub mod models;

pub use activities::*;
pub use models::{Balance, LedgerEntry, NewLedgerEntry, OperationType};
