pub mod balance;
pub mod ledger_entry;

pub use balance::*;
pub use ledger_entry::*;
