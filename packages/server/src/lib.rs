// Tutoring Scheduling - Consistency Core
//
// Bookings, credit balances, weekly template application and external
// identity linking on top of PostgreSQL. Every state-changing operation is a
// single transaction with explicit row locks or conditional writes.
//
// Operations are organized per-domain in domains/*/activities/

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
