//! Ledger activities
//!
//! `postings` work inside a caller-owned transaction and are what the
//! booking and template domains call. The rest are top-level operations that
//! own their transaction.

mod admin;
mod audit;
pub mod postings;
mod purchase;
mod queries;

pub use admin::admin_adjust;
pub use audit::{audit_entries, audit_user, LedgerAudit};
pub use postings::{apply_delta, credit, debit, next_balance, BalancePolicy, LedgerPosting};
pub use purchase::{credit_purchase, PurchaseOutcome};
pub use queries::{get_balance, get_history};
