// Business domains
pub mod bookings;
pub mod identity;
pub mod ledger;
pub mod lessons;
pub mod templates;
