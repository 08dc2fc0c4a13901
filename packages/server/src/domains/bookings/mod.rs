//! Bookings domain - booking lifecycle per (student, lesson)
//!
//! Create, cancel and reactivate move seats through the lessons domain and
//! credits through the ledger in the same transaction.

pub mod activities;
pub mod machines;
pub mod models;

pub use activities::*;
pub use machines::BookingTransition;
pub use models::{Booking, BookingStatus};
