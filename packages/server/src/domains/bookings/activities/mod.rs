//! Booking activities
//!
//! `*_in_tx` functions run inside a caller-owned transaction so the template
//! engine can compose them; the rest own their transaction.

pub mod lifecycle;
pub mod release;

pub use lifecycle::{
    cancel_booking, cancel_in_tx, create_booking, create_in_tx, reactivate_booking,
    reactivate_in_tx, BookingReceipt, ChargeContext,
};
pub use release::{cancel_lesson, release_lessons, ReleaseSummary};
