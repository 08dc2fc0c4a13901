//! Booking state machine - pure transition logic
//!
//! A booking is keyed by `(student, lesson)`. The absence of a row is a state
//! of its own, so the table works on `Option<BookingStatus>`.

use crate::common::{CoreError, LessonId, UserId};
use crate::domains::bookings::models::BookingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingTransition {
    Create,
    Cancel,
    Reactivate,
}

/// `(from, transition, to)` for every legal move, one row per transition in
/// declaration order.
pub const TRANSITIONS: &[(Option<BookingStatus>, BookingTransition, BookingStatus)] = &[
    (None, BookingTransition::Create, BookingStatus::Active),
    (
        Some(BookingStatus::Active),
        BookingTransition::Cancel,
        BookingStatus::Cancelled,
    ),
    (
        Some(BookingStatus::Cancelled),
        BookingTransition::Reactivate,
        BookingStatus::Active,
    ),
];

impl BookingTransition {
    fn row(&self) -> &'static (Option<BookingStatus>, BookingTransition, BookingStatus) {
        &TRANSITIONS[*self as usize]
    }

    /// The status a row must have for this transition to apply.
    pub fn from_status(&self) -> Option<BookingStatus> {
        self.row().0
    }

    pub fn to_status(&self) -> BookingStatus {
        self.row().2
    }
}

/// Returns the next status, or `None` if the transition is not legal from
/// `current`.
pub fn next_status(
    current: Option<BookingStatus>,
    transition: BookingTransition,
) -> Option<BookingStatus> {
    TRANSITIONS
        .iter()
        .find(|(from, t, _)| *from == current && *t == transition)
        .map(|(_, _, to)| *to)
}

/// The error reported when `transition` is attempted from `current` and the
/// table has no entry for it.
pub fn rejection(
    current: Option<BookingStatus>,
    transition: BookingTransition,
    student_id: UserId,
    lesson_id: LessonId,
) -> CoreError {
    match (current, transition) {
        (Some(_), BookingTransition::Create) => CoreError::DuplicateBooking {
            student_id,
            lesson_id,
        },
        (Some(BookingStatus::Cancelled), BookingTransition::Cancel) => CoreError::NotActive {
            student_id,
            lesson_id,
        },
        (Some(BookingStatus::Active), BookingTransition::Reactivate) => {
            CoreError::invalid_state("booking", "already active")
        }
        _ => CoreError::not_found("booking", format!("{student_id}/{lesson_id}")),
    }
}
