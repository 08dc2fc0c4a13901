use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

use super::db_errors::{self, ConstraintViolation};
use super::{LessonId, UserId};

/// Coarse error classes the handler layer maps onto its own responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    InsufficientFunds,
    Validation,
    Cancelled,
    Internal,
}

/// One user's credit shortfall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub user_id: UserId,
    pub required: i64,
    pub available: i64,
}

impl Shortfall {
    pub fn missing(&self) -> i64 {
        self.required - self.available
    }
}

/// Errors returned by every core operation.
///
/// Storage constraint violations never surface as `Database`; they are
/// translated into the specific conflict variant where they are raised.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("lesson {lesson_id} is full")]
    Full { lesson_id: LessonId },

    #[error("schedule conflict: {0}")]
    ScheduleConflict(String),

    #[error("student {student_id} already has a booking for lesson {lesson_id}")]
    DuplicateBooking {
        student_id: UserId,
        lesson_id: LessonId,
    },

    #[error("external identity {external_id} is already linked to another user")]
    IdentityAlreadyLinked { external_id: String },

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("booking of student {student_id} for lesson {lesson_id} is not active")]
    NotActive {
        student_id: UserId,
        lesson_id: LessonId,
    },

    #[error("invalid {entity} state: {detail}")]
    InvalidState { entity: &'static str, detail: String },

    #[error("insufficient funds for {} user(s)", .0.len())]
    InsufficientFunds(Vec<Shortfall>),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(entity: &'static str, detail: impl Into<String>) -> Self {
        CoreError::InvalidState {
            entity,
            detail: detail.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    /// Single-user insufficient funds.
    pub fn insufficient_funds(user_id: UserId, required: i64, available: i64) -> Self {
        CoreError::InsufficientFunds(vec![Shortfall {
            user_id,
            required,
            available,
        }])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Full { .. }
            | CoreError::ScheduleConflict(_)
            | CoreError::DuplicateBooking { .. }
            | CoreError::IdentityAlreadyLinked { .. }
            | CoreError::ConcurrentModification(_) => ErrorKind::Conflict,
            CoreError::NotActive { .. } | CoreError::InvalidState { .. } => {
                ErrorKind::InvalidState
            }
            CoreError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Cancelled | CoreError::DeadlineExceeded => ErrorKind::Cancelled,
            CoreError::Database(_) | CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The constraint violation behind a `Database` error, if any.
    pub fn constraint_violation(&self) -> Option<ConstraintViolation> {
        match self {
            CoreError::Database(err) => db_errors::constraint_violation(err),
            _ => None,
        }
    }

    /// Shortfalls carried by an `InsufficientFunds` error, empty otherwise.
    pub fn shortfalls(&self) -> &[Shortfall] {
        match self {
            CoreError::InsufficientFunds(list) => list,
            _ => &[],
        }
    }
}
