//! Classification of Postgres constraint violations.
//!
//! The core relies on storage constraints (unique keys, the per-teacher
//! exclusion constraint, check constraints) to decide races. This module turns the raw
//! `sqlx::Error` into a `ConstraintViolation` so call sites can map it onto
//! the specific domain error. Nothing outside this module looks at SQLSTATE
//! codes.

use std::fmt;

/// `lessons`: no two live lessons of one teacher overlap.
pub const LESSONS_TEACHER_NO_OVERLAP: &str = "lessons_teacher_no_overlap";
/// `lessons`: `0 <= current_seats <= max_seats`.
pub const LESSONS_SEATS_WITHIN_CAPACITY: &str = "lessons_seats_within_capacity";
/// `bookings`: one row per (student, lesson).
pub const BOOKINGS_STUDENT_LESSON_KEY: &str = "bookings_student_lesson_key";
/// `external_identity_links`: one link per external id.
pub const IDENTITY_EXTERNAL_KEY: &str = "external_identity_links_external_key";
/// `external_identity_links`: one link per user.
pub const IDENTITY_USER_KEY: &str = "external_identity_links_user_key";
/// `template_applications`: one live application per (template, week).
pub const TEMPLATE_APPLICATIONS_LIVE_KEY: &str = "template_applications_live_key";
/// `ledger_entries`: idempotency keys are unique.
pub const LEDGER_IDEMPOTENCY_KEY: &str = "ledger_entries_idempotency_key_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    Exclusion,
    ForeignKey,
    Check,
}

impl ConstraintKind {
    /// Maps a Postgres SQLSTATE to the constraint family it reports.
    pub fn from_sqlstate(code: &str) -> Option<Self> {
        match code {
            "23505" => Some(ConstraintKind::Unique),
            "23P01" => Some(ConstraintKind::Exclusion),
            "23503" => Some(ConstraintKind::ForeignKey),
            "23514" => Some(ConstraintKind::Check),
            _ => None,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Unique => write!(f, "unique"),
            ConstraintKind::Exclusion => write!(f, "exclusion"),
            ConstraintKind::ForeignKey => write!(f, "foreign_key"),
            ConstraintKind::Check => write!(f, "check"),
        }
    }
}

/// A constraint violation reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    pub constraint: Option<String>,
}

impl ConstraintViolation {
    /// True when this violation is of `kind` on the named constraint.
    ///
    /// A violation without a constraint name matches any name, since some
    /// drivers omit it; the kind still has to agree.
    pub fn is(&self, kind: ConstraintKind, name: &str) -> bool {
        self.kind == kind
            && self
                .constraint
                .as_deref()
                .map_or(true, |constraint| constraint == name)
    }
}

/// Extracts a constraint violation from a sqlx error, if it is one.
pub fn constraint_violation(err: &sqlx::Error) -> Option<ConstraintViolation> {
    let db_err = err.as_database_error()?;
    let code = db_err.code()?;
    let kind = ConstraintKind::from_sqlstate(code.as_ref())?;
    Some(ConstraintViolation {
        kind,
        constraint: db_err.constraint().map(str::to_owned),
    })
}
