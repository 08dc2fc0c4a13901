//! Template application state machine
//!
//! applied → replaced (re-applied to the same week)
//! applied → rolled_back

use crate::common::CoreError;
use crate::domains::templates::models::ApplicationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationTransition {
    Replace,
    RollBack,
}

/// `(from, transition, to)`, one row per transition in declaration order.
pub const TRANSITIONS: &[(ApplicationStatus, ApplicationTransition, ApplicationStatus)] = &[
    (
        ApplicationStatus::Applied,
        ApplicationTransition::Replace,
        ApplicationStatus::Replaced,
    ),
    (
        ApplicationStatus::Applied,
        ApplicationTransition::RollBack,
        ApplicationStatus::RolledBack,
    ),
];

impl ApplicationTransition {
    fn row(&self) -> &'static (ApplicationStatus, ApplicationTransition, ApplicationStatus) {
        &TRANSITIONS[*self as usize]
    }

    /// The status the record must have; the write predicate binds it.
    pub fn from_status(&self) -> ApplicationStatus {
        self.row().0
    }

    pub fn to_status(&self) -> ApplicationStatus {
        self.row().2
    }
}

pub fn next_status(
    current: ApplicationStatus,
    transition: ApplicationTransition,
) -> Option<ApplicationStatus> {
    TRANSITIONS
        .iter()
        .find(|(from, t, _)| *from == current && *t == transition)
        .map(|(_, _, to)| *to)
}

/// Error for a transition the table does not allow.
///
/// Rolling back an already rolled-back application is not an error; callers
/// check for it before asking.
pub fn rejection(current: ApplicationStatus, transition: ApplicationTransition) -> CoreError {
    match (current, transition) {
        (ApplicationStatus::Replaced, ApplicationTransition::RollBack) => CoreError::invalid_state(
            "template application",
            "replaced applications cannot be rolled back; roll back the replacement",
        ),
        (status, ApplicationTransition::Replace) => CoreError::ConcurrentModification(format!(
            "application is {status:?}, expected applied"
        )),
        (status, transition) => CoreError::invalid_state(
            "template application",
            format!("cannot {transition:?} from {status:?}"),
        ),
    }
}
