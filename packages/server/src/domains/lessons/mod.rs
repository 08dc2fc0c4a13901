//! Lessons domain - seat counters and teacher time slots
//!
//! Seat changes are single conditional updates; teacher overlap is decided
//! by the `lessons_teacher_no_overlap` exclusion constraint.

pub mod activities;
pub mod models;

pub use activities::*;
pub use models::{Lesson, NewLesson};
