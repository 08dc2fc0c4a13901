// Common types and utilities shared across the domains

pub mod db_errors;
pub mod entity_ids;
pub mod errors;
pub mod id;
pub mod pagination;

pub use db_errors::{constraint_violation, ConstraintKind, ConstraintViolation};
pub use entity_ids::*;
pub use errors::{CoreError, CoreResult, ErrorKind, Shortfall};
pub use id::Id;
pub use pagination::{Cursor, Page, PageRequest, ValidatedPage};
