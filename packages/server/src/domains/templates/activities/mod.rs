//! Template application engine
//!
//! Apply and rollback are the only bulk writers of lessons and bookings.
//! Both go through the booking lifecycle so seats and credits follow the
//! same rules as single bookings.

mod apply;
pub mod planning;
mod queries;
mod rollback;

pub use apply::{apply_template, preview_apply, ApplyPreview, ApplySummary};
pub use planning::{find_shortfalls, plan_week, required_credits, week_bounds, PlannedLesson};
pub use queries::{find_application, get_week_stats, list_applications_for_week, WeekStats};
pub use rollback::{rollback_application, RollbackSummary};
