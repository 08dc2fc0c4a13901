//! Typed ID definitions for all domain entities.
//!
//! Students, teachers and administrators are all users of the platform and
//! share `UserId`; the role is decided by the auth layer, not by the id.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for platform users (students, teachers, administrators).
pub struct User;

/// Marker type for Lesson entities.
pub struct Lesson;

/// Marker type for Booking entities.
pub struct Booking;

/// Marker type for LedgerEntry entities.
pub struct LedgerEntry;

/// Marker type for LessonTemplate entities.
pub struct LessonTemplate;

/// Marker type for TemplateSlot entities.
pub struct TemplateSlot;

/// Marker type for TemplateApplication entities.
pub struct TemplateApplication;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

pub type UserId = Id<User>;
pub type LessonId = Id<Lesson>;
pub type BookingId = Id<Booking>;
pub type LedgerEntryId = Id<LedgerEntry>;
pub type TemplateId = Id<LessonTemplate>;
pub type TemplateSlotId = Id<TemplateSlot>;
pub type TemplateApplicationId = Id<TemplateApplication>;
