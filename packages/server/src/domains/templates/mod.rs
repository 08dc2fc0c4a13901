//! Templates domain - weekly schedule templates and their applications
//!
//! Template contents are read through `BaseTemplateCatalog`; this domain
//! owns `template_applications` and the apply/rollback engine.

pub mod activities;
pub mod machines;
pub mod models;

pub use activities::*;
pub use machines::ApplicationTransition;
pub use models::{
    ApplicationStatus, LessonTemplate, NewTemplate, PgTemplateCatalog, SlotDefinition,
    TemplateApplication, TemplateDefinition,
};
