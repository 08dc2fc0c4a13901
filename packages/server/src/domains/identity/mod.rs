//! Identity domain - links internal users to external messaging accounts

pub mod activities;
pub mod models;

pub use activities::*;
pub use models::ExternalIdentityLink;
