//! Kernel module - server infrastructure and dependencies.

pub mod database;
pub mod deps;
pub mod op_context;
pub mod test_dependencies;
pub mod traits;

pub use database::{connect_pool, run_migrations, MIGRATOR};
pub use deps::ServerDeps;
pub use op_context::OpContext;
pub use test_dependencies::StaticTemplateCatalog;
pub use traits::*;
