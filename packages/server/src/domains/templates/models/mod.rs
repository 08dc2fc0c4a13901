pub mod application;
pub mod definition;
pub mod template;

pub use application::*;
pub use definition::*;
pub use template::*;
