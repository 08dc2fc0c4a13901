pub mod external_identity_link;

pub use external_identity_link::*;
