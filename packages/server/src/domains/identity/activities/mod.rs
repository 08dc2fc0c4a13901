mod link;

pub use link::{
    find_by_external_id, find_by_user, link_atomic, normalize_external_id, unlink, LinkOutcome,
    LinkResult,
};
