mod manage;

pub use manage::{create_lesson, delete_lesson, soft_delete_lesson, update_lesson_time};
