//! Shared Utilities

mod hashing;
mod time;
mod validation;

pub use hashing::content_hash;
pub use time::{age_in_days, now_utc};
pub use validation::{validate_project_id, validate_unit_interval};
