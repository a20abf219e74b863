mod article;
mod client;
pub mod core;
mod run;
mod schema;
mod types;

// Re-export Database and essential traits
pub use self::core::{is_unique_violation, Database, DbLockErrorExt};
pub use self::types::*;
pub use sqlx::Row;
