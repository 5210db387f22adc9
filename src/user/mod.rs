pub mod auth;
mod sqlite_user_store;
pub mod user_models;
mod user_store;

pub use auth::{AuthToken, AuthTokenValue, JobOpsHasher, UsernamePasswordCredentials};
pub use sqlite_user_store::SqliteUserStore;
pub use user_models::{User, UserRole};
pub use user_store::UserStore;
