pub mod audit;
mod error;
pub mod models;
pub mod policy;
mod schema;
mod sqlite_ops_store;
mod store;
mod workflow;

pub use error::{WorkflowError, WorkflowResult};
pub use models::*;
pub use sqlite_ops_store::SqliteOpsStore;
pub use store::OpsStore;
pub use workflow::WorkflowEngine;
