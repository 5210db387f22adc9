pub mod background_jobs;
pub mod config;
pub mod notifications;
pub mod ops;
pub mod server;
mod sqlite_persistence;
pub mod user;
