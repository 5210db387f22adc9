//! Best-effort notification delivery

mod models;

pub use models::Notification;

use crate::user::User;
use anyhow::Result;
use tracing::info;

/// Delivery is fire-and-forget from the caller's perspective: sweeps log
/// failures and move on, they never roll back on a failed send.
pub trait Notifier: Send + Sync {
    fn send(&self, recipient: &User, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log instead of delivering them anywhere.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, recipient: &User, notification: &Notification) -> Result<()> {
        info!(
            "Notification for {}: {} / {}",
            recipient.username, notification.subject, notification.body
        );
        Ok(())
    }
}
