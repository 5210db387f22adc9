//! The background jobs themselves

mod changelog_cleanup;
mod overdue_sweep;
mod reminder_sweep;

pub use changelog_cleanup::ChangelogCleanupJob;
pub use overdue_sweep::OverdueSweepJob;
pub use reminder_sweep::ReminderSweepJob;
