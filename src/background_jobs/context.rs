use crate::notifications::Notifier;
use crate::ops::{OpsStore, WorkflowEngine};
use crate::user::UserStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Direct access to the job/task database.
    pub ops_store: Arc<dyn OpsStore>,

    /// Access to user accounts (recipients, technician lookups).
    pub user_store: Arc<dyn UserStore>,

    /// The workflow engine, for state transitions that must be audited.
    pub workflow: Arc<WorkflowEngine>,

    /// Best-effort notification delivery.
    pub notifier: Arc<dyn Notifier>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        ops_store: Arc<dyn OpsStore>,
        user_store: Arc<dyn UserStore>,
        workflow: Arc<WorkflowEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            cancellation_token,
            ops_store,
            user_store,
            workflow,
            notifier,
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
