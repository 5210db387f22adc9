use axum::extract::FromRef;

use crate::ops::WorkflowEngine;
use crate::user::UserStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedWorkflow = Arc<WorkflowEngine>;
pub type GuardedUserStore = Arc<dyn UserStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub workflow: GuardedWorkflow,
    pub user_store: GuardedUserStore,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedWorkflow {
    fn from_ref(input: &ServerState) -> Self {
        input.workflow.clone()
    }
}

impl FromRef<ServerState> for GuardedUserStore {
    fn from_ref(input: &ServerState) -> Self {
        input.user_store.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
