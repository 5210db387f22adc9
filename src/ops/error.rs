use thiserror::Error;

/// Failure taxonomy of the workflow engine. Everything except `Internal`
/// is a client mistake and maps to a 4xx at the API boundary.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(err: rusqlite::Error) -> Self {
        WorkflowError::Internal(err.into())
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
