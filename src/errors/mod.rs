// Error taxonomy shared by the services, the stores and the transport mapping.
use thiserror::Error;

use crate::models::TaskId;

pub mod response;
pub mod store;

pub use store::{StoreError, StoreResult};

// Stable classification of every failure a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::Internal => "internal server error",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    PermissionDenied(String),

    // Same message as TaskNotFound so callers cannot probe for other users' tasks
    #[error("task with id {0} not found")]
    TaskNotOwned(TaskId),

    #[error("task with id {0} not found")]
    TaskNotFound(TaskId),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            AppError::PermissionDenied(_) | AppError::TaskNotOwned(_) => {
                ErrorKind::PermissionDenied
            }
            AppError::NotFound(_) | AppError::TaskNotFound(_) => ErrorKind::NotFound,
            AppError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AppError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            AppError::Internal(_) | AppError::Store(_) => ErrorKind::Internal,
        }
    }

    // Message safe to show a user. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) | AppError::Store(_) => ErrorKind::Internal.as_str().to_string(),
            other => other.to_string(),
        }
    }

    pub fn task_limit_exceeded() -> Self {
        AppError::ResourceExhausted("task limit exceeded".into())
    }
}

// Custom result type
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_failure_reads_like_a_missing_task() {
        let not_owned = AppError::TaskNotOwned(7);
        let missing = AppError::TaskNotFound(7);

        assert_eq!(not_owned.to_string(), missing.to_string());
        assert_eq!(not_owned.kind(), ErrorKind::PermissionDenied);
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn store_errors_are_internal_and_opaque() {
        let err = AppError::from(StoreError::Corrupt("quota:user:3 missing id".into()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.public_message(), "internal server error");
    }

    #[test]
    fn limit_exceeded_is_resource_exhausted() {
        let err = AppError::task_limit_exceeded();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(err.public_message(), "task limit exceeded");
    }
}
