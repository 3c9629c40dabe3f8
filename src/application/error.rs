use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{polls::PollError, repos::RepoError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Flattened view of an error and its `source()` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn from_message(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            messages: vec![message.into()],
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Storage failures the caller may retry with the same in-memory state.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Repo(err) => err.is_retryable(),
            AppError::Poll(PollError::Storage(err)) => err.is_retryable(),
            AppError::Infra(InfraError::Io(_)) => true,
            _ => false,
        }
    }

    /// Process exit code for the command-line surface.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Validation(_)
            | AppError::NotFound => 2,
            AppError::Poll(err) if err.is_rejection() => 3,
            AppError::Repo(_) | AppError::Poll(_) | AppError::Infra(InfraError::Io(_)) => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::polls::{PollId, VoterId};

    #[test]
    fn storage_failures_are_retryable() {
        let err = AppError::from(RepoError::from_persistence("disk full"));
        assert!(err.is_retryable());
        assert_eq!(err.exit_code(), 4);

        let err = AppError::from(PollError::Storage(RepoError::Timeout));
        assert!(err.is_retryable());
    }

    #[test]
    fn rejections_are_not_retryable() {
        let err = AppError::from(PollError::AlreadyVoted {
            poll: PollId::new("poll-a-1"),
            voter: VoterId::new("v"),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.exit_code(), 3);
        assert!(!AppError::from(RepoError::NotFound).is_retryable());
    }

    #[test]
    fn report_walks_the_source_chain() {
        let io = std::io::Error::other("denied");
        let err = AppError::from(InfraError::from(io));
        let report = ErrorReport::from_error("test", &err);
        assert_eq!(report.messages[0], "io error: denied");
        assert!(report.messages.len() >= 2);
        assert_eq!(report.messages.last().map(String::as_str), Some("denied"));
    }
}
