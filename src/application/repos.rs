//! Repository traits describing persistence adapters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::attachments::{Payload, ShortRef};
use crate::domain::documents::{Document, DocumentId};
use crate::domain::polls::Ballot;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("storage timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Failures worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

#[async_trait]
pub trait DocumentsRepo: Send + Sync {
    async fn load_document(&self, id: DocumentId) -> Result<Option<Document>, RepoError>;

    async fn save_document(&self, document: &Document) -> Result<(), RepoError>;

    async fn list_documents(&self) -> Result<Vec<DocumentId>, RepoError>;
}

#[async_trait]
pub trait BlobsRepo: Send + Sync {
    async fn load_blobs(&self) -> Result<BTreeMap<ShortRef, Payload>, RepoError>;

    async fn put_blob(&self, reference: &ShortRef, payload: &Payload) -> Result<(), RepoError>;
}

#[async_trait]
pub trait PollsRepo: Send + Sync {
    async fn load_ballots(&self) -> Result<Vec<Ballot>, RepoError>;

    async fn record_ballot(&self, ballot: &Ballot) -> Result<(), RepoError>;
}
