//! In-memory persistence used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::application::repos::{BlobsRepo, DocumentsRepo, PollsRepo, RepoError};
use crate::domain::attachments::{Payload, ShortRef};
use crate::domain::documents::{Document, DocumentId};
use crate::domain::polls::Ballot;
use crate::util::lock::{read_guard, write_guard};

const OWNER: &str = "infra::memory::MemoryStore";

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<DocumentId, Document>>,
    blobs: RwLock<BTreeMap<ShortRef, Payload>>,
    ballots: RwLock<Vec<Ballot>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a retryable persistence error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of writes that succeeded.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn document(&self, id: DocumentId) -> Option<Document> {
        read_guard(&self.documents, OWNER, "document")
            .get(&id)
            .cloned()
    }

    pub fn blob(&self, reference: &str) -> Option<Payload> {
        read_guard(&self.blobs, OWNER, "blob")
            .get(reference)
            .cloned()
    }

    pub fn blob_count(&self) -> usize {
        read_guard(&self.blobs, OWNER, "blob_count").len()
    }

    pub fn ballots(&self) -> Vec<Ballot> {
        read_guard(&self.ballots, OWNER, "ballots").clone()
    }

    fn check_write(&self) -> Result<(), RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("injected write failure"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DocumentsRepo for MemoryStore {
    async fn load_document(&self, id: DocumentId) -> Result<Option<Document>, RepoError> {
        Ok(self.document(id))
    }

    async fn save_document(&self, document: &Document) -> Result<(), RepoError> {
        self.check_write()?;
        write_guard(&self.documents, OWNER, "save_document")
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentId>, RepoError> {
        Ok(read_guard(&self.documents, OWNER, "list_documents")
            .keys()
            .copied()
            .collect())
    }
}

#[async_trait]
impl BlobsRepo for MemoryStore {
    async fn load_blobs(&self) -> Result<BTreeMap<ShortRef, Payload>, RepoError> {
        Ok(read_guard(&self.blobs, OWNER, "load_blobs").clone())
    }

    async fn put_blob(&self, reference: &ShortRef, payload: &Payload) -> Result<(), RepoError> {
        self.check_write()?;
        write_guard(&self.blobs, OWNER, "put_blob").insert(reference.clone(), payload.clone());
        Ok(())
    }
}

#[async_trait]
impl PollsRepo for MemoryStore {
    async fn load_ballots(&self) -> Result<Vec<Ballot>, RepoError> {
        Ok(self.ballots())
    }

    async fn record_ballot(&self, ballot: &Ballot) -> Result<(), RepoError> {
        self.check_write()?;
        write_guard(&self.ballots, OWNER, "record_ballot").push(ballot.clone());
        Ok(())
    }
}
