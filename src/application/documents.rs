//! Document lifecycle: hydrate, open, edit, save and upload intake.
//!
//! The body of a document never holds an inline payload once it has passed
//! through [`DocumentService::edit`] or [`DocumentService::save`]. Saving
//! writes pending blobs before the document, so a saved document never points
//! at a blob that was not written.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::blobs::BlobStore;
use crate::application::error::AppError;
use crate::application::repos::{BlobsRepo, DocumentsRepo};
use crate::application::sanitize::{Anomaly, Sanitizer};
use crate::domain::attachments::{
    AttachedFile, AttachmentSource, Payload, extension_for_mime, mime_for_name,
};
use crate::domain::documents::{Document, DocumentId};
use crate::domain::error::DomainError;

/// Summary of one sanitize run over a document body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeReport {
    pub changed: bool,
    pub extracted: usize,
    pub reused: usize,
    /// Attachment records appended to the document.
    pub attached: usize,
    pub anomalies: Vec<Anomaly>,
}

pub struct DocumentService {
    documents: Arc<dyn DocumentsRepo>,
    blob_repo: Arc<dyn BlobsRepo>,
    sanitizer: Sanitizer,
}

impl DocumentService {
    pub fn new(
        documents: Arc<dyn DocumentsRepo>,
        blob_repo: Arc<dyn BlobsRepo>,
        sanitizer: Sanitizer,
    ) -> Self {
        Self {
            documents,
            blob_repo,
            sanitizer,
        }
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        self.sanitizer.blobs()
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Load every persisted blob into the in-memory store.
    pub async fn hydrate(&self) -> Result<usize, AppError> {
        let stored = self.blob_repo.load_blobs().await?;
        let loaded = self.blobs().hydrate(stored);
        info!(
            target = "application::documents",
            loaded, "Hydrated blob store"
        );
        Ok(loaded)
    }

    pub async fn open(&self, id: DocumentId) -> Result<Document, AppError> {
        self.documents
            .load_document(id)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn list(&self) -> Result<Vec<DocumentId>, AppError> {
        Ok(self.documents.list_documents().await?)
    }

    /// Replace the body with `text`, sanitized against the document's own
    /// attachments.
    pub fn edit(&self, document: &mut Document, text: impl Into<String>) -> SanitizeReport {
        let text = text.into();
        let outcome = self.sanitizer.sanitize(&text, &document.attachments);
        let changed = outcome.changed(&document.body);

        let attached = document.merge_attachments(outcome.new_attachments);
        document.body = outcome.text;
        if changed || attached > 0 {
            document.touch();
        }

        debug!(
            target = "application::documents",
            document_id = %document.id,
            changed,
            attached,
            "Applied edit"
        );

        SanitizeReport {
            changed,
            extracted: outcome.extracted,
            reused: outcome.reused,
            attached,
            anomalies: outcome.anomalies,
        }
    }

    /// Sanitize, write pending blobs, then write the document.
    ///
    /// On failure the document and every unwritten blob stay in memory, so
    /// calling `save` again retries the remaining writes.
    pub async fn save(&self, document: &mut Document) -> Result<SanitizeReport, AppError> {
        let body = document.body.clone();
        let report = self.edit(document, body);

        if let Some(literal) = self.sanitizer.oversized_payloads(&document.body).first() {
            warn!(
                target = "application::documents",
                document_id = %document.id,
                literal = %literal,
                "Refusing to save an undecodable inline payload"
            );
            return Err(AppError::validation(format!(
                "document still holds an inline payload that could not be extracted: {literal}"
            )));
        }

        self.flush_blobs().await?;

        if let Err(err) = self.documents.save_document(document).await {
            warn!(
                target = "application::documents",
                document_id = %document.id,
                error = %err,
                retryable = err.is_retryable(),
                "Document could not be saved"
            );
            return Err(err.into());
        }

        info!(
            target = "application::documents",
            document_id = %document.id,
            attachments = document.attachments.len(),
            "Saved document"
        );
        Ok(report)
    }

    /// Write every blob not yet persisted; each is marked only after its
    /// write succeeded.
    pub async fn flush_blobs(&self) -> Result<usize, AppError> {
        let mut written = 0;
        for (reference, payload) in self.blobs().pending() {
            if let Err(err) = self.blob_repo.put_blob(&reference, &payload).await {
                warn!(
                    target = "application::documents",
                    reference = %reference,
                    error = %err,
                    "Blob could not be written"
                );
                return Err(err.into());
            }
            self.blobs().mark_persisted(&reference);
            written += 1;
        }
        Ok(written)
    }

    /// Register an uploaded file with the document, reusing any attachment or
    /// blob that already holds the same bytes.
    pub fn ingest_file(
        &self,
        document: &mut Document,
        bytes: impl Into<Bytes>,
        mime: &str,
        original_name: &str,
    ) -> Result<AttachedFile, AppError> {
        let mime = match mime.trim() {
            "" => mime_for_name(original_name),
            declared => declared.to_ascii_lowercase(),
        };
        let payload = Payload::new(mime.clone(), bytes);
        if payload.is_empty() {
            return Err(AppError::validation(format!(
                "uploaded file `{original_name}` is empty"
            )));
        }

        let checksum = payload.checksum();
        if let Some(existing) = document
            .attachments
            .iter()
            .find(|file| file.matches_payload(&checksum, &payload))
        {
            if existing.source == AttachmentSource::Stored
                && !self.blobs().contains(existing.reference.as_str())
            {
                self.blobs()
                    .insert(existing.reference.clone(), payload.clone())?;
            }
            debug!(
                target = "application::documents",
                reference = %existing.reference,
                "Upload matched an existing attachment"
            );
            return Ok(existing.clone());
        }

        let interned = self
            .blobs()
            .intern(&payload, extension_for_mime(&mime))
            .ok_or_else(|| DomainError::invariant("no unused short reference could be allocated"))?;

        let file = AttachedFile::stored(interned.reference, original_name, &payload);
        document.attachments.push(file.clone());
        document.touch();

        info!(
            target = "application::documents",
            document_id = %document.id,
            reference = %file.reference,
            reused = interned.reused,
            size_bytes = file.size_bytes,
            "Ingested file"
        );
        Ok(file)
    }
}
