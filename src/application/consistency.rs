//! Cross-checks between document bodies, attachment lists and the blob store.
//!
//! Nothing here mutates state. Orphaned blobs are reported, never deleted.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::info;

use crate::application::render::parse;
use crate::domain::attachments::{AttachmentSource, ShortRef};
use crate::domain::blocks::Block;
use crate::domain::documents::{Document, DocumentId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingReference {
    pub document_id: DocumentId,
    pub reference: String,
}

/// Stored attachment whose bytes are absent from the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnbackedAttachment {
    pub document_id: DocumentId,
    pub reference: ShortRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicatePayload {
    pub checksum: String,
    pub references: Vec<ShortRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub missing: Vec<MissingReference>,
    pub unbacked: Vec<UnbackedAttachment>,
    pub orphaned: Vec<ShortRef>,
    pub duplicates: Vec<DuplicatePayload>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
            && self.unbacked.is_empty()
            && self.orphaned.is_empty()
            && self.duplicates.is_empty()
    }
}

pub fn check(documents: &[Document], blob_refs: &[ShortRef]) -> ConsistencyReport {
    let stored: BTreeSet<&str> = blob_refs.iter().map(ShortRef::as_str).collect();
    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut report = ConsistencyReport::default();

    for document in documents {
        for reference in body_references(document) {
            let known =
                stored.contains(reference.as_str()) || document.attachment(&reference).is_some();
            if !known {
                report.missing.push(MissingReference {
                    document_id: document.id,
                    reference: reference.clone(),
                });
            }
            used.insert(reference);
        }

        for file in &document.attachments {
            used.insert(file.reference.as_str().to_string());
            if file.source == AttachmentSource::Stored
                && !stored.contains(file.reference.as_str())
            {
                report.unbacked.push(UnbackedAttachment {
                    document_id: document.id,
                    reference: file.reference.clone(),
                });
            }
        }
    }

    report.orphaned = blob_refs
        .iter()
        .filter(|reference| !used.contains(reference.as_str()))
        .cloned()
        .collect();

    let mut by_checksum: BTreeMap<&str, BTreeSet<ShortRef>> = BTreeMap::new();
    for file in documents.iter().flat_map(|document| &document.attachments) {
        by_checksum
            .entry(file.checksum.as_str())
            .or_default()
            .insert(file.reference.clone());
    }
    report.duplicates = by_checksum
        .into_iter()
        .filter(|(_, references)| references.len() > 1)
        .map(|(checksum, references)| DuplicatePayload {
            checksum: checksum.to_string(),
            references: references.into_iter().collect(),
        })
        .collect();

    info!(
        target = "application::consistency",
        documents = documents.len(),
        blobs = blob_refs.len(),
        missing = report.missing.len(),
        unbacked = report.unbacked.len(),
        orphaned = report.orphaned.len(),
        duplicates = report.duplicates.len(),
        "Consistency check finished"
    );
    report
}

/// Local references named by image and media blocks, in document order.
fn body_references(document: &Document) -> Vec<String> {
    let mut seen = BTreeSet::new();
    parse(&document.body)
        .filter_map(|block| match block {
            Block::Image(image) => Some(image.reference),
            Block::MediaEmbed(embed) if !embed.kind.is_remote_service() => Some(embed.reference),
            _ => None,
        })
        .filter(|reference| !is_external(reference))
        .filter(|reference| seen.insert(reference.clone()))
        .collect()
}

fn is_external(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || reference.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attachments::{AttachedFile, Payload};

    fn reference(value: &str) -> ShortRef {
        ShortRef::parse(value).expect("reference")
    }

    fn payload(bytes: &'static [u8]) -> Payload {
        Payload::new("image/png", bytes)
    }

    #[test]
    fn clean_store_reports_nothing() {
        let mut document = Document::new("a", "![x](abc123.png)");
        document
            .attachments
            .push(AttachedFile::stored(reference("abc123.png"), "x.png", &payload(b"x")));
        let report = check(&[document], &[reference("abc123.png")]);
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn reports_missing_orphaned_and_duplicates() {
        let mut first = Document::new(
            "a",
            "![x](abc123.png)\n![gone](zzz999.png)\n![web](https://example.com/a.png)",
        );
        first
            .attachments
            .push(AttachedFile::stored(reference("abc123.png"), "x.png", &payload(b"x")));
        let mut second = Document::new("b", "[FILE:def456.png]");
        second
            .attachments
            .push(AttachedFile::stored(reference("def456.png"), "y.png", &payload(b"x")));

        let report = check(
            &[first.clone(), second],
            &[reference("abc123.png"), reference("orphan.png"), reference("def456.png")],
        );

        assert_eq!(
            report.missing,
            vec![MissingReference {
                document_id: first.id,
                reference: "zzz999.png".into()
            }]
        );
        assert_eq!(report.orphaned, vec![reference("orphan.png")]);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(
            report.duplicates[0].references,
            vec![reference("abc123.png"), reference("def456.png")]
        );
        assert!(report.unbacked.is_empty());
    }

    #[test]
    fn stored_attachments_without_blobs_are_unbacked() {
        let mut document = Document::new("a", "![x](abc123.png)");
        document
            .attachments
            .push(AttachedFile::stored(reference("abc123.png"), "x.png", &payload(b"x")));
        let report = check(&[document], &[]);
        assert!(report.missing.is_empty());
        assert_eq!(report.unbacked.len(), 1);
    }
}
