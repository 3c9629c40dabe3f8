//! Resolution of image and media references to displayable URIs.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use metrics::counter;
use serde::Serialize;
use tracing::warn;

use crate::application::blobs::BlobStore;
use crate::domain::attachments::{AttachedFile, Payload};

pub(crate) const METRIC_PLACEHOLDER: &str = "blotter_resolve_placeholder_total";

/// Shortest stem considered for fuzzy matching.
const FUZZY_MIN_STEM_LEN: usize = 3;
const PLACEHOLDER_NAME_MAX_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Absolute,
    BlobStore,
    Attachment,
    FuzzyMatch,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedReference {
    pub reference: String,
    pub uri: String,
    pub source: ResolutionSource,
    pub mime: Option<String>,
}

impl ResolvedReference {
    pub fn is_placeholder(&self) -> bool {
        self.source == ResolutionSource::Placeholder
    }

    fn from_payload(reference: &str, payload: &Payload, source: ResolutionSource) -> Self {
        Self {
            reference: reference.to_string(),
            uri: payload.to_data_uri(),
            source,
            mime: Some(payload.mime().to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ReferenceResolver {
    blobs: Arc<BlobStore>,
}

impl ReferenceResolver {
    pub fn new(blobs: Arc<BlobStore>) -> Self {
        Self { blobs }
    }

    /// Resolve `reference` to a URI. Never fails: unknown references become a
    /// placeholder image naming them.
    pub fn resolve(&self, reference: &str, attachments: &[AttachedFile]) -> ResolvedReference {
        let reference = reference.trim();

        if is_absolute(reference) {
            return ResolvedReference {
                reference: reference.to_string(),
                uri: reference.to_string(),
                source: ResolutionSource::Absolute,
                mime: None,
            };
        }

        if let Some(payload) = self.blobs.get(reference) {
            return ResolvedReference::from_payload(reference, &payload, ResolutionSource::BlobStore);
        }

        if let Some(payload) = attachments
            .iter()
            .filter(|file| file.matches_name(reference))
            .find_map(|file| self.payload_for(file))
        {
            return ResolvedReference::from_payload(reference, &payload, ResolutionSource::Attachment);
        }

        if let Some(payload) = self.fuzzy_match(reference, attachments) {
            return ResolvedReference::from_payload(reference, &payload, ResolutionSource::FuzzyMatch);
        }

        counter!(METRIC_PLACEHOLDER).increment(1);
        warn!(
            target = "application::resolve",
            reference,
            attachments = attachments.len(),
            "Reference did not resolve; substituting placeholder"
        );
        ResolvedReference {
            reference: reference.to_string(),
            uri: placeholder_uri(reference),
            source: ResolutionSource::Placeholder,
            mime: Some("image/svg+xml".to_string()),
        }
    }

    fn payload_for(&self, file: &AttachedFile) -> Option<Payload> {
        file.inline_payload()
            .cloned()
            .or_else(|| self.blobs.get(file.reference.as_str()))
    }

    fn fuzzy_match(&self, reference: &str, attachments: &[AttachedFile]) -> Option<Payload> {
        let wanted = stem_of(reference).to_lowercase();
        if wanted.chars().count() < FUZZY_MIN_STEM_LEN {
            return None;
        }
        let overlaps = |candidate: &str| {
            let candidate = stem_of(candidate).to_lowercase();
            candidate.chars().count() >= FUZZY_MIN_STEM_LEN
                && (candidate.contains(&wanted) || wanted.contains(&candidate))
        };

        attachments
            .iter()
            .filter(|file| overlaps(&file.original_name) || overlaps(file.reference.as_str()))
            .find_map(|file| self.payload_for(file))
            .or_else(|| {
                self.blobs
                    .references()
                    .into_iter()
                    .filter(|candidate| overlaps(candidate.as_str()))
                    .find_map(|candidate| self.blobs.get(candidate.as_str()))
            })
    }
}

fn is_absolute(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || reference.starts_with('/')
}

fn stem_of(name: &str) -> &str {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Deterministic SVG placeholder naming the missing reference.
pub fn placeholder_uri(reference: &str) -> String {
    let label: String = reference.chars().take(PLACEHOLDER_NAME_MAX_CHARS).collect();
    let svg = format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="480" height="270" viewBox="0 0 480 270">"##,
            r##"<rect width="480" height="270" fill="#f1f1f1" stroke="#c8c8c8"/>"##,
            r##"<text x="240" y="125" font-family="sans-serif" font-size="18" fill="#777" text-anchor="middle">Missing file</text>"##,
            r##"<text x="240" y="155" font-family="monospace" font-size="14" fill="#999" text-anchor="middle">{}</text>"##,
            "</svg>"
        ),
        ammonia::clean_text(&label)
    );
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attachments::ShortRef;

    fn png() -> Payload {
        Payload::new("image/png", b"\x89PNG\r\n\x1a\n".to_vec())
    }

    #[test]
    fn absolute_references_pass_through() {
        let resolver = ReferenceResolver::new(Arc::new(BlobStore::new()));
        for reference in ["https://example.com/a.png", "HTTP://x.y", "/static/a.png", "data:x"] {
            let resolved = resolver.resolve(reference, &[]);
            assert_eq!(resolved.uri, reference);
            assert_eq!(resolved.source, ResolutionSource::Absolute);
        }
    }

    #[test]
    fn blob_store_is_consulted_first() {
        let blobs = Arc::new(BlobStore::new());
        let interned = blobs.intern(&png(), "png").expect("allocated");
        let resolver = ReferenceResolver::new(blobs);

        let resolved = resolver.resolve(interned.reference.as_str(), &[]);
        assert_eq!(resolved.source, ResolutionSource::BlobStore);
        assert_eq!(resolved.uri, png().to_data_uri());
    }

    #[test]
    fn inline_attachments_resolve_by_original_name() {
        let resolver = ReferenceResolver::new(Arc::new(BlobStore::new()));
        let file = AttachedFile::inline(
            ShortRef::parse("zz9zz9.png").expect("reference"),
            "holiday.png",
            png(),
        );

        let resolved = resolver.resolve("holiday.png", std::slice::from_ref(&file));
        assert_eq!(resolved.source, ResolutionSource::Attachment);
        assert_eq!(resolved.uri, png().to_data_uri());
    }

    #[test]
    fn fuzzy_matching_uses_stem_containment() {
        let resolver = ReferenceResolver::new(Arc::new(BlobStore::new()));
        let file = AttachedFile::inline(
            ShortRef::parse("zz9zz9.png").expect("reference"),
            "summer-holiday-2024.png",
            png(),
        );

        let resolved = resolver.resolve("holiday.jpg", &[file]);
        assert_eq!(resolved.source, ResolutionSource::FuzzyMatch);
    }

    #[test]
    fn unknown_references_become_placeholders() {
        let resolver = ReferenceResolver::new(Arc::new(BlobStore::new()));
        let first = resolver.resolve("gone<1>.png", &[]);
        let second = resolver.resolve("gone<1>.png", &[]);

        assert!(first.is_placeholder());
        assert!(first.uri.starts_with("data:image/svg+xml;base64,"));
        assert_eq!(first, second);

        let svg = Payload::from_data_uri(&first.uri).expect("placeholder decodes");
        let svg = String::from_utf8(svg.bytes().to_vec()).expect("utf8");
        assert!(svg.contains("gone&lt;1&gt;.png"), "{svg}");
    }

    #[test]
    fn short_stems_never_fuzzy_match() {
        let resolver = ReferenceResolver::new(Arc::new(BlobStore::new()));
        let file = AttachedFile::inline(
            ShortRef::parse("zz9zz9.png").expect("reference"),
            "ab.png",
            png(),
        );
        assert!(resolver.resolve("ab.jpg", &[file]).is_placeholder());
    }
}
