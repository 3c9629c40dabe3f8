//! Extraction of inline binary payloads into the blob store.
//!
//! Editors paste images as `data:` URIs in several shapes. Each pass rewrites
//! them, most specific shape first, into `![alt](<reference>)` and then strips
//! unrecoverable leftovers. Passes repeat until the text stops changing, so
//! feeding the output back in is a no-op. A literal that sits inside a link,
//! attribute or parentheses is swapped for its bare reference instead.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::blobs::BlobStore;
use crate::domain::attachments::{
    AttachedFile, AttachmentSource, Payload, ShortRef, extension_for_mime,
};
use crate::domain::slug::truncated_slug;
use crate::util::bytes::{base64_decoded_len, human_size};

pub(crate) const METRIC_EXTRACTED: &str = "blotter_sanitize_extracted_total";
pub(crate) const METRIC_REUSED: &str = "blotter_sanitize_reused_total";
pub(crate) const METRIC_ANOMALY: &str = "blotter_sanitize_anomaly_total";

const DEFAULT_STRAY_BASE64_MIN_LEN: usize = 200;
const DEFAULT_MAX_PASSES: usize = 4;
const ALT_NAME_MAX_LEN: usize = 40;
const ANOMALY_EXCERPT_LEN: usize = 48;

static MARKDOWN_DATA_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)!\[([^\]\n]*)\]\((data:[^)\s]*)\)(?:[ \t]*\r?\n?[ \t]*<!--\s*FULL_DATA:.*?-->)?",
    )
    .expect("markdown data image regex must compile")
});

static IMG_DATA_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<img\b[^>]*?\bsrc\s*=\s*(?:["'](data:[^"']*)["']|(data:[^\s"'>]*))[^>]*>"#,
    )
    .expect("img tag regex must compile")
});

static IMG_ALT_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\balt\s*=\s*["']([^"']*)["']"#).expect("alt attribute regex must compile")
});

static BARE_DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bdata:[A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+(?:;[A-Za-z0-9.+=-]+)*,[A-Za-z0-9+/=]+")
        .expect("bare data uri regex must compile")
});

static HTML_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex must compile"));

static EXCESS_BLANK_LINES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\r?\n(?:[ \t\r]*\n){3,}").expect("blank line regex must compile")
});

static DATA_URI_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bdata:[A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+[;,]\S*")
        .expect("data uri literal regex must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizerConfig {
    /// Minimum length of a whitespace-delimited base64 run treated as debris.
    pub stray_base64_min_len: usize,
    /// Upper bound on rewrite passes per call.
    pub max_passes: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            stray_base64_min_len: DEFAULT_STRAY_BASE64_MIN_LEN,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A `data:` literal whose header or payload could not be decoded.
    MalformedDataUri,
    /// A `data:` literal still present after sanitizing.
    ResidualDataUri,
    /// No unused reference could be allocated for a payload.
    ReferenceExhausted,
    /// A reference that resolved to a placeholder.
    MissingReference,
    /// A poll or media directive that could not be understood.
    MalformedDirective,
}

/// Recoverable problem found while processing a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub detail: String,
}

impl Anomaly {
    pub fn new(kind: AnomalyKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeOutcome {
    pub text: String,
    pub new_attachments: Vec<AttachedFile>,
    pub anomalies: Vec<Anomaly>,
    /// Payloads written under a fresh reference.
    pub extracted: usize,
    /// Payloads mapped onto an existing reference.
    pub reused: usize,
    pub passes: usize,
}

impl SanitizeOutcome {
    pub fn changed(&self, original: &str) -> bool {
        self.text != original
    }
}

struct PassContext<'a> {
    known: &'a [AttachedFile],
    new_attachments: Vec<AttachedFile>,
    anomalies: Vec<Anomaly>,
    seen_anomalies: BTreeSet<String>,
    extracted: usize,
    reused: usize,
}

impl PassContext<'_> {
    fn record(&mut self, kind: AnomalyKind, detail: String) {
        if self.seen_anomalies.insert(detail.clone()) {
            warn!(
                target = "application::sanitize",
                kind = ?kind,
                detail = %detail,
                "Left payload-like text in place"
            );
            self.anomalies.push(Anomaly::new(kind, detail));
        }
    }
}

pub struct Sanitizer {
    blobs: Arc<BlobStore>,
    config: SanitizerConfig,
}

impl Sanitizer {
    pub fn new(blobs: Arc<BlobStore>, config: SanitizerConfig) -> Self {
        Self { blobs, config }
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    pub fn config(&self) -> SanitizerConfig {
        self.config
    }

    /// Rewrite every inline payload in `text` to a short reference.
    ///
    /// `known` is the owning document's attachment list; identical payloads
    /// reuse its references instead of creating new records.
    pub fn sanitize(&self, text: &str, known: &[AttachedFile]) -> SanitizeOutcome {
        let mut ctx = PassContext {
            known,
            new_attachments: Vec::new(),
            anomalies: Vec::new(),
            seen_anomalies: BTreeSet::new(),
            extracted: 0,
            reused: 0,
        };

        let mut current = text.to_string();
        let mut passes = 0;
        // Each pass settles comments on its own; the cap only bounds
        // extraction chains.
        while passes < self.config.max_passes.max(1) {
            passes += 1;
            let next = self.pass(&current, &mut ctx);
            if next == current {
                break;
            }
            current = next;
        }

        for residual in DATA_URI_LITERAL.find_iter(&current) {
            ctx.record(AnomalyKind::ResidualDataUri, excerpt(residual.as_str()));
        }

        if ctx.extracted > 0 {
            counter!(METRIC_EXTRACTED).increment(ctx.extracted as u64);
        }
        if ctx.reused > 0 {
            counter!(METRIC_REUSED).increment(ctx.reused as u64);
        }
        if !ctx.anomalies.is_empty() {
            counter!(METRIC_ANOMALY).increment(ctx.anomalies.len() as u64);
        }

        debug!(
            target = "application::sanitize",
            passes,
            extracted = ctx.extracted,
            reused = ctx.reused,
            anomalies = ctx.anomalies.len(),
            "Sanitized document text"
        );

        SanitizeOutcome {
            text: current,
            new_attachments: ctx.new_attachments,
            anomalies: ctx.anomalies,
            extracted: ctx.extracted,
            reused: ctx.reused,
            passes,
        }
    }

    /// Data-URI literals in `text` whose payload is longer than the stray
    /// base64 threshold. Anything listed here must not be persisted.
    pub fn oversized_payloads(&self, text: &str) -> Vec<String> {
        let min_len = self.config.stray_base64_min_len;
        DATA_URI_LITERAL
            .find_iter(text)
            .filter(|literal| {
                literal
                    .as_str()
                    .split_once(',')
                    .is_some_and(|(_, payload)| payload.len() >= min_len)
            })
            .map(|literal| excerpt(literal.as_str()))
            .collect()
    }

    fn pass(&self, text: &str, ctx: &mut PassContext<'_>) -> String {
        let text = MARKDOWN_DATA_IMAGE.replace_all(text, |caps: &Captures<'_>| {
            let alt = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let uri = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            match self.extract(uri, alt, ctx) {
                Some(reference) => format!("![{alt}]({reference})"),
                None => caps[0].to_string(),
            }
        });

        let text = IMG_DATA_TAG.replace_all(&text, |caps: &Captures<'_>| {
            let tag = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let uri = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let alt = IMG_ALT_ATTRIBUTE
                .captures(tag)
                .and_then(|alt| alt.get(1))
                .map(|m| clean_alt(m.as_str()))
                .filter(|alt| !alt.is_empty())
                .unwrap_or_else(|| "image".to_string());
            match self.extract(uri, &alt, ctx) {
                Some(reference) => format!("![{alt}]({reference})"),
                None => tag.to_string(),
            }
        });

        let text = self.replace_bare_uris(&text, ctx);
        let text = strip_comments(&text);
        let text = self.strip_stray_base64(&text);
        EXCESS_BLANK_LINES.replace_all(&text, "\n\n\n").into_owned()
    }

    fn replace_bare_uris(&self, text: &str, ctx: &mut PassContext<'_>) -> String {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;
        for found in BARE_DATA_URI.find_iter(text) {
            // A payload cut short by a foreign character is left for the
            // residual report rather than half extracted.
            let complete = text[found.end()..].chars().next().is_none_or(|ch| {
                ch.is_whitespace() || matches!(ch, ')' | ']' | '>' | '"' | '\'' | '.' | ',' | ';')
            });
            if !complete {
                continue;
            }
            let Some(reference) = self.extract(found.as_str(), "image", ctx) else {
                continue;
            };
            let wrapped = text[..found.start()]
                .chars()
                .next_back()
                .is_some_and(|ch| matches!(ch, '(' | '"' | '\'' | '='));

            output.push_str(&text[last..found.start()]);
            if wrapped {
                output.push_str(reference.as_str());
            } else {
                output.push_str(&format!("![image]({reference})"));
            }
            last = found.end();
        }
        output.push_str(&text[last..]);
        output
    }

    /// Remove whitespace-delimited runs of base64 characters that are too long
    /// to be prose.
    fn strip_stray_base64(&self, text: &str) -> String {
        let min_len = self.config.stray_base64_min_len;
        let mut output = String::with_capacity(text.len());
        let mut token_start: Option<usize> = None;

        let flush = |output: &mut String, token: &str| {
            if is_stray_base64(token, min_len) {
                debug!(
                    target = "application::sanitize",
                    discarded = %human_size(base64_decoded_len(token.len(), token_padding(token))),
                    "Stripped stray base64 run"
                );
            } else {
                output.push_str(token);
            }
        };

        for (index, ch) in text.char_indices() {
            if ch.is_whitespace() {
                if let Some(start) = token_start.take() {
                    flush(&mut output, &text[start..index]);
                }
                output.push(ch);
            } else if token_start.is_none() {
                token_start = Some(index);
            }
        }
        if let Some(start) = token_start {
            flush(&mut output, &text[start..]);
        }
        output
    }

    fn extract(&self, uri: &str, alt: &str, ctx: &mut PassContext<'_>) -> Option<ShortRef> {
        let payload = match Payload::from_data_uri(uri) {
            Ok(payload) => payload,
            Err(err) => {
                ctx.record(
                    AnomalyKind::MalformedDataUri,
                    format!("{}: {err}", excerpt(uri)),
                );
                return None;
            }
        };
        let checksum = payload.checksum();

        if let Some(file) = ctx
            .known
            .iter()
            .find(|file| file.matches_payload(&checksum, &payload))
        {
            let reference = file.reference.clone();
            self.repair_missing_blob(file, &payload);
            ctx.reused += 1;
            return Some(reference);
        }

        if let Some(file) = ctx
            .new_attachments
            .iter()
            .find(|file| file.matches_payload(&checksum, &payload))
        {
            ctx.reused += 1;
            return Some(file.reference.clone());
        }

        let Some(interned) = self.blobs.intern(&payload, extension_for_mime(payload.mime())) else {
            ctx.record(
                AnomalyKind::ReferenceExhausted,
                format!("no free reference for {} payload", payload.mime()),
            );
            return None;
        };

        if interned.reused {
            ctx.reused += 1;
        } else {
            ctx.extracted += 1;
            debug!(
                target = "application::sanitize",
                reference = %interned.reference,
                mime = payload.mime(),
                size = %human_size(payload.len() as u64),
                "Extracted inline payload"
            );
        }

        let name = original_name(alt, &interned.reference);
        ctx.new_attachments
            .push(AttachedFile::stored(interned.reference.clone(), name, &payload));
        Some(interned.reference)
    }

    /// Put bytes back for a stored attachment whose blob went missing.
    fn repair_missing_blob(&self, file: &AttachedFile, payload: &Payload) {
        if file.source != AttachmentSource::Stored || self.blobs.contains(file.reference.as_str()) {
            return;
        }
        match self.blobs.insert(file.reference.clone(), payload.clone()) {
            Ok(_) => debug!(
                target = "application::sanitize",
                reference = %file.reference,
                "Restored missing blob from inline payload"
            ),
            Err(err) => warn!(
                target = "application::sanitize",
                reference = %file.reference,
                error = %err,
                "Failed to restore missing blob"
            ),
        }
    }
}

/// Remove comments until none remain; dropping one can join its neighbours
/// into a new one.
fn strip_comments(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let stripped = HTML_COMMENT.replace_all(&current, "").into_owned();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

fn is_stray_base64(token: &str, min_len: usize) -> bool {
    let body = token.trim_end_matches('=');
    token.len() - body.len() <= 2
        && body.len() >= min_len
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

fn token_padding(token: &str) -> usize {
    token.len() - token.trim_end_matches('=').len()
}

fn clean_alt(alt: &str) -> String {
    alt.chars()
        .filter(|ch| !matches!(ch, '[' | ']' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn original_name(alt: &str, reference: &ShortRef) -> String {
    match truncated_slug(alt, ALT_NAME_MAX_LEN) {
        Some(stem) if alt != "image" => format!("{stem}.{}", reference.extension()),
        _ => reference.to_string(),
    }
}

fn excerpt(value: &str) -> String {
    if value.len() <= ANOMALY_EXCERPT_LEN {
        return value.to_string();
    }
    let mut end = ANOMALY_EXCERPT_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &value[..end])
}

#[cfg(test)]
mod tests {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    use super::*;

    const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";
    const GIF: &str = "data:image/gif;base64,R0lGODlh";

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(Arc::new(BlobStore::new()), SanitizerConfig::default())
    }

    fn reference_in(text: &str) -> String {
        let start = text.find("](").expect("image link") + 2;
        let end = text[start..].find(')').expect("closing paren") + start;
        text[start..end].to_string()
    }

    #[test]
    fn markdown_image_is_rewritten_to_reference() {
        let sanitizer = sanitizer();
        let outcome = sanitizer.sanitize(&format!("before\n![pic]({PNG})\nafter"), &[]);

        let reference = reference_in(&outcome.text);
        assert!(ShortRef::looks_like(&reference), "{reference}");
        assert!(reference.ends_with(".png"));
        assert_eq!(outcome.text, format!("before\n![pic]({reference})\nafter"));
        assert_eq!(outcome.extracted, 1);
        assert_eq!(outcome.new_attachments.len(), 1);
        assert_eq!(outcome.new_attachments[0].original_name, "pic.png");
        assert!(sanitizer.blobs().contains(&reference));
    }

    #[test]
    fn legacy_full_data_comment_is_consumed() {
        let sanitizer = sanitizer();
        let text = format!("![pic]({PNG})\n<!-- FULL_DATA:{PNG} -->\nnext");
        let outcome = sanitizer.sanitize(&text, &[]);

        let reference = reference_in(&outcome.text);
        assert_eq!(outcome.text, format!("![pic]({reference})\nnext"));
        assert_eq!(sanitizer.blobs().len(), 1);
    }

    #[test]
    fn img_tags_become_markdown_images_with_alt() {
        let sanitizer = sanitizer();
        let text = format!(r#"<img class="x" src="{GIF}" alt="A [tiny] gif">"#);
        let outcome = sanitizer.sanitize(&text, &[]);

        let reference = reference_in(&outcome.text);
        assert_eq!(outcome.text, format!("![A tiny gif]({reference})"));
        assert!(reference.ends_with(".gif"));
    }

    #[test]
    fn img_tags_without_alt_use_default() {
        let outcome = sanitizer().sanitize(&format!("<IMG SRC='{GIF}'>"), &[]);
        assert!(outcome.text.starts_with("![image]("), "{}", outcome.text);
        assert!(ShortRef::looks_like(&outcome.new_attachments[0].original_name));
    }

    #[test]
    fn bare_data_uris_are_wrapped() {
        let outcome = sanitizer().sanitize(&format!("look: {PNG} done"), &[]);
        let reference = reference_in(&outcome.text);
        assert_eq!(outcome.text, format!("look: ![image]({reference}) done"));
    }

    fn large_png_uri() -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(vec![7_u8; 3000]))
    }

    #[test]
    fn wrapped_data_uris_are_swapped_for_references() {
        let uri = large_png_uri();

        let sanitizer = sanitizer();
        let outcome = sanitizer.sanitize(&format!("see ({uri}) here"), &[]);
        let reference = outcome.new_attachments[0].reference.to_string();
        assert_eq!(outcome.text, format!("see ({reference}) here"));

        let outcome = sanitizer.sanitize(&format!("[download]({uri})"), &[]);
        assert_eq!(outcome.text, format!("[download]({reference})"));

        let outcome = sanitizer.sanitize(&format!("<img src={uri}>"), &[]);
        assert_eq!(outcome.text, format!("![image]({reference})"));

        assert_eq!(sanitizer.blobs().len(), 1);
    }

    #[test]
    fn truncated_payloads_are_not_half_extracted() {
        let text = "x data:image/png;base64,iVBORw0K@@@@ y";
        let outcome = sanitizer().sanitize(text, &[]);

        assert_eq!(outcome.text, text);
        assert_eq!(outcome.extracted, 0);
        assert!(
            outcome
                .anomalies
                .iter()
                .any(|anomaly| anomaly.kind == AnomalyKind::ResidualDataUri)
        );
    }

    #[test]
    fn prose_mentioning_data_is_not_an_anomaly() {
        let text = "Raw data: 42\nmetadata:image/png,x";
        let outcome = sanitizer().sanitize(text, &[]);
        assert_eq!(outcome.text, text);
        assert!(outcome.anomalies.is_empty(), "{:?}", outcome.anomalies);
    }

    #[test]
    fn nested_comments_settle_within_one_pass() {
        let nested = (0..6).fold("<!--x-->".to_string(), |inner, _| format!("<!{inner}--x-->"));
        let sanitizer = Sanitizer::new(
            Arc::new(BlobStore::new()),
            SanitizerConfig {
                stray_base64_min_len: DEFAULT_STRAY_BASE64_MIN_LEN,
                max_passes: 1,
            },
        );

        let first = sanitizer.sanitize(&format!("a {nested} b"), &[]);
        assert_eq!(first.text, "a  b");
        let second = sanitizer.sanitize(&first.text, &[]);
        assert_eq!(second.text, first.text);
    }

    #[test]
    fn oversized_payloads_are_listed() {
        let sanitizer = sanitizer();
        let long = format!("data:image/png;base64,{}@", "A".repeat(300));
        assert_eq!(sanitizer.oversized_payloads(&format!("x {long} y")).len(), 1);
        assert!(sanitizer.oversized_payloads(&format!("x {PNG} y")).is_empty());
        assert!(sanitizer.oversized_payloads("Raw data: 42").is_empty());
    }

    #[test]
    fn same_payload_is_extracted_once() {
        let sanitizer = sanitizer();
        let text = format!("![a]({PNG})\n\n![b]({PNG})\n\n{PNG}");
        let outcome = sanitizer.sanitize(&text, &[]);

        assert_eq!(outcome.extracted, 1);
        assert_eq!(outcome.reused, 2);
        assert_eq!(outcome.new_attachments.len(), 1);
        assert_eq!(sanitizer.blobs().len(), 1);
    }

    #[test]
    fn known_attachments_are_reused() {
        let sanitizer = sanitizer();
        let payload = Payload::from_data_uri(PNG).expect("payload");
        let reference = ShortRef::parse("kn0wn1.png").expect("reference");
        let known = vec![AttachedFile::stored(reference.clone(), "known.png", &payload)];

        let outcome = sanitizer.sanitize(&format!("![x]({PNG})"), &known);

        assert_eq!(outcome.text, "![x](kn0wn1.png)");
        assert!(outcome.new_attachments.is_empty());
        assert_eq!(outcome.reused, 1);
        assert!(sanitizer.blobs().contains(reference.as_str()));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let sanitizer = sanitizer();
        let first = sanitizer.sanitize(&format!("# T\n\n![pic]({PNG})\n*cap*\n"), &[]);
        let second = sanitizer.sanitize(&first.text, &first.new_attachments);

        assert_eq!(second.text, first.text);
        assert!(second.new_attachments.is_empty());
        assert_eq!(second.extracted, 0);
    }

    #[test]
    fn malformed_uris_are_left_in_place() {
        let text = "![broken](data:image/png;base64,@@@@)";
        let outcome = sanitizer().sanitize(text, &[]);

        assert_eq!(outcome.text, text);
        assert!(
            outcome
                .anomalies
                .iter()
                .any(|anomaly| anomaly.kind == AnomalyKind::MalformedDataUri)
        );
        assert!(outcome.new_attachments.is_empty());
    }

    #[test]
    fn comments_and_stray_base64_are_stripped() {
        let sanitizer = Sanitizer::new(
            Arc::new(BlobStore::new()),
            SanitizerConfig {
                stray_base64_min_len: 20,
                max_passes: 4,
            },
        );
        let stray = "QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVo=";
        let text = format!("keep <!-- gone --> this\n{stray}\nand https://example.com/a");
        let outcome = sanitizer.sanitize(&text, &[]);

        assert_eq!(outcome.text, "keep  this\n\nand https://example.com/a");
    }

    #[test]
    fn excess_blank_lines_collapse_to_two() {
        let outcome = sanitizer().sanitize("a\n\n\n\n\n\nb\n\n\nc", &[]);
        assert_eq!(outcome.text, "a\n\n\nb\n\n\nc");
    }

    #[test]
    fn short_references_are_untouched() {
        let text = "![pic](abc123.png)\n*caption*\n\nSee [site|example.com].";
        let outcome = sanitizer().sanitize(text, &[]);
        assert_eq!(outcome.text, text);
        assert!(!outcome.changed(text));
        assert_eq!(outcome.passes, 1);
    }
}
