//! Inline formatting: links, autolinks and emphasis.
//!
//! Rules run in a fixed order over the text that earlier rules left
//! untouched, so a URL turned into a link is never re-scanned for emphasis
//! and bold markers are never matched across an already emitted span.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::domain::blocks::{FormattedText, InlineSpan};

static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\[\]|\n]+)\|([^\[\]\s|]+)\]|\[([^\[\]\n]+)\]\(([^()\s]+)\)")
        .expect("link regex must compile")
});

static AUTOLINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:https?://[^\s<>()\[\]]+",
        r"|(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+",
        r"(?:com|org|net|io|dev|app|edu|gov|co|uk|de|fr|nl|me|info|blog|xyz|ai|tv|fm)\b",
        r"(?:/[^\s<>()\[\]]*)?)"
    ))
    .expect("autolink regex must compile")
});

static BOLD_ITALIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*\*(.+?)\*\*\*").expect("bold-italic regex must compile"));

static BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold regex must compile"));

static ITALIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*([^*\s](?:[^*]*?[^*\s])?)\*").expect("italic regex must compile")
});

static UNDERLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b_([^_\n]+?)_\b").expect("underline regex must compile"));

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"'];
const UNSAFE_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:", "file:"];

enum Segment {
    Text(String),
    Span(InlineSpan),
}

/// Format a single span of text.
pub fn format(span: &str) -> FormattedText {
    let segments = vec![Segment::Text(span.to_string())];

    let segments = split_with(segments, &LINK, |before, caps| {
        if before.ends_with('!') {
            return None;
        }
        let (text, url) = match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
            (Some(text), Some(url), _, _) | (_, _, Some(text), Some(url)) => {
                (text.as_str(), url.as_str())
            }
            _ => return None,
        };
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let url = normalize_url(url)?;
        Some(InlineSpan::Link {
            text: text.to_string(),
            url,
        })
    });

    let segments = split_trimmed(segments, &AUTOLINK, |before, matched| {
        if before.ends_with('@') {
            return None;
        }
        let url = normalize_url(matched)?;
        Some(InlineSpan::Link {
            text: matched.to_string(),
            url,
        })
    });

    let segments = split_with(segments, &BOLD_ITALIC, |_, caps| {
        Some(InlineSpan::BoldItalic(caps[1].to_string()))
    });
    let segments = split_with(segments, &BOLD, |_, caps| {
        Some(InlineSpan::Bold(caps[1].to_string()))
    });
    let segments = split_with(segments, &ITALIC, |_, caps| {
        Some(InlineSpan::Italic(caps[1].to_string()))
    });
    let segments = split_with(segments, &UNDERLINE, |_, caps| {
        Some(InlineSpan::Underline(caps[1].to_string()))
    });

    FormattedText::from_spans(segments.into_iter().map(|segment| match segment {
        Segment::Text(text) => InlineSpan::Text(text),
        Segment::Span(span) => span,
    }))
}

/// Prefix scheme-less URLs with `https://`; reject script-capable schemes.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    let lower = url.to_ascii_lowercase();
    if UNSAFE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        return None;
    }
    if lower.contains("://")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || url.starts_with('/')
        || url.starts_with('#')
    {
        return Some(url.to_string());
    }
    Some(format!("https://{url}"))
}

/// Whether a URL may be placed in an `href` or `src` attribute.
pub fn is_safe_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.starts_with("https://")
        || lower.starts_with("http://")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with('/')
        || lower.starts_with('#')
}

/// Replace matches of `regex` inside text segments with the span `build`
/// returns; `None` leaves the match as literal text.
fn split_with(
    segments: Vec<Segment>,
    regex: &Regex,
    mut build: impl FnMut(&str, &Captures<'_>) -> Option<InlineSpan>,
) -> Vec<Segment> {
    let mut output = Vec::with_capacity(segments.len());
    for segment in segments {
        let text = match segment {
            Segment::Text(text) => text,
            span @ Segment::Span(_) => {
                output.push(span);
                continue;
            }
        };

        let mut last = 0;
        for caps in regex.captures_iter(&text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let Some(span) = build(&text[..whole.start()], &caps) else {
                continue;
            };
            if whole.start() > last {
                output.push(Segment::Text(text[last..whole.start()].to_string()));
            }
            output.push(Segment::Span(span));
            last = whole.end();
        }
        if last < text.len() {
            output.push(Segment::Text(text[last..].to_string()));
        }
    }
    output
}

/// Like [`split_with`], but trailing sentence punctuation is left outside
/// the emitted span.
fn split_trimmed(
    segments: Vec<Segment>,
    regex: &Regex,
    mut build: impl FnMut(&str, &str) -> Option<InlineSpan>,
) -> Vec<Segment> {
    let mut output = Vec::with_capacity(segments.len());
    for segment in segments {
        let text = match segment {
            Segment::Text(text) => text,
            span @ Segment::Span(_) => {
                output.push(span);
                continue;
            }
        };

        let mut last = 0;
        for found in regex.find_iter(&text) {
            let matched = found.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            if matched.is_empty() {
                continue;
            }
            let Some(span) = build(&text[..found.start()], matched) else {
                continue;
            };
            if found.start() > last {
                output.push(Segment::Text(text[last..found.start()].to_string()));
            }
            output.push(Segment::Span(span));
            last = found.start() + matched.len();
        }
        if last < text.len() {
            output.push(Segment::Text(text[last..].to_string()));
        }
    }
    output
}
