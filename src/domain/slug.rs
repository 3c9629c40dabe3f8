//! Slugs for heading anchors, poll ids and attachment names.
//!
//! Non-ASCII Han characters are spelled out in pinyin before `slug` folds the
//! text, so “基线对齐” becomes `ji-xian-dui-qi`. Every slug here is a pure
//! function of its input; anchors and poll ids must be reproducible from the
//! document text alone.

use std::collections::HashSet;

use pinyin::ToPinyin;
use slug::slugify;
use thiserror::Error;

const FALLBACK_ANCHOR: &str = "section";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("nothing to slugify")]
    EmptyInput,
    #[error("`{input}` has no characters a slug can carry")]
    Unrepresentable { input: String },
}

/// Lowercase, hyphen-separated ASCII form of `input`.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    match slugify(spell_out(input)) {
        slug if slug.is_empty() => Err(SlugError::Unrepresentable {
            input: input.to_string(),
        }),
        slug => Ok(slug),
    }
}

/// [`derive_slug`] capped at `max_len` bytes, dropping any partial trailing
/// word. `None` when nothing representable remains.
pub fn truncated_slug(input: &str, max_len: usize) -> Option<String> {
    let slug = derive_slug(input).ok()?;
    if slug.len() <= max_len {
        return Some(slug);
    }

    let mut kept = String::with_capacity(max_len);
    for word in slug.split('-') {
        let extra = if kept.is_empty() { word.len() } else { word.len() + 1 };
        if kept.len() + extra > max_len {
            break;
        }
        if !kept.is_empty() {
            kept.push('-');
        }
        kept.push_str(word);
    }

    if kept.is_empty() {
        // A single word longer than the cap; ASCII, so slicing by byte is fine.
        kept.push_str(&slug[..max_len]);
    }
    Some(kept)
}

/// Hands out anchors that are unique within one document.
///
/// Repeats get `-2`, `-3` and so on; a suffix is skipped when an earlier
/// heading already produced that exact anchor.
#[derive(Debug, Default)]
pub struct AnchorSlugger {
    taken: HashSet<String>,
}

impl AnchorSlugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor_for(&mut self, heading: &str) -> String {
        let base = derive_slug(heading).unwrap_or_else(|_| FALLBACK_ANCHOR.to_string());
        if self.taken.insert(base.clone()) {
            return base;
        }

        let anchor = (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !self.taken.contains(candidate))
            .unwrap_or(base);
        self.taken.insert(anchor.clone());
        anchor
    }
}

/// Replace Han characters with space-separated pinyin; everything else is
/// left for `slugify` to fold or drop.
fn spell_out(input: &str) -> String {
    input
        .chars()
        .fold(String::with_capacity(input.len()), |mut out, ch| {
            match ch.to_pinyin() {
                Some(syllable) if !ch.is_ascii() => {
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                    out.push_str(syllable.plain());
                    out.push(' ');
                }
                _ => out.push(ch),
            }
            out
        })
}
