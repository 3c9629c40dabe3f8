//! Typed content blocks produced by the block parser.
//!
//! Blocks are derived from the document text on every parse and are never
//! persisted on their own; the text stays the single source of truth.

use serde::{Deserialize, Serialize};

use super::polls::PollDefinition;

/// Inline span produced by the inline formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InlineSpan {
    Text(String),
    Link { text: String, url: String },
    BoldItalic(String),
    Bold(String),
    Italic(String),
    Underline(String),
}

impl InlineSpan {
    /// Visible text of the span, without markup.
    pub fn text(&self) -> &str {
        match self {
            InlineSpan::Text(text)
            | InlineSpan::BoldItalic(text)
            | InlineSpan::Bold(text)
            | InlineSpan::Italic(text)
            | InlineSpan::Underline(text) => text,
            InlineSpan::Link { text, .. } => text,
        }
    }
}

/// Formatted text: an ordered run of inline spans.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormattedText {
    spans: Vec<InlineSpan>,
}

impl FormattedText {
    /// Build from spans, merging adjacent text runs and dropping empty ones.
    pub fn from_spans(spans: impl IntoIterator<Item = InlineSpan>) -> Self {
        let mut merged: Vec<InlineSpan> = Vec::new();
        for span in spans {
            match span {
                InlineSpan::Text(text) if text.is_empty() => {}
                InlineSpan::Text(text) => match merged.last_mut() {
                    Some(InlineSpan::Text(previous)) => previous.push_str(&text),
                    _ => merged.push(InlineSpan::Text(text)),
                },
                other => merged.push(other),
            }
        }
        Self { spans: merged }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::from_spans([InlineSpan::Text(text.into())])
    }

    pub fn spans(&self) -> &[InlineSpan] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Concatenated visible text.
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(InlineSpan::text).collect()
    }

    /// Link targets in order of appearance.
    pub fn links(&self) -> impl Iterator<Item = &str> {
        self.spans.iter().filter_map(|span| match span {
            InlineSpan::Link { url, .. } => Some(url.as_str()),
            _ => None,
        })
    }
}

/// Bullet variant of a list item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletStyle {
    Filled,
    Hollow,
}

/// Layout width requested by an image's `{width=...}` modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidthMode {
    #[default]
    Normal,
    Wide,
    Full,
}

impl WidthMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "wide" => Some(Self::Wide),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Wide => "wide",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub alt: String,
    pub reference: String,
    pub caption: Option<String>,
    pub width: WidthMode,
}

/// Kinds of media directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Youtube,
    Spotify,
    Video,
    Audio,
    Pdf,
    File,
}

impl MediaKind {
    pub fn directive(self) -> &'static str {
        match self {
            Self::Youtube => "YOUTUBE",
            Self::Spotify => "SPOTIFY",
            Self::Video => "VIDEO",
            Self::Audio => "AUDIO",
            Self::Pdf => "PDF",
            Self::File => "FILE",
        }
    }

    pub fn from_directive(name: &str) -> Option<Self> {
        match name {
            "YOUTUBE" => Some(Self::Youtube),
            "SPOTIFY" => Some(Self::Spotify),
            "VIDEO" => Some(Self::Video),
            "AUDIO" => Some(Self::Audio),
            "PDF" => Some(Self::Pdf),
            "FILE" => Some(Self::File),
            _ => None,
        }
    }

    /// Whether the reference points at a remote streaming service rather than a
    /// stored payload.
    pub fn is_remote_service(self) -> bool {
        matches!(self, Self::Youtube | Self::Spotify)
    }
}

/// Embedded media reference.
///
/// For YouTube the reference is the video id; for Spotify it is the
/// `<kind>/<id>` path (`track/4uLU6h...`). All other kinds carry the raw
/// reference or URL as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEmbed {
    pub kind: MediaKind,
    pub reference: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading { level: u8, text: FormattedText },
    Paragraph { text: FormattedText },
    ListItem { style: BulletStyle, text: FormattedText },
    BlockQuote { text: FormattedText },
    Divider,
    CodeBlock { language: Option<String>, lines: Vec<String> },
    Image(ImageBlock),
    Poll(PollDefinition),
    MediaEmbed(MediaEmbed),
    HtmlPassthrough { html: String },
}

impl Block {
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Heading { .. } => "heading",
            Block::Paragraph { .. } => "paragraph",
            Block::ListItem { .. } => "list_item",
            Block::BlockQuote { .. } => "block_quote",
            Block::Divider => "divider",
            Block::CodeBlock { .. } => "code_block",
            Block::Image(_) => "image",
            Block::Poll(_) => "poll",
            Block::MediaEmbed(_) => "media_embed",
            Block::HtmlPassthrough { .. } => "html_passthrough",
        }
    }

    /// Formatted text carried by text-bearing blocks.
    pub fn text(&self) -> Option<&FormattedText> {
        match self {
            Block::Heading { text, .. }
            | Block::Paragraph { text }
            | Block::ListItem { text, .. }
            | Block::BlockQuote { text } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_text_merges_adjacent_text() {
        let text = FormattedText::from_spans([
            InlineSpan::Text("a".into()),
            InlineSpan::Text(String::new()),
            InlineSpan::Text("b".into()),
            InlineSpan::Bold("c".into()),
        ]);
        assert_eq!(
            text.spans(),
            &[InlineSpan::Text("ab".into()), InlineSpan::Bold("c".into())]
        );
        assert_eq!(text.plain_text(), "abc");
    }

    #[test]
    fn block_serializes_with_type_tag() {
        let block = Block::Image(ImageBlock {
            alt: "pic".into(),
            reference: "abc123.png".into(),
            caption: Some("a cat".into()),
            width: WidthMode::Wide,
        });
        let value = serde_json::to_value(&block).expect("serialize");
        assert_eq!(value["type"], "image");
        assert_eq!(value["width"], "wide");
        assert_eq!(value["caption"], "a cat");
    }

    #[test]
    fn media_directive_names_round_trip() {
        for kind in [
            MediaKind::Youtube,
            MediaKind::Spotify,
            MediaKind::Video,
            MediaKind::Audio,
            MediaKind::Pdf,
            MediaKind::File,
        ] {
            assert_eq!(MediaKind::from_directive(kind.directive()), Some(kind));
        }
        assert_eq!(MediaKind::from_directive("youtube"), None);
    }
}
