//! Line-oriented block parser.
//!
//! The parser walks the text once, top to bottom, and yields blocks lazily.
//! Each line is classified by the first rule that matches; only fenced code
//! and image captions look beyond the current line. Parsing holds no shared
//! state, so parsing the same text twice yields the same blocks.

use std::iter::{Enumerate, Peekable};
use std::str::Lines;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::config::{clean_passthrough, starts_with_passthrough_tag};
use super::directives::{spotify_path, youtube_id};
use super::inline;
use crate::application::render::types::SpannedBlock;
use crate::domain::blocks::{Block, BulletStyle, ImageBlock, MediaEmbed, MediaKind, WidthMode};
use crate::domain::polls::{PollDefinition, PollId};

const FENCE: &str = "```";

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,3})\s+(.*)$").expect("heading regex must compile"));

static POLL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[POLL:([^\]]*)\]").expect("poll regex must compile"));

static MEDIA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(YOUTUBE|SPOTIFY|VIDEO|AUDIO|PDF|FILE):([^\]]+)\](?:\(([^)]*)\))?")
        .expect("media regex must compile")
});

static IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*!\[([^\]]*)\]\(([^)\s]+)\)(?:\{width=(normal|wide|full)\})?\s*$")
        .expect("image regex must compile")
});

static CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*(.+)\*$").expect("caption regex must compile"));

const HOLLOW_BULLETS: &[&str] = &["-- ", "◦ ", "○ "];
const FILLED_BULLETS: &[&str] = &["- ", "• ", "* "];

/// Directive that was recognised but could not be turned into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub line: usize,
    pub message: String,
}

pub struct BlockParser<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
    diagnostics: Vec<ParseDiagnostic>,
}

impl<'a> BlockParser<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate().peekable(),
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[ParseDiagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<ParseDiagnostic> {
        self.diagnostics
    }

    fn diagnose(&mut self, line: usize, message: String) {
        warn!(
            target = "application::render::parser",
            line,
            message = %message,
            "Directive rendered as plain text"
        );
        self.diagnostics.push(ParseDiagnostic { line, message });
    }

    fn code_block(&mut self, line: usize, language: Option<String>) -> SpannedBlock {
        let mut lines = Vec::new();
        let mut end_line = line;
        for (index, raw) in self.lines.by_ref() {
            end_line = index + 1;
            if raw.trim() == FENCE {
                break;
            }
            lines.push(raw.to_string());
        }
        SpannedBlock {
            line,
            end_line,
            block: Block::CodeBlock { language, lines },
        }
    }

    fn image(&mut self, line: usize, raw: &str) -> Option<SpannedBlock> {
        let caps = IMAGE.captures(raw)?;
        let alt = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let reference = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let width = caps
            .get(3)
            .and_then(|m| WidthMode::parse(m.as_str()))
            .unwrap_or_default();

        let mut end_line = line;
        let caption = match self.lines.peek() {
            Some((index, next)) => match caption_of(next) {
                Some(caption) => {
                    end_line = index + 1;
                    Some(caption)
                }
                None => None,
            },
            None => None,
        };
        if caption.is_some() {
            self.lines.next();
        }

        Some(SpannedBlock {
            line,
            end_line,
            block: Block::Image(ImageBlock {
                alt: alt.to_string(),
                reference: reference.to_string(),
                caption,
                width,
            }),
        })
    }

    fn poll(&mut self, line: usize, raw: &str) -> Option<Block> {
        let caps = POLL.captures(raw)?;
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let mut parts = body.split('|').map(str::trim);
        let question = parts.next().unwrap_or_default();
        let options: Vec<String> = parts
            .filter(|option| !option.is_empty())
            .map(str::to_string)
            .collect();

        if question.is_empty() || options.len() < 2 {
            self.diagnose(
                line,
                format!("poll needs a question and at least two options: `{body}`"),
            );
            return None;
        }

        Some(Block::Poll(PollDefinition {
            id: PollId::derive(question, line),
            question: question.to_string(),
            options,
        }))
    }

    fn media(&mut self, line: usize, raw: &str) -> Option<Block> {
        let caps = MEDIA.captures(raw)?;
        let kind = caps
            .get(1)
            .and_then(|m| MediaKind::from_directive(m.as_str()))?;
        let argument = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        let display_name = caps
            .get(3)
            .map(|m| m.as_str().trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let reference = match kind {
            MediaKind::Youtube => youtube_id(argument),
            MediaKind::Spotify => spotify_path(argument),
            _ => (!argument.is_empty()).then(|| argument.to_string()),
        };
        let Some(reference) = reference else {
            self.diagnose(
                line,
                format!("unrecognised {} reference `{argument}`", kind.directive()),
            );
            return None;
        };

        Some(Block::MediaEmbed(MediaEmbed {
            kind,
            reference,
            display_name,
        }))
    }
}

impl Iterator for BlockParser<'_> {
    type Item = SpannedBlock;

    fn next(&mut self) -> Option<SpannedBlock> {
        loop {
            let (index, raw) = self.lines.next()?;
            let line = index + 1;
            let trimmed = raw.trim();

            if let Some(info) = raw.trim_start().strip_prefix(FENCE) {
                let language = info.trim_start_matches('`').trim();
                let language = (!language.is_empty()).then(|| language.to_string());
                return Some(self.code_block(line, language));
            }

            if trimmed.is_empty() {
                continue;
            }

            let single = |block: Block| SpannedBlock {
                line,
                end_line: line,
                block,
            };

            if let Some(caps) = HEADING.captures(raw) {
                let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1) as u8;
                let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
                return Some(single(Block::Heading {
                    level,
                    text: inline::format(text),
                }));
            }

            if trimmed == "---" || trimmed == "___" {
                return Some(single(Block::Divider));
            }

            if let Some(block) = self.poll(line, raw) {
                return Some(single(block));
            }

            if let Some(block) = self.media(line, raw) {
                return Some(single(block));
            }

            if let Some(spanned) = self.image(line, raw) {
                return Some(spanned);
            }

            if let Some((style, text)) = list_item(raw) {
                return Some(single(Block::ListItem {
                    style,
                    text: inline::format(text),
                }));
            }

            if let Some(text) = block_quote(raw) {
                return Some(single(Block::BlockQuote {
                    text: inline::format(text),
                }));
            }

            if starts_with_passthrough_tag(raw) {
                let html = clean_passthrough(trimmed);
                if !html.trim().is_empty() {
                    return Some(single(Block::HtmlPassthrough { html }));
                }
            }

            return Some(single(Block::Paragraph {
                text: inline::format(trimmed),
            }));
        }
    }
}

/// Parse `text` into blocks.
pub fn parse(text: &str) -> impl Iterator<Item = Block> + '_ {
    BlockParser::new(text).map(|spanned| spanned.block)
}

fn caption_of(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.starts_with("**") {
        return None;
    }
    CAPTION
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|caption| !caption.is_empty())
}

fn list_item(raw: &str) -> Option<(BulletStyle, &str)> {
    let line = raw.trim_start();
    HOLLOW_BULLETS
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(|rest| (BulletStyle::Hollow, rest.trim()))
        .or_else(|| {
            FILLED_BULLETS
                .iter()
                .find_map(|prefix| line.strip_prefix(prefix))
                .map(|rest| (BulletStyle::Filled, rest.trim()))
        })
}

fn block_quote(raw: &str) -> Option<&str> {
    let line = raw.trim_start();
    if line == ">" {
        return Some("");
    }
    line.strip_prefix("> ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::blocks::{FormattedText, InlineSpan};

    fn blocks(text: &str) -> Vec<Block> {
        parse(text).collect()
    }

    fn paragraph(text: &str) -> Block {
        Block::Paragraph {
            text: FormattedText::plain(text),
        }
    }

    #[test]
    fn parse_is_total_on_degenerate_input() {
        assert!(blocks("").is_empty());
        assert!(blocks("\n\n  \n").is_empty());
        assert_eq!(
            blocks("```"),
            vec![Block::CodeBlock {
                language: None,
                lines: vec![]
            }]
        );
        assert_eq!(
            blocks("``````"),
            vec![Block::CodeBlock {
                language: None,
                lines: vec![]
            }]
        );
        assert_eq!(blocks("`"), vec![paragraph("`")]);
    }

    #[test]
    fn unterminated_fence_consumes_the_rest() {
        let parsed = blocks("intro\n```rust\nfn a() {}\n\n# not a heading");
        assert_eq!(
            parsed,
            vec![
                paragraph("intro"),
                Block::CodeBlock {
                    language: Some("rust".into()),
                    lines: vec!["fn a() {}".into(), String::new(), "# not a heading".into()],
                },
            ]
        );
    }

    #[test]
    fn fence_closes_on_bare_backticks() {
        let parsed: Vec<_> = BlockParser::new("```\n- a\n```\n- b").collect();
        assert_eq!(parsed[0].line, 1);
        assert_eq!(parsed[0].end_line, 3);
        assert_eq!(
            parsed[0].block,
            Block::CodeBlock {
                language: None,
                lines: vec!["- a".into()]
            }
        );
        assert_eq!(parsed[1].block.kind(), "list_item");
    }

    #[test]
    fn image_consumes_following_caption() {
        let parsed: Vec<_> = BlockParser::new("![a](r)\n*cap*\n").collect();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].end_line, 2);
        assert_eq!(
            parsed[0].block,
            Block::Image(ImageBlock {
                alt: "a".into(),
                reference: "r".into(),
                caption: Some("cap".into()),
                width: WidthMode::Normal,
            })
        );
    }

    #[test]
    fn caption_without_image_is_a_paragraph() {
        let parsed = blocks("text\n*cap*");
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[1],
            Block::Paragraph {
                text: FormattedText::from_spans([InlineSpan::Italic("cap".into())])
            }
        );
    }

    #[test]
    fn caption_must_immediately_follow() {
        let parsed = blocks("![a](r)\n\n*cap*");
        assert_eq!(parsed.len(), 2);
        assert!(matches!(&parsed[0], Block::Image(image) if image.caption.is_none()));
    }

    #[test]
    fn image_width_modifier_is_parsed() {
        let parsed = blocks("![wide shot](abc123.jpg){width=full}");
        assert!(matches!(&parsed[0], Block::Image(image) if image.width == WidthMode::Full));
    }

    #[test]
    fn bullets_distinguish_filled_and_hollow() {
        let parsed = blocks("- x\n-- y\n• z\n◦ w");
        let styles: Vec<_> = parsed
            .iter()
            .map(|block| match block {
                Block::ListItem { style, text } => (*style, text.plain_text()),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            styles,
            vec![
                (BulletStyle::Filled, "x".to_string()),
                (BulletStyle::Hollow, "y".to_string()),
                (BulletStyle::Filled, "z".to_string()),
                (BulletStyle::Hollow, "w".to_string()),
            ]
        );
    }

    #[test]
    fn headings_dividers_and_quotes() {
        let parsed = blocks("# One\n### Three\n#### Four\n---\n> quoted");
        assert!(matches!(&parsed[0], Block::Heading { level: 1, .. }));
        assert!(matches!(&parsed[1], Block::Heading { level: 3, .. }));
        assert_eq!(parsed[2], paragraph("#### Four"));
        assert_eq!(parsed[3], Block::Divider);
        assert_eq!(
            parsed[4],
            Block::BlockQuote {
                text: FormattedText::plain("quoted")
            }
        );
    }

    #[test]
    fn polls_get_position_derived_ids() {
        let text = "intro\n[POLL:Tea or coffee?|Tea|Coffee]";
        let first = blocks(text);
        let second = blocks(text);
        assert_eq!(first, second);
        match &first[1] {
            Block::Poll(poll) => {
                assert_eq!(poll.id.as_str(), "poll-tea-or-coffee-2");
                assert_eq!(poll.options, vec!["Tea".to_string(), "Coffee".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_poll_falls_back_to_paragraph() {
        let mut parser = BlockParser::new("[POLL:Only one|A]");
        let parsed: Vec<_> = parser.by_ref().collect();
        assert_eq!(parsed[0].block.kind(), "paragraph");
        assert_eq!(parser.diagnostics().len(), 1);
        assert_eq!(parser.diagnostics()[0].line, 1);
    }

    #[test]
    fn media_directives_extract_references() {
        let parsed = blocks(concat!(
            "[YOUTUBE:https://youtu.be/dQw4w9WgXcQ]\n",
            "[SPOTIFY:https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC]\n",
            "[FILE:abc123.pdf](Annual report)\n",
            "[YOUTUBE:https://vimeo.com/1]",
        ));
        assert_eq!(
            parsed[0],
            Block::MediaEmbed(MediaEmbed {
                kind: MediaKind::Youtube,
                reference: "dQw4w9WgXcQ".into(),
                display_name: None,
            })
        );
        assert!(
            matches!(&parsed[1], Block::MediaEmbed(embed) if embed.reference == "track/4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            parsed[2],
            Block::MediaEmbed(MediaEmbed {
                kind: MediaKind::File,
                reference: "abc123.pdf".into(),
                display_name: Some("Annual report".into()),
            })
        );
        assert_eq!(parsed[3].kind(), "paragraph");
    }

    #[test]
    fn safelisted_inline_html_passes_through() {
        let parsed = blocks("<mark>hot</mark> take\n<div>block</div>");
        assert_eq!(
            parsed[0],
            Block::HtmlPassthrough {
                html: "<mark>hot</mark> take".into()
            }
        );
        assert_eq!(parsed[1].kind(), "paragraph");
    }
}
