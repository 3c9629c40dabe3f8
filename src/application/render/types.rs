use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::application::polls::PollView;
use crate::application::resolve::ResolvedReference;
use crate::application::sanitize::Anomaly;
use crate::application::titles::{TitleKey, TitleState};
use crate::domain::attachments::AttachedFile;
use crate::domain::blocks::Block;
use crate::domain::polls::VoterId;

/// Rendering request passed into the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderRequest {
    /// Raw document text as typed in the editor.
    pub text: String,
    /// Attachments already owned by the document.
    pub attachments: Vec<AttachedFile>,
    /// Voter whose ballot state should be attached to poll blocks.
    pub voter: Option<VoterId>,
}

impl RenderRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachedFile>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_voter(mut self, voter: VoterId) -> Self {
        self.voter = Some(voter);
        self
    }
}

/// A block together with the 1-based source lines it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpannedBlock {
    pub line: usize,
    pub end_line: usize,
    #[serde(flatten)]
    pub block: Block,
}

/// Heading entry with its anchor slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlineEntry {
    pub level: u8,
    pub text: String,
    pub anchor: String,
    pub line: usize,
}

/// Heading text that occurs more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateHeading {
    pub text: String,
    pub lines: Vec<usize>,
}

/// Title state for the embed starting on `line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedTitle {
    pub line: usize,
    pub key: TitleKey,
    pub state: TitleState,
}

/// Content-level metrics surfaced alongside the blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ContentMetrics {
    pub blocks_count: u32,
    pub headings_count: u32,
    pub images_count: u32,
    pub images_missing_alt: u32,
    pub placeholders_count: u32,
    pub code_blocks_count: u32,
    pub polls_count: u32,
    pub embeds_count: u32,
    pub links_count: u32,
}

/// Result of one sanitize-then-parse run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RenderOutput {
    /// Sanitized document text the blocks were parsed from.
    pub text: String,
    pub blocks: Vec<SpannedBlock>,
    /// Attachments created by this run; the caller appends them to the document.
    pub new_attachments: Vec<AttachedFile>,
    pub anomalies: Vec<Anomaly>,
    /// Image and media references keyed as written in the text.
    pub references: BTreeMap<String, ResolvedReference>,
    pub polls: Vec<PollView>,
    pub titles: Vec<EmbedTitle>,
    pub outline: Vec<OutlineEntry>,
    pub duplicate_headings: Vec<DuplicateHeading>,
    pub metrics: ContentMetrics,
}

impl RenderOutput {
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().map(|spanned| &spanned.block)
    }

    pub fn title_at(&self, line: usize) -> Option<&TitleState> {
        self.titles
            .iter()
            .find(|title| title.line == line)
            .map(|title| &title.state)
    }

    pub fn anchor_at(&self, line: usize) -> Option<&str> {
        self.outline
            .iter()
            .find(|entry| entry.line == line)
            .map(|entry| entry.anchor.as_str())
    }
}

/// Errors from projecting blocks into HTML.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
}

/// Sanitize-and-parse pipeline. Implementations never fail: malformed input
/// degrades to literal text, placeholders and anomalies.
pub trait RenderService: Send + Sync {
    fn render(&self, request: &RenderRequest) -> RenderOutput;
}
