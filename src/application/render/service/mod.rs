mod config;
mod directives;
mod highlight;
pub mod html;
pub mod inline;
pub mod outline;
pub mod parser;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::application::blobs::BlobStore;
use crate::application::polls::PollEngine;
use crate::application::render::types::{
    ContentMetrics, EmbedTitle, RenderOutput, RenderRequest, RenderService, SpannedBlock,
};
use crate::application::resolve::{ReferenceResolver, ResolvedReference};
use crate::application::sanitize::{Anomaly, AnomalyKind, Sanitizer, SanitizerConfig};
use crate::application::titles::{TitleKey, TitleResolver, TitleState};
use crate::domain::attachments::AttachedFile;
use crate::domain::blocks::Block;

use outline::{build_outline, duplicate_headings};
use parser::BlockParser;

/// Default pipeline: sanitize, parse, then resolve references, polls and
/// embed titles against shared state.
pub struct BlockRenderService {
    sanitizer: Sanitizer,
    resolver: ReferenceResolver,
    polls: Arc<PollEngine>,
    titles: Option<TitleResolver>,
}

impl BlockRenderService {
    pub fn new(blobs: Arc<BlobStore>, config: SanitizerConfig, polls: Arc<PollEngine>) -> Self {
        Self {
            sanitizer: Sanitizer::new(Arc::clone(&blobs), config),
            resolver: ReferenceResolver::new(blobs),
            polls,
            titles: None,
        }
    }

    /// Attach a title resolver for YouTube and Spotify embeds.
    pub fn with_titles(mut self, titles: TitleResolver) -> Self {
        self.titles = Some(titles);
        self
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    fn resolve_references(
        &self,
        blocks: &[SpannedBlock],
        attachments: &[AttachedFile],
        anomalies: &mut Vec<Anomaly>,
    ) -> BTreeMap<String, ResolvedReference> {
        let mut references = BTreeMap::new();
        for spanned in blocks {
            let reference = match &spanned.block {
                Block::Image(image) => image.reference.as_str(),
                Block::MediaEmbed(embed) if !embed.kind.is_remote_service() => {
                    embed.reference.as_str()
                }
                _ => continue,
            };
            if references.contains_key(reference) {
                continue;
            }
            let resolved = self.resolver.resolve(reference, attachments);
            if resolved.is_placeholder() {
                anomalies.push(Anomaly::new(
                    AnomalyKind::MissingReference,
                    format!("line {}: `{reference}` did not resolve", spanned.line),
                ));
            }
            references.insert(reference.to_string(), resolved);
        }
        references
    }

    fn embed_titles(&self, blocks: &[SpannedBlock]) -> Vec<EmbedTitle> {
        blocks
            .iter()
            .filter_map(|spanned| match &spanned.block {
                Block::MediaEmbed(embed) => {
                    let key = TitleKey::for_embed(embed)?;
                    let state = match &self.titles {
                        Some(titles) => titles.title_for(&key),
                        None => TitleState::Pending(key.provisional()),
                    };
                    Some(EmbedTitle {
                        line: spanned.line,
                        key,
                        state,
                    })
                }
                _ => None,
            })
            .collect()
    }
}

impl RenderService for BlockRenderService {
    fn render(&self, request: &RenderRequest) -> RenderOutput {
        let sanitized = self.sanitizer.sanitize(&request.text, &request.attachments);
        let mut anomalies = sanitized.anomalies;

        let mut parser = BlockParser::new(&sanitized.text);
        let blocks: Vec<SpannedBlock> = parser.by_ref().collect();
        anomalies.extend(parser.into_diagnostics().into_iter().map(|diagnostic| {
            Anomaly::new(
                AnomalyKind::MalformedDirective,
                format!("line {}: {}", diagnostic.line, diagnostic.message),
            )
        }));

        let mut attachments = request.attachments.clone();
        attachments.extend(sanitized.new_attachments.iter().cloned());
        let references = self.resolve_references(&blocks, &attachments, &mut anomalies);

        let polls = blocks
            .iter()
            .filter_map(|spanned| match &spanned.block {
                Block::Poll(definition) => {
                    self.polls.register(definition.clone());
                    self.polls.view(&definition.id, request.voter.as_ref())
                }
                _ => None,
            })
            .collect();

        let titles = self.embed_titles(&blocks);
        let outline = build_outline(&blocks);
        let duplicate_headings = duplicate_headings(&outline);
        let metrics = content_metrics(&blocks, &references);

        debug!(
            target = "application::render::service",
            blocks = metrics.blocks_count,
            anomalies = anomalies.len(),
            new_attachments = sanitized.new_attachments.len(),
            "Rendered document"
        );

        RenderOutput {
            text: sanitized.text,
            blocks,
            new_attachments: sanitized.new_attachments,
            anomalies,
            references,
            polls,
            titles,
            outline,
            duplicate_headings,
            metrics,
        }
    }
}

fn content_metrics(
    blocks: &[SpannedBlock],
    references: &BTreeMap<String, ResolvedReference>,
) -> ContentMetrics {
    let mut metrics = ContentMetrics {
        blocks_count: blocks.len() as u32,
        ..ContentMetrics::default()
    };

    for spanned in blocks {
        match &spanned.block {
            Block::Heading { .. } => metrics.headings_count += 1,
            Block::CodeBlock { .. } => metrics.code_blocks_count += 1,
            Block::Poll(_) => metrics.polls_count += 1,
            Block::Image(image) => {
                metrics.images_count += 1;
                if image.alt.trim().is_empty() {
                    metrics.images_missing_alt += 1;
                }
            }
            Block::MediaEmbed(_) => metrics.embeds_count += 1,
            _ => {}
        }
        if let Some(text) = spanned.block.text() {
            metrics.links_count += text.links().count() as u32;
        }
    }

    metrics.placeholders_count = references
        .values()
        .filter(|resolved| resolved.is_placeholder())
        .count() as u32;
    metrics
}
