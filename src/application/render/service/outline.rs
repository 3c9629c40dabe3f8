use std::collections::BTreeMap;

use crate::application::render::types::{DuplicateHeading, OutlineEntry, SpannedBlock};
use crate::domain::blocks::Block;
use crate::domain::slug::AnchorSlugger;

/// Heading outline in document order with unique anchors.
pub fn build_outline(blocks: &[SpannedBlock]) -> Vec<OutlineEntry> {
    let mut slugger = AnchorSlugger::new();
    blocks
        .iter()
        .filter_map(|spanned| match &spanned.block {
            Block::Heading { level, text } => {
                let text = text.plain_text();
                Some(OutlineEntry {
                    level: *level,
                    anchor: slugger.anchor_for(&text),
                    text,
                    line: spanned.line,
                })
            }
            _ => None,
        })
        .collect()
}

/// Headings whose text (trimmed, case-folded) occurs more than once.
pub fn duplicate_headings(outline: &[OutlineEntry]) -> Vec<DuplicateHeading> {
    let mut groups: BTreeMap<String, DuplicateHeading> = BTreeMap::new();
    for entry in outline {
        let key = entry.text.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        groups
            .entry(key)
            .or_insert_with(|| DuplicateHeading {
                text: entry.text.trim().to_string(),
                lines: Vec::new(),
            })
            .lines
            .push(entry.line);
    }

    let mut duplicates: Vec<_> = groups
        .into_values()
        .filter(|group| group.lines.len() > 1)
        .collect();
    duplicates.sort_by_key(|group| group.lines[0]);
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::service::parser::BlockParser;

    fn outline(text: &str) -> Vec<OutlineEntry> {
        let blocks: Vec<_> = BlockParser::new(text).collect();
        build_outline(&blocks)
    }

    #[test]
    fn anchors_are_unique_in_order() {
        let entries = outline("# Intro\ntext\n## Intro\n### Setup **now**");
        let anchors: Vec<_> = entries.iter().map(|e| e.anchor.as_str()).collect();
        assert_eq!(anchors, vec!["intro", "intro-2", "setup-now"]);
        assert_eq!(entries[2].text, "Setup now");
        assert_eq!(entries[1].line, 3);
    }

    #[test]
    fn duplicates_are_grouped_case_insensitively() {
        let entries = outline("# Notes\n# Other\n## notes \n# Other");
        let duplicates = duplicate_headings(&entries);
        assert_eq!(
            duplicates,
            vec![
                DuplicateHeading {
                    text: "Notes".into(),
                    lines: vec![1, 3]
                },
                DuplicateHeading {
                    text: "Other".into(),
                    lines: vec![2, 4]
                },
            ]
        );
    }
}
