use blotter::{
    application::render::{BlockParser, build_outline, duplicate_headings},
    domain::blocks::{Block, BulletStyle, MediaKind, WidthMode},
};

fn load_markdown() -> &'static str {
    include_str!("fixtures/field_notes.md")
}

#[test]
fn fixture_blocks_come_out_in_order() {
    let blocks: Vec<_> = BlockParser::new(load_markdown()).collect();
    let kinds: Vec<_> = blocks.iter().map(|spanned| spanned.block.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            "heading",
            "paragraph",
            "heading",
            "list_item",
            "list_item",
            "list_item",
            "block_quote",
            "divider",
            "image",
            "poll",
            "media_embed",
            "media_embed",
            "code_block",
            "html_passthrough",
            "heading",
        ]
    );

    let styles: Vec<_> = blocks
        .iter()
        .filter_map(|spanned| match &spanned.block {
            Block::ListItem { style, .. } => Some(*style),
            _ => None,
        })
        .collect();
    assert_eq!(
        styles,
        vec![BulletStyle::Filled, BulletStyle::Hollow, BulletStyle::Filled]
    );
}

#[test]
fn fixture_directives_carry_their_arguments() {
    let blocks: Vec<_> = BlockParser::new(load_markdown()).collect();

    let image = blocks
        .iter()
        .find_map(|spanned| match &spanned.block {
            Block::Image(image) => Some((spanned.line, spanned.end_line, image)),
            _ => None,
        })
        .expect("image");
    assert_eq!((image.0, image.1), (15, 16));
    assert_eq!(image.2.reference, "h3r0n1.jpg");
    assert_eq!(image.2.width, WidthMode::Wide);
    assert_eq!(image.2.caption.as_deref(), Some("Heron at dawn"));

    let embeds: Vec<_> = blocks
        .iter()
        .filter_map(|spanned| match &spanned.block {
            Block::MediaEmbed(embed) => Some(embed),
            _ => None,
        })
        .collect();
    assert_eq!(embeds[0].kind, MediaKind::Youtube);
    assert_eq!(embeds[0].reference, "dQw4w9WgXcQ");
    assert_eq!(embeds[1].kind, MediaKind::Pdf);
    assert_eq!(embeds[1].display_name.as_deref(), Some("Route map"));

    let code = blocks
        .iter()
        .find_map(|spanned| match &spanned.block {
            Block::CodeBlock { language, lines } => Some((language, lines)),
            _ => None,
        })
        .expect("code block");
    assert_eq!(code.0.as_deref(), Some("rust"));
    assert_eq!(code.1.len(), 3);
}

#[test]
fn fixture_outline_flags_the_repeated_heading() {
    let blocks: Vec<_> = BlockParser::new(load_markdown()).collect();
    let outline = build_outline(&blocks);
    let anchors: Vec<_> = outline.iter().map(|entry| entry.anchor.as_str()).collect();
    assert_eq!(anchors, vec!["field-notes", "birds-seen", "birds-seen-2"]);

    let duplicates = duplicate_headings(&outline);
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].text, "Birds seen");
    assert_eq!(duplicates[0].lines, vec![5, 32]);
}

#[test]
fn parser_reports_no_diagnostics_for_the_fixture() {
    let mut parser = BlockParser::new(load_markdown());
    parser.by_ref().for_each(drop);
    assert!(parser.diagnostics().is_empty());
}
