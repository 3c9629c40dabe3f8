//! HTML projection of a render result.
//!
//! Every piece of user text goes through `ammonia::clean_text` here; the only
//! markup that reaches the output unescaped is highlighter output and
//! passthrough HTML that already went through the inline safelist.

use ammonia::clean_text;

use crate::application::polls::PollView;
use crate::application::render::types::{RenderError, RenderOutput, SpannedBlock};
use crate::domain::attachments::{mime_for_name, supports_inline_preview};
use crate::domain::blocks::{
    Block, BulletStyle, FormattedText, ImageBlock, InlineSpan, MediaEmbed, MediaKind,
};
use crate::domain::polls::PollDefinition;

use super::highlight::highlight_code;
use super::inline::is_safe_url;

pub fn render_html(output: &RenderOutput) -> Result<String, RenderError> {
    let mut html = String::new();
    let mut open_list = false;

    for spanned in &output.blocks {
        let is_list_item = matches!(spanned.block, Block::ListItem { .. });
        if open_list && !is_list_item {
            html.push_str("</ul>\n");
            open_list = false;
        }
        if is_list_item && !open_list {
            html.push_str("<ul>\n");
            open_list = true;
        }
        html.push_str(&render_block(output, spanned)?);
        html.push('\n');
    }

    if open_list {
        html.push_str("</ul>\n");
    }
    Ok(html)
}

fn render_block(output: &RenderOutput, spanned: &SpannedBlock) -> Result<String, RenderError> {
    let markup = match &spanned.block {
        Block::Heading { level, text } => {
            let anchor = output.anchor_at(spanned.line).unwrap_or("section");
            format!(
                "<h{level} id=\"{}\">{}</h{level}>",
                clean_text(anchor),
                render_spans(text)
            )
        }
        Block::Paragraph { text } => format!("<p>{}</p>", render_spans(text)),
        Block::ListItem { style, text } => {
            let class = match style {
                BulletStyle::Filled => "bullet-filled",
                BulletStyle::Hollow => "bullet-hollow",
            };
            format!("<li class=\"{class}\">{}</li>", render_spans(text))
        }
        Block::BlockQuote { text } => format!("<blockquote>{}</blockquote>", render_spans(text)),
        Block::Divider => "<hr>".to_string(),
        Block::CodeBlock { language, lines } => highlight_code(language.as_deref(), lines)?,
        Block::Image(image) => render_image(output, image),
        Block::Poll(definition) => {
            let view = output
                .polls
                .iter()
                .find(|view| view.definition.id == definition.id);
            render_poll(definition, view)
        }
        Block::MediaEmbed(embed) => render_media(output, spanned.line, embed),
        Block::HtmlPassthrough { html } => format!("<p class=\"passthrough\">{html}</p>"),
    };
    Ok(markup)
}

fn render_spans(text: &FormattedText) -> String {
    text.spans()
        .iter()
        .map(|span| match span {
            InlineSpan::Text(value) => clean_text(value),
            InlineSpan::Link { text, url } if is_safe_url(url) => format!(
                "<a href=\"{}\" rel=\"noopener noreferrer\">{}</a>",
                clean_text(url),
                clean_text(text)
            ),
            InlineSpan::Link { text, .. } => clean_text(text),
            InlineSpan::BoldItalic(value) => {
                format!("<strong><em>{}</em></strong>", clean_text(value))
            }
            InlineSpan::Bold(value) => format!("<strong>{}</strong>", clean_text(value)),
            InlineSpan::Italic(value) => format!("<em>{}</em>", clean_text(value)),
            InlineSpan::Underline(value) => format!("<u>{}</u>", clean_text(value)),
        })
        .collect()
}

fn render_image(output: &RenderOutput, image: &ImageBlock) -> String {
    let src = output
        .references
        .get(&image.reference)
        .map(|resolved| resolved.uri.as_str())
        .unwrap_or(image.reference.as_str());
    let caption = image
        .caption
        .as_deref()
        .map(|caption| format!("<figcaption>{}</figcaption>", clean_text(caption)))
        .unwrap_or_default();
    format!(
        "<figure class=\"image image-{}\"><img src=\"{}\" alt=\"{}\" loading=\"lazy\">{caption}</figure>",
        image.width.as_str(),
        clean_text(src),
        clean_text(&image.alt)
    )
}

fn render_poll(definition: &PollDefinition, view: Option<&PollView>) -> String {
    let has_voted = view.is_some_and(|view| view.has_voted);
    let selected = view.and_then(|view| view.selected.as_deref());
    let id = clean_text(definition.id.as_str());
    let state = if has_voted { " poll-voted" } else { "" };
    let disabled = if has_voted { " disabled" } else { "" };

    let mut form = format!(
        "<form class=\"poll{state}\" data-poll-id=\"{id}\"><fieldset><legend>{}</legend>\n",
        clean_text(&definition.question)
    );
    for option in &definition.options {
        let checked = if selected == Some(option.as_str()) {
            " checked"
        } else {
            ""
        };
        form.push_str(&format!(
            "<label><input type=\"radio\" name=\"{id}\" value=\"{value}\"{checked}{disabled}> {value}</label>\n",
            value = clean_text(option)
        ));
    }
    form.push_str("</fieldset></form>");
    form
}

fn render_media(output: &RenderOutput, line: usize, embed: &MediaEmbed) -> String {
    let title = output
        .title_at(line)
        .map(|state| state.title().to_string())
        .or_else(|| embed.display_name.clone())
        .unwrap_or_else(|| embed.reference.clone());
    let title = clean_text(&title);

    let resolved = output.references.get(&embed.reference);
    let src = clean_text(
        resolved
            .map(|resolved| resolved.uri.as_str())
            .unwrap_or(embed.reference.as_str()),
    );

    match embed.kind {
        MediaKind::Youtube => format!(
            "<iframe class=\"embed embed-youtube\" src=\"https://www.youtube-nocookie.com/embed/{}\" title=\"{title}\" loading=\"lazy\" allowfullscreen></iframe>",
            clean_text(&embed.reference)
        ),
        MediaKind::Spotify => format!(
            "<iframe class=\"embed embed-spotify\" src=\"https://open.spotify.com/embed/{}\" title=\"{title}\" loading=\"lazy\"></iframe>",
            clean_text(&embed.reference)
        ),
        MediaKind::Video => format!(
            "<video class=\"embed embed-video\" src=\"{src}\" title=\"{title}\" controls></video>"
        ),
        MediaKind::Audio => format!(
            "<audio class=\"embed embed-audio\" src=\"{src}\" title=\"{title}\" controls></audio>"
        ),
        MediaKind::Pdf => format!(
            "<p class=\"embed embed-pdf\"><a href=\"{src}\" rel=\"noopener noreferrer\">{title}</a></p>"
        ),
        MediaKind::File => {
            let mime = resolved
                .and_then(|resolved| resolved.mime.clone())
                .unwrap_or_else(|| mime_for_name(&embed.reference));
            let action = if supports_inline_preview(&mime) {
                "target=\"_blank\" rel=\"noopener noreferrer\""
            } else {
                "download"
            };
            format!("<p class=\"embed embed-file\"><a href=\"{src}\" {action}>{title}</a></p>")
        }
    }
}
