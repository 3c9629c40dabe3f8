use once_cell::sync::Lazy;
use syntect::{
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use crate::application::render::types::RenderError;

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);

const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "syntax-" };
const PLAIN_LANGUAGE: &str = "text";

/// Render a fenced code block as classed `<pre><code>` markup.
///
/// Unknown languages fall back to plain text; the label is still echoed in
/// the classes so stylesheets can target it.
pub(crate) fn highlight_code(
    language: Option<&str>,
    lines: &[String],
) -> Result<String, RenderError> {
    let label = language
        .map(class_token)
        .filter(|token| !token.is_empty())
        .unwrap_or_else(|| PLAIN_LANGUAGE.to_string());
    let syntax = language
        .and_then(|token| find_syntax(&SYNTAX_SET, token))
        .unwrap_or_else(|| SYNTAX_SET.find_syntax_plain_text());

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAX_SET, CLASS_STYLE);
    let source = lines.iter().fold(String::new(), |mut acc, line| {
        acc.push_str(line);
        acc.push('\n');
        acc
    });
    for line in LinesWithEndings::from(source.as_str()) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|err| RenderError::Highlighting {
                language: label.clone(),
                message: err.to_string(),
            })?;
    }

    Ok(format!(
        "<pre class=\"code-block syntax-lang-{label}\" data-language=\"{label}\"><code class=\"language-{label}\">{}</code></pre>",
        generator.finalize()
    ))
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let token = token.trim();
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(token))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

/// Keep only characters that are safe inside a class list and attribute.
fn class_token(language: &str) -> String {
    language
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '#' | '-' | '_' | '.'))
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_languages_get_token_classes() {
        let html = highlight_code(Some("rust"), &["fn main() {}".to_string()]).expect("highlight");
        assert!(html.starts_with("<pre class=\"code-block syntax-lang-rust\""));
        assert!(html.contains("syntax-"));
        assert!(html.contains("main"));
    }

    #[test]
    fn unknown_languages_fall_back_to_plain_text() {
        let html = highlight_code(Some("klingon"), &["<b>".to_string()]).expect("highlight");
        assert!(html.contains("&lt;b&gt;"));
        assert!(html.contains("language-klingon"));
    }

    #[test]
    fn language_labels_cannot_break_out_of_attributes() {
        let html =
            highlight_code(Some("c\"><script>"), &["x".to_string()]).expect("highlight");
        assert!(!html.contains("<script>"));
        assert!(html.contains("data-language=\"cscript\""));
    }

    #[test]
    fn missing_language_is_plain_text() {
        let html = highlight_code(None, &["a".to_string(), "b".to_string()]).expect("highlight");
        assert!(html.contains("language-text"));
        assert_eq!(html.matches('\n').count(), 2);
    }
}
