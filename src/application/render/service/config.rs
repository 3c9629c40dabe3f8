use std::{borrow::Cow, collections::HashSet};

use ammonia::Builder as AmmoniaBuilder;
use once_cell::sync::Lazy;

/// Inline tags a line may start with to be passed through as HTML.
pub(crate) const PASSTHROUGH_TAGS: &[&str] = &[
    "b", "i", "em", "strong", "u", "s", "sub", "sup", "mark", "small", "kbd", "code", "br",
    "span", "abbr",
];

static PASSTHROUGH_SANITIZER: Lazy<AmmoniaBuilder<'static>> =
    Lazy::new(build_passthrough_sanitizer);

/// Whether `line` opens with one of the passthrough tags.
pub(crate) fn starts_with_passthrough_tag(line: &str) -> bool {
    let Some(rest) = line.trim_start().strip_prefix('<') else {
        return false;
    };
    let name: String = rest
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let terminated = rest[name.len()..]
        .chars()
        .next()
        .is_some_and(|ch| ch == '>' || ch == '/' || ch.is_whitespace());
    terminated && PASSTHROUGH_TAGS.contains(&name.as_str())
}

/// Clean a passthrough line down to the inline safelist.
pub(crate) fn clean_passthrough(html: &str) -> String {
    PASSTHROUGH_SANITIZER.clean(html).to_string()
}

fn build_passthrough_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = PASSTHROUGH_TAGS.iter().copied().collect();
    builder.tags(tags);

    let generic: HashSet<&'static str> = HashSet::from(["class", "title", "lang", "dir"]);
    builder.generic_attributes(generic);
    builder.add_tag_attributes("span", &["style"]);

    builder.attribute_filter(|_element, attribute, value| {
        if attribute.eq_ignore_ascii_case("style") {
            sanitize_style_attribute(value).map(Cow::Owned)
        } else {
            Some(Cow::Borrowed(value))
        }
    });

    builder
}

fn sanitize_style_attribute(value: &str) -> Option<String> {
    let sanitized: Vec<&str> = value
        .split(';')
        .map(str::trim)
        .filter(|decl| !decl.is_empty() && is_safe_style_declaration(decl))
        .collect();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized.join("; "))
    }
}

fn is_safe_style_declaration(decl: &str) -> bool {
    let lower = decl.to_ascii_lowercase();

    const FORBIDDEN_SUBSTRINGS: [&str; 8] = [
        "expression(",
        "javascript:",
        "vbscript:",
        "-moz-binding",
        "behavior:",
        "behaviour:",
        "@import",
        "url(",
    ];

    !FORBIDDEN_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}
