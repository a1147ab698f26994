//! HTML to plain text for message bodies.

use regex::Regex;
use std::sync::LazyLock;

// Non-greedy: a span ends at the first `>` after its `<`. `(?s)` lets tags wrap lines.
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<.*?>").expect("tag pattern is valid"));

/// Remove every `<...>` span and trim surrounding whitespace.
///
/// Entities are left alone: `&amp;` stays `&amp;`. The output never contains a `<` that is
/// followed by a `>`, so applying this twice gives the same result as applying it once.
pub fn strip_markup(html: &str) -> String {
    TAG.replace_all(html, "").trim().to_string()
}
