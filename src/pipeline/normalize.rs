//! Body normalization: message bodies to spreadsheet-cell plain text.
//!
//! HTML bodies are scanned tag by tag: markup is dropped, `script`/`style`/
//! `title` contents are skipped, entities are decoded, and block-level
//! tags become line breaks. The scanner never fails; anything it cannot make
//! sense of is kept as text.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::pipeline::types::ContentType;

/// Elements whose contents are never rendered. `head` is not listed: its end
/// tag is optional, and the only text it holds sits in these elements anyway.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "title", "template", "noscript"];

/// Elements that start or end a line.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "footer", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p", "pre",
    "section", "table", "tbody", "thead", "tfoot", "tr", "ul",
];

/// Table cells, separated by a space.
const CELL_ELEMENTS: &[&str] = &["td", "th"];

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});").unwrap()
});

/// Convert a raw body into plain text.
///
/// `Html` bodies are stripped and decoded; `Plain` bodies come back unchanged.
pub fn to_plain_text(raw_body: &str, content_type: ContentType) -> String {
    match content_type {
        ContentType::Plain => raw_body.to_string(),
        ContentType::Html => html_to_text(raw_body),
    }
}

/// Best-effort HTML to text conversion.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        push_text(&mut out, &rest[..lt]);
        let after = &rest[lt + 1..];

        if let Some(comment) = after.strip_prefix("!--") {
            rest = match comment.find("-->") {
                Some(end) => &comment[end + 3..],
                None => "",
            };
            continue;
        }

        let opens_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if !opens_tag {
            // A bare `<` in running text, e.g. "a < b".
            out.push('<');
            rest = after;
            continue;
        }

        let Some(gt) = after.find('>') else {
            // Unterminated tag: keep what is left as text.
            push_text(&mut out, &rest[lt..]);
            rest = "";
            break;
        };

        let tag = Tag::parse(&after[..gt]);
        rest = &after[gt + 1..];

        if !tag.closing && !tag.self_closing && SKIPPED_ELEMENTS.contains(&tag.name.as_str()) {
            rest = skip_element(rest, &tag.name);
            continue;
        }

        if BLOCK_ELEMENTS.contains(&tag.name.as_str()) {
            out.push('\n');
        } else if CELL_ELEMENTS.contains(&tag.name.as_str()) {
            out.push(' ');
        }
    }
    push_text(&mut out, rest);

    collapse_whitespace(&out)
}

/// A parsed tag header: `<name ...>`, `</name>`, or `<name/>`.
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
}

impl Tag {
    fn parse(inner: &str) -> Self {
        let trimmed = inner.trim_start();
        let (closing, body) = match trimmed.strip_prefix('/') {
            Some(body) => (true, body),
            None => (false, trimmed),
        };
        let name = body
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Self {
            name,
            closing,
            self_closing: inner.trim_end().ends_with('/'),
        }
    }
}

/// Return the input after the closing tag of `name`. An element left open
/// ends where `<body` starts, or swallows the rest if there is no body tag.
fn skip_element<'a>(rest: &'a str, name: &str) -> &'a str {
    // ASCII lowercasing keeps byte offsets aligned with `rest`.
    let lower = rest.to_ascii_lowercase();
    if let Some(start) = lower.find(&format!("</{name}")) {
        return match rest[start..].find('>') {
            Some(gt) => &rest[start + gt + 1..],
            None => "",
        };
    }
    match lower.find("<body") {
        Some(b) => &rest[b..],
        None => "",
    }
}

/// Append a text run, decoding entities. Source line breaks are just whitespace.
fn push_text(out: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    for c in decode_entities(text).chars() {
        if c == '\n' || c == '\r' {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
}

/// Decode named and numeric character references. Unknown names are left as-is.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let reference = &caps[1];
            if let Some(num) = reference.strip_prefix('#') {
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                return code
                    .filter(|&c| c != 0)
                    .and_then(char::from_u32)
                    .unwrap_or('\u{FFFD}')
                    .to_string();
            }
            match named_entity(reference) {
                Some(s) => s.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<&'static str> {
    let decoded = match name {
        "amp" | "AMP" => "&",
        "lt" | "LT" => "<",
        "gt" | "GT" => ">",
        "quot" | "QUOT" => "\"",
        "apos" => "'",
        "nbsp" | "ensp" | "emsp" | "thinsp" => " ",
        "shy" | "zwnj" | "zwj" => "",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        "hellip" => "…",
        "mdash" => "—",
        "ndash" => "–",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "laquo" => "«",
        "raquo" => "»",
        "bull" => "•",
        "middot" => "·",
        "euro" => "€",
        "pound" => "£",
        "yen" => "¥",
        "cent" => "¢",
        "deg" => "°",
        "times" => "×",
        "divide" => "÷",
        _ => return None,
    };
    Some(decoded)
}

/// Collapse whitespace within lines and drop blank lines.
fn collapse_whitespace(text: &str) -> String {
    text.split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(s: &str) -> String {
        to_plain_text(s, ContentType::Html)
    }

    // ── Block structure ─────────────────────────────────────────────

    #[test]
    fn paragraphs_become_single_line_breaks() {
        assert_eq!(html("<p>A</p><p>B</p>"), "A\nB");
    }

    #[test]
    fn inline_tags_keep_surrounding_space() {
        assert_eq!(html("<b>Hello</b> <i>World</i>"), "Hello World");
    }

    #[test]
    fn inline_tags_without_space_join_words() {
        assert_eq!(html("in<span>line</span>"), "inline");
    }

    #[test]
    fn br_and_list_items_break_lines() {
        assert_eq!(
            html("Line 1<br>Line 2<br/><ul><li>one</li><li>two</li></ul>"),
            "Line 1\nLine 2\none\ntwo"
        );
    }

    #[test]
    fn table_cells_are_space_separated() {
        assert_eq!(
            html("<table><tr><td>Total</td><td>$5</td></tr></table>"),
            "Total $5"
        );
    }

    #[test]
    fn source_newlines_are_plain_whitespace() {
        assert_eq!(html("<p>Hello\n   there\r\n friend</p>"), "Hello there friend");
    }

    // ── Skipped content ─────────────────────────────────────────────

    #[test]
    fn script_style_and_head_are_dropped() {
        let body = "<html><head><title>T</title><style>p{color:red}</style></head>\
                    <body><script>alert('x')</script><p>Visible</p></body></html>";
        assert_eq!(html(body), "Visible");
    }

    #[test]
    fn skipped_element_matches_case_insensitively() {
        assert_eq!(html("<SCRIPT>var a = 1;</Script>after"), "after");
    }

    #[test]
    fn head_without_end_tag_stops_at_body() {
        let body = "<html><head><meta charset=utf-8><title>T</title>\
                    <body><p>Hi there</p></body></html>";
        assert_eq!(html(body), "Hi there");
    }

    #[test]
    fn unclosed_style_in_head_keeps_body_text() {
        assert_eq!(html("<head><style>p{}<body>Kept</body>"), "Kept");
    }

    #[test]
    fn body_markup_inside_script_is_still_skipped() {
        assert_eq!(html("<head><script>s = '<body>';</script><body>After"), "After");
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(html("a<!-- hidden <p>x</p> -->b"), "ab");
    }

    // ── Entities ────────────────────────────────────────────────────

    #[test]
    fn named_and_numeric_entities_decode() {
        assert_eq!(html("Fish &amp; Chips &#8212; &#x20AC;5"), "Fish & Chips — €5");
    }

    #[test]
    fn escaped_markup_stays_text() {
        assert_eq!(html("&lt;b&gt;not bold&lt;/b&gt;"), "<b>not bold</b>");
    }

    #[test]
    fn unknown_entity_is_left_alone() {
        assert_eq!(decode_entities("&bogus; &amp"), "&bogus; &amp");
    }

    #[test]
    fn nbsp_collapses_with_other_whitespace() {
        assert_eq!(html("a&nbsp;&nbsp; b"), "a b");
    }

    #[test]
    fn invalid_code_point_becomes_replacement_char() {
        assert_eq!(decode_entities("&#0;&#x110000;"), "\u{FFFD}\u{FFFD}");
    }

    // ── Malformed input ─────────────────────────────────────────────

    #[test]
    fn unterminated_tag_is_kept_as_text() {
        assert_eq!(html("<p>Hello <b"), "Hello <b");
    }

    #[test]
    fn bare_less_than_is_text() {
        assert_eq!(html("<p>1 < 2</p>"), "1 < 2");
    }

    #[test]
    fn unclosed_script_drops_the_rest() {
        assert_eq!(html("before<script>never closed"), "before");
    }

    #[test]
    fn garbage_never_panics() {
        for input in ["<", ">", "<<>>", "</>", "<!--", "&#", "<p", "&&&;;", "<a href=\"x>y\">z</a>"] {
            let _ = html(input);
        }
    }

    #[test]
    fn empty_input() {
        assert_eq!(html(""), "");
    }

    // ── Plain text ──────────────────────────────────────────────────

    #[test]
    fn plain_text_is_unchanged() {
        let body = "  <b>literal</b>\n\n  spacing  ";
        assert_eq!(to_plain_text(body, ContentType::Plain), body);
    }
}
