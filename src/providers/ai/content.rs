//! Body preparation for the language-model prompt.
//!
//! The scrubber is deliberately minimal: reduce HTML to approximate plain
//! text within the configured character cap. It is not an HTML parser.

use std::sync::OnceLock;

use regex::Regex;

/// Marker appended when the body is cut at the cap.
pub const TRUNCATION_MARKER: &str = "\n[content truncated]";

fn re_script() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap())
}

fn re_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap())
}

fn re_line_breaks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</h[1-6]>").unwrap())
}

fn re_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn re_blank_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Picks the body to send to the model: plain text when present, else the
/// stripped HTML. The result is capped at `max_chars`.
pub fn prepare_body(body_text: &str, body_html: &str, max_chars: usize) -> String {
    let body = if !body_text.trim().is_empty() {
        body_text.trim().to_string()
    } else {
        strip_html(body_html)
    };
    truncate(&body, max_chars)
}

/// Reduces HTML to approximate plain text.
pub fn strip_html(html: &str) -> String {
    let text = re_script().replace_all(html, "");
    let text = re_style().replace_all(&text, "");
    let text = re_line_breaks().replace_all(&text, "\n");
    let text = re_tags().replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    re_blank_lines().replace_all(&text, "\n\n").trim().to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}
