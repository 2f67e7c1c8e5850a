//! Text helpers: mention normalization, tweet truncation and the light
//! markup-to-HTML conversion used for rendered reply cards.

use once_cell::sync::Lazy;
use regex::Regex;

/// URLs (t.co links and anything else with a scheme or www prefix)
static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());

/// @handles
static MENTION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").unwrap());

/// #hashtags and $cashtags
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[#$]\w+").unwrap());

static WHITESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// `**bold**`
static BOLD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

/// Marker appended when text is cut to fit a tweet.
pub const ELLIPSIS: &str = "...";

/// Strip URLs, mentions and tags from post text before it is used as model input.
pub fn normalize(text: &str) -> String {
    let text = URL_PATTERN.replace_all(text, " ");
    let text = MENTION_PATTERN.replace_all(&text, " ");
    let text = TAG_PATTERN.replace_all(&text, " ");
    WHITESPACE_PATTERN.replace_all(&text, " ").trim().to_string()
}

/// Fit text into `limit` characters, cutting to `limit - 3` and appending
/// `...` when it is too long. Counts chars, not bytes.
pub fn truncate_for_tweet(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Shorten text for log lines.
pub fn shorten_for_log(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Keep at most `max` characters.
pub fn take_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_inline(line: &str) -> String {
    BOLD_PATTERN
        .replace_all(&escape_html(line), "<strong>$1</strong>")
        .to_string()
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if (1..=3).contains(&hashes) {
        let rest = &line[hashes..];
        if let Some(title) = rest.strip_prefix(' ') {
            return Some((hashes, title.trim()));
        }
    }
    None
}

/// Convert model output into HTML for the reply card.
///
/// Handles `#`..`###` headings, `**bold**` and blank-line separated
/// paragraphs. Everything else is escaped and kept as text.
pub fn markup_to_html(text: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();

    let flush = |paragraph: &mut Vec<String>, blocks: &mut Vec<String>| {
        if !paragraph.is_empty() {
            blocks.push(format!("<p>{}</p>", paragraph.join("<br>")));
            paragraph.clear();
        }
    };

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        if let Some((level, title)) = heading_level(line) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(format!("<h{0}>{1}</h{0}>", level, render_inline(title)));
            continue;
        }
        paragraph.push(render_inline(line));
    }
    flush(&mut paragraph, &mut blocks);

    blocks.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_urls_mentions_and_tags() {
        assert_eq!(
            normalize("@replybot is this true? https://t.co/abc123 #crypto $ETH"),
            "is this true?"
        );
        assert_eq!(normalize("@a @b"), "");
        assert_eq!(
            normalize("Check   www.example.com/page\nand\tthis"),
            "Check and this"
        );
    }

    #[test]
    fn test_normalize_keeps_email_like_text_readable() {
        // the handle part of an address is a mention as far as the regex is concerned
        assert_eq!(normalize("mail me at me@example"), "mail me at me");
    }

    #[test]
    fn test_truncate_keeps_short_text() {
        assert_eq!(truncate_for_tweet("short", 280), "short");
        let exact = "a".repeat(280);
        assert_eq!(truncate_for_tweet(&exact, 280), exact);
    }

    #[test]
    fn test_truncate_300_chars_to_280() {
        let long: String = (0..300).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let out = truncate_for_tweet(&long, 280);
        assert_eq!(out.chars().count(), 280);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(&out[..277], &long[..277]);
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let long = "é".repeat(300);
        let out = truncate_for_tweet(&long, 280);
        assert_eq!(out.chars().count(), 280);
        assert!(out.starts_with(&"é".repeat(277)));
    }

    #[test]
    fn test_markup_headings_bold_and_paragraphs() {
        let html = markup_to_html("# Verdict\n\nThis is **mostly true**.\nSecond line\n\n### Sources\nnone");
        assert_eq!(
            html,
            "<h1>Verdict</h1>\n<p>This is <strong>mostly true</strong>.<br>Second line</p>\n<h3>Sources</h3>\n<p>none</p>"
        );
    }

    #[test]
    fn test_markup_escapes_html() {
        assert_eq!(
            markup_to_html("<script>alert('x')</script>"),
            "<p>&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;</p>"
        );
    }

    #[test]
    fn test_markup_ignores_hash_without_space() {
        assert_eq!(markup_to_html("#hashtag"), "<p>#hashtag</p>");
        assert_eq!(markup_to_html("#### too deep"), "<p>#### too deep</p>");
    }

    #[test]
    fn test_shorten_for_log() {
        assert_eq!(shorten_for_log("hello world", 5), "hello...");
        assert_eq!(shorten_for_log("hi", 5), "hi");
    }
}
