//! Message formatting for the delivery channel.
//!
//! Renders an excerpt with a short header (title, author, position) for the
//! messaging transport. The rendered message never exceeds the transport's
//! maximum length: the segmenter's hard cap plus the header reserve is
//! validated against it at config load, and rendering enforces the limit as
//! a final guard.

use crate::models::Document;

/// Display-only metadata accompanying a delivery. Never stored.
#[derive(Debug, Clone)]
pub struct DeliveryMeta {
    pub title: String,
    pub author: Option<String>,
    /// 1-based position of the delivered excerpt.
    pub position: i64,
    pub total: i64,
}

impl DeliveryMeta {
    pub fn for_excerpt(document: &Document, seq_index: i64) -> Self {
        Self {
            title: document.display_name.clone(),
            author: document.author.clone(),
            position: seq_index + 1,
            total: document.excerpt_count,
        }
    }
}

/// Render a delivery message: header, blank line, excerpt body, capped at
/// `max_chars`.
pub fn render_message(excerpt_text: &str, meta: &DeliveryMeta, max_chars: usize) -> String {
    let mut header = format!("\u{1F4DA} *{}*", escape_markdown(&meta.title));
    if let Some(author) = &meta.author {
        header.push_str(&format!("\n\u{270D} {}", escape_markdown(author)));
    }
    header.push_str(&format!(
        "\n\u{1F4D6} {}/{} excerpts",
        meta.position, meta.total
    ));

    let message = format!("{header}\n\n{excerpt_text}");
    enforce_limit(message, max_chars)
}

/// Render the notice sent when a user finishes a document.
pub fn render_completion_notice(meta: &DeliveryMeta, max_chars: usize) -> String {
    let message = format!(
        "\u{1F389} *You finished {}!*\n\nAll {} excerpts delivered. Select another document to keep reading.",
        escape_markdown(&meta.title),
        meta.total
    );
    enforce_limit(message, max_chars)
}

fn enforce_limit(message: String, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message;
    }
    // Should be unreachable under a validated config; truncating beats a
    // transport rejection.
    tracing::warn!(
        chars = message.chars().count(),
        max = max_chars,
        "rendered message exceeded transport limit; truncating"
    );
    message.chars().take(max_chars).collect()
}

/// Escape Markdown control characters for the channel.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-'
            | '=' | '|' | '{' | '}' | '.' | '!')
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DeliveryMeta {
        DeliveryMeta {
            title: "War & Peace".to_string(),
            author: Some("L. Tolstoy".to_string()),
            position: 5,
            total: 120,
        }
    }

    #[test]
    fn renders_header_and_body() {
        let msg = render_message("The excerpt body.", &meta(), 4096);
        assert!(msg.contains("War & Peace"));
        assert!(msg.contains("L\\. Tolstoy"));
        assert!(msg.contains("5/120 excerpts"));
        assert!(msg.ends_with("The excerpt body."));
    }

    #[test]
    fn omits_author_line_when_unknown() {
        let mut m = meta();
        m.author = None;
        let msg = render_message("Body.", &m, 4096);
        assert!(!msg.contains('\u{270D}'));
    }

    #[test]
    fn escapes_markdown_in_title() {
        let mut m = meta();
        m.title = "notes_v2.final".to_string();
        let msg = render_message("Body.", &m, 4096);
        assert!(msg.contains("notes\\_v2\\.final"));
    }

    #[test]
    fn never_exceeds_transport_limit() {
        let body = "x".repeat(5000);
        let msg = render_message(&body, &meta(), 4096);
        assert_eq!(msg.chars().count(), 4096);
    }

    #[test]
    fn completion_notice_names_the_document() {
        let msg = render_completion_notice(&meta(), 4096);
        assert!(msg.contains("You finished"));
        assert!(msg.contains("120"));
    }
}
