//! Structured content builder for destination posts.
//!
//! Destination text is composed from named parts and rendered exactly once
//! per publish strategy. Nothing is appended and later stripped: a downgraded
//! publish simply renders with a back-link part present.
//!
//! # Layout
//!
//! ```text
//! 【title】            (native reposts only, which cannot carry a title field)
//! header              (reply marker, optional)
//! body                (translated text)
//! back-link           (downgrades only)
//! footer              (source item id)
//! ```
//!
//! Parts are separated by a blank line; empty parts are omitted.

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;

/// Rendered destination post content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostBody {
    /// Separate title field, for destinations/strategies that support one.
    pub title: Option<String>,
    /// Post text.
    pub text: String,
}

/// Composes destination text from named parts.
#[derive(Debug, Clone, Default)]
pub struct ContentBuilder {
    title: Option<String>,
    header: Option<String>,
    body: String,
    back_link: Option<String>,
    footer: Option<String>,
}

impl ContentBuilder {
    /// Start a builder with the given body text.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Set the title part.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }

    /// Set the header line (e.g. a reply marker).
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into()).filter(|h: &String| !h.trim().is_empty());
        self
    }

    /// Set an explicit back-link to the predecessor's destination location.
    pub fn back_link(mut self, location: impl Into<String>) -> Self {
        self.back_link = Some(format!("Quoted post: {}", location.into()));
        self
    }

    /// Set the footer (the source item id).
    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into()).filter(|f: &String| !f.trim().is_empty());
        self
    }

    /// Whether a back-link part is present.
    pub fn has_back_link(&self) -> bool {
        self.back_link.is_some()
    }

    /// Render with the title in its own field, truncated to `title_limit` characters.
    pub fn render(&self, title_limit: usize) -> PostBody {
        PostBody {
            title: self.title.as_deref().map(|t| truncate_chars(t, title_limit)),
            text: self.join_parts(None),
        }
    }

    /// Render with the title inlined at the top of the text.
    ///
    /// Used for native reference-reposts, which have no title field.
    pub fn render_inline_title(&self) -> PostBody {
        let inline = self.title.as_deref().map(|t| format!("【{t}】"));
        PostBody {
            title: None,
            text: self.join_parts(inline),
        }
    }

    fn join_parts(&self, lead: Option<String>) -> String {
        let body = self.body.trim();
        let parts = [
            lead.as_deref(),
            self.header.as_deref(),
            Some(body).filter(|b| !b.is_empty()),
            self.back_link.as_deref(),
            self.footer.as_deref(),
        ];

        parts.into_iter().flatten().collect::<Vec<_>>().join("\n\n")
    }
}

/// Truncate to at most `limit` characters (not bytes).
pub fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Format a post title from the group name and item timestamp, in local time.
pub fn format_title(group_name: &str, timestamp: i64) -> String {
    format_title_in(group_name, timestamp, &Local)
}

/// Format a post title in an explicit time zone.
pub fn format_title_in<Tz: TimeZone>(group_name: &str, timestamp: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => format!(
            "{} {}",
            group_name,
            dt.with_timezone(tz).format("%Y-%m-%d %H:%M:%S")
        ),
        None => group_name.to_string(),
    }
}

/// Header line for a reply, using the author's display name.
pub fn reply_header(display_name: &str) -> String {
    format!("{display_name} replied:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_render_body_and_footer() {
        let body = ContentBuilder::new("hello world").footer("12345").render(15);
        assert_eq!(body.title, None);
        assert_eq!(body.text, "hello world\n\n12345");
    }

    #[test]
    fn test_render_all_parts_in_order() {
        let body = ContentBuilder::new("body")
            .title("Group 2024")
            .header("Alice replied:")
            .back_link("https://t.example/1")
            .footer("99")
            .render(80);
        assert_eq!(body.title.as_deref(), Some("Group 2024"));
        assert_eq!(
            body.text,
            "Alice replied:\n\nbody\n\nQuoted post: https://t.example/1\n\n99"
        );
    }

    #[test]
    fn test_title_truncated_by_chars() {
        let body = ContentBuilder::new("x").title("あいす 2024-01-02 03:04:05").render(5);
        assert_eq!(body.title.as_deref(), Some("あいす 2"));
    }

    #[test]
    fn test_inline_title_for_repost() {
        let body = ContentBuilder::new("comment").title("Group").footer("7").render_inline_title();
        assert_eq!(body.title, None);
        assert_eq!(body.text, "【Group】\n\ncomment\n\n7");
    }

    #[test]
    fn test_empty_parts_omitted() {
        let body = ContentBuilder::new("   ").title("").header(" ").footer("1").render(10);
        assert_eq!(body.title, None);
        assert_eq!(body.text, "1");
    }

    #[test]
    fn test_back_link_presence() {
        let builder = ContentBuilder::new("a");
        assert!(!builder.has_back_link());
        assert!(builder.back_link("loc").has_back_link());
    }

    #[test]
    fn test_format_title_in_utc() {
        assert_eq!(
            format_title_in("iLiFE!", 1_700_000_000, &Utc),
            "iLiFE! 2023-11-14 22:13:20"
        );
    }

    #[test]
    fn test_format_title_out_of_range() {
        assert_eq!(format_title_in("g", i64::MAX, &Utc), "g");
    }

    #[test]
    fn test_reply_header() {
        assert_eq!(reply_header("@bob"), "@bob replied:");
    }
}
