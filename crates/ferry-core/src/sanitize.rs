//! Text preparation and destination sanitizing.
//!
//! Two passes run around translation:
//!
//! 1. [`prepare_source_text`] before translation: unescapes HTML entities the
//!    source platform leaves in its text and rewrites `#tag` into the
//!    destination's `#tag#` hashtag syntax.
//! 2. [`Sanitizer::sanitize`] after translation: spelling corrections,
//!    competitor-name replacements that avoid destination throttling, and
//!    removal of stacked combining marks used in decorative text.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\w+)#?").expect("static hashtag pattern"));

static STACKING_MARKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{0300}-\u{036F}\u{0600}-\u{06FF}\u{0750}-\u{077F}\u{0F00}-\u{0FFF}]+")
        .expect("static unicode pattern")
});

/// Default competitor-name replacements.
const ANTI_THROTTLING: &[(&str, &str)] = &[
    (r"(?i)tiktok", "T!kTok"),
    (r"(?i)youtube", "Y*uTube"),
    (r"(?i)instagram", "IG"),
    (r"(?i)\bline\b", "L!NE"),
];

/// Prepare raw source text for translation.
pub fn prepare_source_text(text: &str) -> String {
    let unescaped = unescape_html(text);
    HASHTAG.replace_all(&unescaped, "#$1#").into_owned()
}

fn unescape_html(text: &str) -> String {
    // &amp; last so "&amp;lt;" becomes "&lt;" rather than "<".
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Destination-side text sanitizer.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Vec<(Regex, String)>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        let rules = ANTI_THROTTLING
            .iter()
            .map(|(pattern, replacement)| {
                (
                    Regex::new(pattern).expect("static anti-throttling pattern"),
                    (*replacement).to_string(),
                )
            })
            .collect();
        Self { rules }
    }
}

impl Sanitizer {
    /// A sanitizer with no replacement rules (still strips stacking marks).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a correction rule. Corrections run before the default rules.
    pub fn with_correction(mut self, pattern: &str, replacement: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.rules.insert(0, (regex, replacement.to_string()));
        Ok(self)
    }

    /// Apply all rules, then strip stacking marks.
    pub fn sanitize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut out = text.to_string();
        for (regex, replacement) in &self.rules {
            if regex.is_match(&out) {
                out = regex.replace_all(&out, replacement.as_str()).into_owned();
            }
        }
        let out = STACKING_MARKS.replace_all(&out, "").into_owned();

        if out != text {
            tracing::debug!("sanitizer rewrote destination text");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_unescapes_entities() {
        assert_eq!(prepare_source_text("a &lt;b&gt; &amp; &quot;c&quot;"), "a <b> & \"c\"");
        assert_eq!(prepare_source_text("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_prepare_rewrites_hashtags() {
        assert_eq!(prepare_source_text("live #idol now"), "live #idol# now");
        assert_eq!(prepare_source_text("#a #b"), "#a# #b#");
    }

    #[test]
    fn test_prepare_keeps_existing_destination_hashtags() {
        assert_eq!(prepare_source_text("#idol#"), "#idol#");
    }

    #[test]
    fn test_sanitize_competitor_names() {
        let s = Sanitizer::default();
        assert_eq!(
            s.sanitize("watch on YouTube and TikTok"),
            "watch on Y*uTube and T!kTok"
        );
        assert_eq!(s.sanitize("follow my Instagram"), "follow my IG");
        assert_eq!(s.sanitize("add me on LINE"), "add me on L!NE");
        assert_eq!(s.sanitize("online"), "online");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let s = Sanitizer::default();
        let once = s.sanitize("TikTok youtube line");
        assert_eq!(s.sanitize(&once), once);
    }

    #[test]
    fn test_sanitize_strips_stacking_marks() {
        let s = Sanitizer::empty();
        assert_eq!(s.sanitize("he\u{0301}\u{0302}llo"), "hello");
        assert_eq!(s.sanitize("ok\u{0F40}"), "ok");
    }

    #[test]
    fn test_corrections_run_first() {
        let s = Sanitizer::default()
            .with_correction(r"(?i)HEROINS", "HEROINES")
            .unwrap();
        assert_eq!(s.sanitize("HEROINS live"), "HEROINES live");
    }

    #[test]
    fn test_invalid_correction_pattern() {
        let err = Sanitizer::default().with_correction("(", "x").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(Sanitizer::default().sanitize(""), "");
    }
}
