//! Content item model and destination identity references.
//!
//! A [`ContentItem`] is one already-parsed unit of source content. Its
//! `quote_chain` holds the referenced ancestors, oldest first, already
//! flattened by the parser; the relay engine walks it iteratively.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};

/// One unit of source content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Source platform id, stable across fetches.
    pub id: String,

    /// Author handle (without a leading `@`).
    pub author: String,

    /// Plain text body, already cleaned of markup by the parser.
    #[serde(default)]
    pub text: String,

    /// Local media files (images/video), in display order.
    #[serde(default)]
    pub media: Vec<PathBuf>,

    /// Seconds since the Unix epoch.
    pub timestamp: i64,

    /// Referenced ancestors, oldest first. Empty if the item stands alone.
    #[serde(default)]
    pub quote_chain: Vec<ContentItem>,

    /// Whether the item is a reply (affects text layout).
    #[serde(default)]
    pub is_reply: bool,

    /// Synthetic stand-in inserted by the parser to keep a chain continuous
    /// when the real ancestor could not be fetched.
    #[serde(default)]
    pub placeholder: bool,
}

impl ContentItem {
    /// Create a standalone item with no media and no ancestors.
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            text: text.into(),
            media: Vec::new(),
            timestamp,
            quote_chain: Vec::new(),
            is_reply: false,
            placeholder: false,
        }
    }

    /// Create a placeholder ancestor that only carries an id.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            placeholder: true,
            ..Self::new(id, "", "", 0)
        }
    }

    /// Parse an item from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let item: Self = serde_json::from_str(json)?;
        item.validate()?;
        Ok(item)
    }

    /// Check the fields the relay engine depends on.
    ///
    /// Placeholders only need an id; real items also need an author.
    /// Ancestors are validated iteratively.
    pub fn validate(&self) -> Result<()> {
        Self::validate_one(self)?;
        for ancestor in &self.quote_chain {
            Self::validate_one(ancestor)?;
        }
        Ok(())
    }

    fn validate_one(item: &ContentItem) -> Result<()> {
        if item.id.trim().is_empty() {
            return Err(Error::InvalidItem {
                field: "id",
                reason: "must not be empty".to_string(),
            });
        }
        if !item.placeholder && item.author.trim().is_empty() {
            return Err(Error::InvalidItem {
                field: "author",
                reason: format!("item {} has no author", item.id),
            });
        }
        Ok(())
    }

    /// Whether the item carries any media files.
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    /// Kind of the item's raw media, before transformation.
    pub fn media_kind(&self) -> MediaKind {
        MediaKind::classify(&self.media)
    }
}

/// Kind of media attached to an item after transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// No media.
    #[default]
    None,
    /// One or more images.
    Image,
    /// At least one video.
    Video,
}

impl MediaKind {
    /// Classify a set of media paths. Any video wins over images.
    pub fn classify<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut kind = Self::None;
        for path in paths {
            let path = path.as_ref();
            if is_video_path(path) {
                return Self::Video;
            }
            if is_image_path(path) {
                kind = Self::Image;
            }
        }
        kind
    }

    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Whether the path looks like a video file.
pub fn is_video_path(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

/// Whether the path looks like an image file.
pub fn is_image_path(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

/// Kind of object a destination id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Text or text+image post.
    Post,
    /// Uploaded video.
    Video,
}

/// Destination identity of a relayed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRef {
    /// Destination platform id.
    pub id: String,
    /// What the id refers to.
    pub kind: DestinationKind,
}

impl DestinationRef {
    /// Reference to a text/image post.
    pub fn post(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DestinationKind::Post,
        }
    }

    /// Reference to a video.
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DestinationKind::Video,
        }
    }

    /// Whether a successor may reference this item natively.
    ///
    /// Videos cannot be the target of a native reference-repost.
    pub fn supports_native_repost(&self) -> bool {
        self.kind == DestinationKind::Post
    }
}

impl std::fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            DestinationKind::Post => write!(f, "post:{}", self.id),
            DestinationKind::Video => write!(f, "video:{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_with_defaults() {
        let item =
            ContentItem::from_json(r#"{"id":"1","author":"alice","timestamp":100}"#).unwrap();
        assert_eq!(item.id, "1");
        assert!(item.text.is_empty());
        assert!(item.media.is_empty());
        assert!(item.quote_chain.is_empty());
        assert!(!item.is_reply);
        assert!(!item.placeholder);
    }

    #[test]
    fn test_from_json_nested_chain() {
        let json = r#"{
            "id": "3", "author": "alice", "text": "top", "timestamp": 300,
            "quote_chain": [
                {"id": "1", "author": "bob", "timestamp": 100},
                {"id": "2", "author": "", "timestamp": 0, "placeholder": true}
            ]
        }"#;
        let item = ContentItem::from_json(json).unwrap();
        assert_eq!(item.quote_chain.len(), 2);
        assert!(item.quote_chain[1].placeholder);
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let item = ContentItem::new("  ", "alice", "hi", 1);
        let err = item.validate().unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_validate_rejects_missing_author_in_chain() {
        let mut item = ContentItem::new("2", "alice", "hi", 2);
        item.quote_chain.push(ContentItem::new("1", "", "x", 1));
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_placeholder_needs_no_author() {
        let mut item = ContentItem::new("2", "alice", "hi", 2);
        item.quote_chain.push(ContentItem::placeholder("1"));
        assert!(item.validate().is_ok());
    }

    #[test]
    fn test_media_kind_classify() {
        let none: [PathBuf; 0] = [];
        assert_eq!(MediaKind::classify(&none), MediaKind::None);
        assert_eq!(
            MediaKind::classify(&[PathBuf::from("a.JPG"), PathBuf::from("b.png")]),
            MediaKind::Image
        );
        assert_eq!(
            MediaKind::classify(&[PathBuf::from("a.jpg"), PathBuf::from("clip.MP4")]),
            MediaKind::Video
        );
        assert_eq!(MediaKind::classify(&[PathBuf::from("notes.txt")]), MediaKind::None);
    }

    #[test]
    fn test_destination_ref_serde() {
        let r = DestinationRef::video("BV1xx");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"id":"BV1xx","kind":"video"}"#);
        let back: DestinationRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert!(!back.supports_native_repost());
        assert!(DestinationRef::post("1").supports_native_repost());
    }

    #[test]
    fn test_destination_ref_display() {
        assert_eq!(DestinationRef::post("dyn_1").to_string(), "post:dyn_1");
        assert_eq!(DestinationRef::video("BV1").to_string(), "video:BV1");
    }
}
