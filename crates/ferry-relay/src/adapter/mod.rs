//! Collaborator traits at the engine's edges.
//!
//! The engine is generic over three seams:
//!
//! - [`Translator`] - source text to destination language (fail-open)
//! - [`MediaTransformer`] - source media to destination-ready files (fail-open)
//! - [`Destination`] - the destination platform's publish API
//!
//! Translator and media transformer never fail from the engine's point of
//! view: on trouble they hand back their input. Destination calls return a
//! typed [`PublishError`], and only [`PublishError::AuthRejected`] is fatal.

pub mod destination;
pub mod media;
pub mod translator;

pub use destination::{DynamicClient, DynamicConfig};
pub use media::{FfmpegTransformer, MediaConfig};
pub use translator::{ChatTranslator, TranslatorConfig};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_core::{DestinationRef, MediaKind, PostBody, is_image_path, is_video_path};
use thiserror::Error;

/// Why a destination publish failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Credentials rejected (HTTP 401/403 or an auth error code). Fatal.
    #[error("credentials rejected: {0}")]
    AuthRejected(String),

    /// The destination refused this particular item.
    #[error("rejected by destination: {0}")]
    Rejected(String),

    /// Transport failure or unexpected response.
    #[error("network error: {0}")]
    Network(String),

    /// Media could not be read or uploaded.
    #[error("media error: {0}")]
    Media(String),
}

impl PublishError {
    /// Whether the error must open the circuit breaker.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AuthRejected(_) => "auth",
            Self::Rejected(_) => "rejected",
            Self::Network(_) => "network",
            Self::Media(_) => "media",
        }
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Self::AuthRejected(status.to_string())
            }
            _ => Self::Network(err.to_string()),
        }
    }
}

/// Media after transformation, ready for upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformedMedia {
    /// Files in display order.
    pub paths: Vec<PathBuf>,
    /// Classification of `paths`.
    pub kind: MediaKind,
}

impl TransformedMedia {
    /// No media.
    pub fn none() -> Self {
        Self::default()
    }

    /// Wrap paths as-is, classifying them.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        let kind = MediaKind::classify(&paths);
        Self { paths, kind }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Image files, in order.
    pub fn images(&self) -> Vec<PathBuf> {
        self.paths
            .iter()
            .filter(|p| is_image_path(p))
            .cloned()
            .collect()
    }

    /// First video file, if any.
    pub fn first_video(&self) -> Option<&Path> {
        self.paths
            .iter()
            .map(PathBuf::as_path)
            .find(|p| is_video_path(p))
    }
}

/// Source-to-destination language translation.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text`. Must return the input unchanged on any failure.
    async fn translate(&self, text: &str) -> String;
}

/// Source media to destination-ready files.
#[async_trait]
pub trait MediaTransformer: Send + Sync {
    /// Transform media. Must return the inputs unchanged on any failure.
    async fn transform(&self, media: &[PathBuf]) -> TransformedMedia;

    /// Delete artifacts produced by [`transform`](Self::transform).
    async fn release(&self, _media: &TransformedMedia) {}
}

/// The destination platform's publish API.
///
/// Every method returns the new object's destination id on success.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Text post with zero or more images.
    async fn publish_standalone(
        &self,
        body: &PostBody,
        images: &[PathBuf],
    ) -> Result<String, PublishError>;

    /// Native reference-repost of an existing post.
    async fn publish_repost(&self, body: &PostBody, predecessor_id: &str)
    -> Result<String, PublishError>;

    /// Video upload.
    async fn publish_video(&self, body: &PostBody, video: &Path) -> Result<String, PublishError>;

    /// Public location of a destination object, for back-links.
    fn location(&self, destination: &DestinationRef) -> String;
}

/// Translator that returns its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Media transformer that returns its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughMedia;

#[async_trait]
impl MediaTransformer for PassthroughMedia {
    async fn transform(&self, media: &[PathBuf]) -> TransformedMedia {
        TransformedMedia::from_paths(media.to_vec())
    }
}
