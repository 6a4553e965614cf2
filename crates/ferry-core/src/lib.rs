//! Core types, content rendering, and shared utilities for the ferry relay.
//!
//! This crate provides:
//! - The content item model handed to the relay engine by the timeline fetcher
//! - Destination identity references persisted in the identity store
//! - A structured content builder that renders destination post text once
//! - Text preparation and destination sanitizing
//! - Prometheus metrics helpers
//! - Shared error types

pub mod content;
mod error;
mod item;
pub mod metrics;
pub mod sanitize;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// File extensions treated as video media.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm"];

/// File extensions treated as image media.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

pub use content::{ContentBuilder, PostBody};
pub use error::{Error, Result};
pub use item::{
    ContentItem, DestinationKind, DestinationRef, MediaKind, is_image_path, is_video_path,
};
pub use sanitize::{Sanitizer, prepare_source_text};
