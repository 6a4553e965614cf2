//! Item sources.
//!
//! The engine never parses raw platform payloads: a source hands over
//! fully-formed [`ContentItem`]s, quote chains already flattened.
//!
//! # Available Sources
//!
//! - [`InboxSource`] - Drains `*.json` / `*.jsonl` files dropped into a directory

mod inbox;

pub use inbox::{InboxConfig, InboxSource};

use async_trait::async_trait;
use ferry_core::ContentItem;

use crate::Result;

/// A source of content items, polled once per cycle.
#[async_trait]
pub trait ItemSource: Send {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Fetch the items currently available.
    ///
    /// Items may repeat across fetches; the scheduler skips processed ones.
    async fn fetch(&mut self) -> Result<Vec<ContentItem>>;
}

/// Statistics from one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Files read.
    pub files_processed: usize,
    /// Items that parsed and validated.
    pub valid_items: usize,
    /// Lines or entries that did not.
    pub invalid_items: usize,
    /// Files left in place because they end mid-document.
    pub files_deferred: usize,
}
