//! Directory inbox source.
//!
//! An upstream fetcher drops parsed items into a directory. Each `*.jsonl`
//! file holds one item per line; each `*.json` file holds one item or an
//! array of items. Files are read in name order and removed once consumed.
//! Bad lines are logged and skipped; they never block the rest of the file.
//!
//! Writers should publish files atomically: write `name.tmp`, then rename it
//! to `name.json` or `name.jsonl`. Other extensions are never read. A file
//! that still ends mid-document (truncated JSON, or a `.jsonl` whose last
//! line is unterminated and unparseable) is left untouched and retried on
//! the next fetch.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_core::ContentItem;
use tracing::{debug, info, warn};

use super::{ItemSource, SourceStats};
use crate::{Error, Result};

/// Configuration for the inbox source.
#[derive(Debug, Clone)]
pub struct InboxConfig {
    /// Directory to drain.
    pub dir: PathBuf,

    /// Delete files after reading them.
    pub delete_consumed: bool,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/inbox"),
            delete_consumed: true,
        }
    }
}

/// Directory inbox item source.
pub struct InboxSource {
    config: InboxConfig,
    last_stats: SourceStats,
}

impl InboxSource {
    /// Create a new inbox source with the given configuration.
    pub fn new(config: InboxConfig) -> Self {
        Self {
            config,
            last_stats: SourceStats::default(),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &InboxConfig {
        &self.config
    }

    /// Statistics from the most recent fetch.
    pub fn last_stats(&self) -> &SourceStats {
        &self.last_stats
    }
}

#[async_trait]
impl ItemSource for InboxSource {
    fn name(&self) -> &'static str {
        "inbox"
    }

    async fn fetch(&mut self) -> Result<Vec<ContentItem>> {
        let config = self.config.clone();
        let (items, stats) = tokio::task::spawn_blocking(move || drain(&config))
            .await
            .map_err(|e| Error::Source(format!("inbox reader panicked: {e}")))??;

        if stats.files_processed > 0 || stats.files_deferred > 0 {
            info!(
                files = stats.files_processed,
                deferred = stats.files_deferred,
                valid = stats.valid_items,
                invalid = stats.invalid_items,
                "Drained inbox"
            );
        }
        self.last_stats = stats;
        Ok(items)
    }
}

/// Collect inbox files in name order.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == "json" || ext == "jsonl")
        })
        .collect();

    // Sort for deterministic processing order
    files.sort();
    Ok(files)
}

fn drain(config: &InboxConfig) -> Result<(Vec<ContentItem>, SourceStats)> {
    let mut stats = SourceStats::default();
    let mut items = Vec::new();

    for path in collect_files(&config.dir)? {
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                continue;
            }
        };

        let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
        if !is_complete(&contents, is_jsonl) {
            debug!("{} still being written, left in place", path.display());
            stats.files_deferred += 1;
            continue;
        }

        if is_jsonl {
            parse_lines(&path, &contents, &mut items, &mut stats);
        } else {
            parse_document(&path, &contents, &mut items, &mut stats);
        }
        stats.files_processed += 1;

        if config.delete_consumed
            && let Err(e) = fs::remove_file(&path)
        {
            warn!("Cannot remove consumed {}: {}", path.display(), e);
        }
    }

    Ok((items, stats))
}

/// False when the file ends mid-document, i.e. a writer is not done with it.
fn is_complete(contents: &str, is_jsonl: bool) -> bool {
    if is_jsonl {
        if contents.ends_with('\n') {
            return true;
        }
        return match contents.lines().last() {
            Some(last) if !last.trim().is_empty() => {
                serde_json::from_str::<serde_json::Value>(last).is_ok()
            }
            _ => true,
        };
    }

    match serde_json::from_str::<serde_json::Value>(contents) {
        Ok(_) => true,
        Err(e) => !e.is_eof(),
    }
}

fn accept(
    path: &Path,
    label: &str,
    parsed: ferry_core::Result<ContentItem>,
    items: &mut Vec<ContentItem>,
    stats: &mut SourceStats,
) {
    match parsed.and_then(|item| item.validate().map(|_| item)) {
        Ok(item) => {
            stats.valid_items += 1;
            items.push(item);
        }
        Err(e) => {
            warn!("{} {}: {}", path.display(), label, e);
            stats.invalid_items += 1;
        }
    }
}

fn parse_lines(path: &Path, contents: &str, items: &mut Vec<ContentItem>, stats: &mut SourceStats) {
    for (line_num, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let label = format!("line {}", line_num + 1);
        accept(path, &label, ContentItem::from_json(line), items, stats);
    }
}

fn parse_document(path: &Path, contents: &str, items: &mut Vec<ContentItem>, stats: &mut SourceStats) {
    let value: serde_json::Value = match serde_json::from_str(contents) {
        Ok(v) => v,
        Err(e) => {
            warn!("{}: JSON parse error: {}", path.display(), e);
            stats.invalid_items += 1;
            return;
        }
    };

    match value {
        serde_json::Value::Array(entries) => {
            debug!("{}: {} entries", path.display(), entries.len());
            for (idx, entry) in entries.into_iter().enumerate() {
                let parsed = serde_json::from_value(entry).map_err(ferry_core::Error::from);
                accept(path, &format!("entry {idx}"), parsed, items, stats);
            }
        }
        other => {
            let parsed = serde_json::from_value(other).map_err(ferry_core::Error::from);
            accept(path, "document", parsed, items, stats);
        }
    }
}
