//! Media transformation into a publish work directory.
//!
//! Every source file is copied to `{work_dir}/final_{index}_{name}`, where
//! `index` is its position in the item, so equal names from different
//! directories never collide. Videos are
//! optionally re-encoded to H.264 with ffmpeg first; if ffmpeg fails the
//! plain copy is used. If even the copy fails the source path is handed
//! through untouched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_core::is_video_path;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{MediaTransformer, TransformedMedia};

const ARTIFACT_PREFIX: &str = "final_";

/// Configuration for [`FfmpegTransformer`].
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Directory for transformed files.
    pub work_dir: PathBuf,
    /// ffmpeg binary.
    pub ffmpeg: PathBuf,
    /// Re-encode videos to H.264.
    pub reencode: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./data/publish"),
            ffmpeg: PathBuf::from("ffmpeg"),
            reencode: false,
        }
    }
}

impl MediaConfig {
    /// Load from `MEDIA_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            work_dir: std::env::var("MEDIA_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            ffmpeg: std::env::var("MEDIA_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg),
            reencode: std::env::var("MEDIA_REENCODE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.reencode),
        };

        info!(
            work_dir = %config.work_dir.display(),
            reencode = config.reencode,
            "Media configuration loaded"
        );
        config
    }
}

/// Copies media into the work dir, re-encoding videos on request.
pub struct FfmpegTransformer {
    config: MediaConfig,
}

impl FfmpegTransformer {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    fn artifact_path(&self, index: usize, source: &Path) -> Option<PathBuf> {
        let name = source.file_name()?.to_str()?;
        Some(
            self.config
                .work_dir
                .join(format!("{ARTIFACT_PREFIX}{index}_{name}")),
        )
    }

    fn is_artifact(&self, path: &Path) -> bool {
        path.parent() == Some(self.config.work_dir.as_path())
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(ARTIFACT_PREFIX))
    }

    async fn reencode(&self, source: &Path, output: &Path) -> bool {
        let result = Command::new(&self.config.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(["-c:v", "libx264", "-preset", "fast", "-crf", "23", "-c:a", "copy"])
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                warn!(
                    source = %source.display(),
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr).lines().last().unwrap_or(""),
                    "ffmpeg failed, falling back to copy"
                );
                false
            }
            Err(e) => {
                warn!(error = %e, "ffmpeg could not be started, falling back to copy");
                false
            }
        }
    }

    async fn transform_one(&self, index: usize, source: &Path) -> PathBuf {
        let Some(output) = self.artifact_path(index, source) else {
            return source.to_path_buf();
        };

        if self.config.reencode && is_video_path(source) && self.reencode(source, &output).await {
            debug!(output = %output.display(), "Re-encoded video");
            return output;
        }

        match tokio::fs::copy(source, &output).await {
            Ok(_) => output,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Media copy failed, using source file");
                source.to_path_buf()
            }
        }
    }
}

#[async_trait]
impl MediaTransformer for FfmpegTransformer {
    async fn transform(&self, media: &[PathBuf]) -> TransformedMedia {
        if media.is_empty() {
            return TransformedMedia::none();
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.config.work_dir).await {
            warn!(error = %e, "Cannot create media work dir, using source files");
            return TransformedMedia::from_paths(media.to_vec());
        }

        let mut paths = Vec::with_capacity(media.len());
        for (index, source) in media.iter().enumerate() {
            paths.push(self.transform_one(index, source).await);
        }
        TransformedMedia::from_paths(paths)
    }

    async fn release(&self, media: &TransformedMedia) {
        for path in media.paths.iter().filter(|p| self.is_artifact(p)) {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "Could not remove media artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::MediaKind;
    use tempfile::TempDir;

    fn transformer(work: &TempDir) -> FfmpegTransformer {
        FfmpegTransformer::new(MediaConfig {
            work_dir: work.path().join("publish"),
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            reencode: true,
        })
    }

    #[tokio::test]
    async fn test_copies_into_work_dir_and_releases() {
        let src = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let image = src.path().join("pic.jpg");
        std::fs::write(&image, b"jpeg").unwrap();

        let t = transformer(&work);
        let media = t.transform(std::slice::from_ref(&image)).await;
        assert_eq!(media.kind, MediaKind::Image);
        assert_eq!(media.paths[0], work.path().join("publish/final_0_pic.jpg"));
        assert!(media.paths[0].exists());

        t.release(&media).await;
        assert!(!media.paths[0].exists());
        // Source is never touched
        assert!(image.exists());
    }

    #[tokio::test]
    async fn test_same_file_names_get_distinct_artifacts() {
        let src = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let first = src.path().join("a/photo.jpg");
        let second = src.path().join("b/photo.jpg");
        for (path, body) in [(&first, b"first"), (&second, b"secnd")] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }

        let t = transformer(&work);
        let media = t.transform(&[first, second]).await;
        assert_eq!(media.paths.len(), 2);
        assert_ne!(media.paths[0], media.paths[1]);
        assert_eq!(std::fs::read(&media.paths[0]).unwrap(), b"first");
        assert_eq!(std::fs::read(&media.paths[1]).unwrap(), b"secnd");

        t.release(&media).await;
        assert!(media.paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_broken_ffmpeg_falls_back_to_copy() {
        let src = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let video = src.path().join("clip.mp4");
        std::fs::write(&video, b"mp4").unwrap();

        let media = transformer(&work).transform(&[video]).await;
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(std::fs::read(&media.paths[0]).unwrap(), b"mp4");
    }

    #[tokio::test]
    async fn test_missing_source_passes_through() {
        let work = TempDir::new().unwrap();
        let missing = PathBuf::from("/nonexistent/pic.png");
        let t = transformer(&work);
        let media = t.transform(std::slice::from_ref(&missing)).await;
        assert_eq!(media.paths, vec![missing]);

        // Release never deletes files outside the work dir
        t.release(&media).await;
    }
}
