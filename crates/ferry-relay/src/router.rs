//! Publish routing: picks a destination strategy for one chain node and
//! renders its text.
//!
//! # Decision table
//!
//! First match wins:
//!
//! | Predecessor          | Node media             | Plan                              |
//! |----------------------|------------------------|-----------------------------------|
//! | none                 | none                   | standalone text post              |
//! | none                 | video, uploads enabled | video upload                      |
//! | none                 | otherwise              | standalone post with images       |
//! | post                 | none                   | native reference-repost           |
//! | post or video        | any                    | same as no predecessor + back-link |
//!
//! The last row is the downgrade: when a native reference is impossible
//! (media attached, or the predecessor is a video), the node is published
//! standalone with an explicit link to the predecessor's location.
//!
//! "Node media" means any file the node carries, attachable or not. With
//! video uploads disabled only image files are attached, but a node with
//! video-only (or unrecognised) media is still downgraded, never reposted,
//! so the back-link keeps it traceable.

use std::path::PathBuf;
use std::sync::Arc;

use ferry_core::content::{format_title, reply_header, truncate_chars};
use ferry_core::{ContentBuilder, ContentItem, DestinationRef, PostBody};
use thiserror::Error;
use tracing::{debug, warn};

use crate::adapter::{Destination, PublishError, TransformedMedia};
use crate::config::RelayConfig;

/// Input for one publish.
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub item: &'a ContentItem,
    /// Translated, sanitized body text.
    pub text: &'a str,
    pub media: &'a TransformedMedia,
    /// Destination identity of the previous relayed node.
    pub predecessor: Option<&'a DestinationRef>,
}

/// How a node will be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishPlan {
    /// Text post with zero or more images.
    Standalone {
        images: Vec<PathBuf>,
        back_link: Option<DestinationRef>,
    },
    /// Video upload.
    Video {
        path: PathBuf,
        back_link: Option<DestinationRef>,
    },
    /// Native reference-repost.
    Repost { predecessor: DestinationRef },
}

impl PublishPlan {
    /// Apply the decision table.
    pub fn decide(
        media: &TransformedMedia,
        predecessor: Option<&DestinationRef>,
        publish_video: bool,
    ) -> Self {
        let video = publish_video
            .then(|| media.first_video().map(PathBuf::from))
            .flatten();
        let images = media.images();
        let carries_media = !media.is_empty();

        match predecessor {
            Some(prev) if prev.supports_native_repost() && !carries_media => Self::Repost {
                predecessor: prev.clone(),
            },
            _ => {
                let back_link = predecessor.cloned();
                match video {
                    Some(path) => Self::Video { path, back_link },
                    None => Self::Standalone { images, back_link },
                }
            }
        }
    }

    /// Stable label for logs and metrics.
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Standalone {
                back_link: None, ..
            } => "standalone",
            Self::Standalone { .. } => "standalone_downgrade",
            Self::Video {
                back_link: None, ..
            } => "video",
            Self::Video { .. } => "video_downgrade",
            Self::Repost { .. } => "repost",
        }
    }

    /// Predecessor linked in the text, for downgrades.
    pub fn back_link(&self) -> Option<&DestinationRef> {
        match self {
            Self::Standalone { back_link, .. } | Self::Video { back_link, .. } => back_link.as_ref(),
            Self::Repost { .. } => None,
        }
    }

    /// Whether the publish uploads any media.
    pub fn carries_media(&self) -> bool {
        match self {
            Self::Standalone { images, .. } => !images.is_empty(),
            Self::Video { .. } => true,
            Self::Repost { .. } => false,
        }
    }
}

/// The destination rejected our credentials. Fatal for the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("credentials rejected: {reason}")]
pub struct CredentialsRejected {
    pub reason: String,
}

/// Non-fatal result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Published; the identity is always non-empty.
    Published {
        destination: DestinationRef,
        plan: PublishPlan,
    },
    /// Chain-break: the destination refused or the call failed.
    Failed {
        plan: PublishPlan,
        error: PublishError,
    },
}

/// Routes chain nodes to the destination.
pub struct PublishRouter {
    destination: Arc<dyn Destination>,
    config: Arc<RelayConfig>,
}

impl PublishRouter {
    pub fn new(destination: Arc<dyn Destination>, config: Arc<RelayConfig>) -> Self {
        Self {
            destination,
            config,
        }
    }

    /// Plan for an input under the current configuration.
    pub fn plan(&self, input: &RouteInput<'_>) -> PublishPlan {
        PublishPlan::decide(input.media, input.predecessor, self.config.publish_video)
    }

    /// Render the destination text for a plan.
    pub fn render(&self, input: &RouteInput<'_>, plan: &PublishPlan) -> PostBody {
        let item = input.item;
        let mut builder = ContentBuilder::new(input.text)
            .title(format_title(&self.config.group_name, item.timestamp))
            .footer(item.id.as_str());
        if item.is_reply {
            builder = builder.header(reply_header(&self.config.display_name(&item.author)));
        }
        if let Some(prev) = plan.back_link() {
            builder = builder.back_link(self.destination.location(prev));
        }

        match plan {
            PublishPlan::Standalone { .. } => builder.render(self.config.title_limit),
            PublishPlan::Video { .. } => {
                let mut body = builder.render(self.config.video_title_limit);
                body.text = truncate_chars(&body.text, self.config.body_limit);
                body
            }
            PublishPlan::Repost { .. } => builder.render_inline_title(),
        }
    }

    /// Publish one node.
    ///
    /// Returns `Err` only on credential rejection; every other failure is a
    /// [`RouteOutcome::Failed`].
    pub async fn publish(
        &self,
        input: RouteInput<'_>,
    ) -> Result<RouteOutcome, CredentialsRejected> {
        let plan = self.plan(&input);
        let body = self.render(&input, &plan);
        debug!(
            source_id = %input.item.id,
            strategy = plan.strategy(),
            destination = self.destination.name(),
            "Publishing node"
        );

        let result = match &plan {
            PublishPlan::Standalone { images, .. } => self
                .destination
                .publish_standalone(&body, images)
                .await
                .map(DestinationRef::post),
            PublishPlan::Video { path, .. } => self
                .destination
                .publish_video(&body, path)
                .await
                .map(DestinationRef::video),
            PublishPlan::Repost { predecessor } => self
                .destination
                .publish_repost(&body, &predecessor.id)
                .await
                .map(DestinationRef::post),
        };

        match result {
            Ok(destination) if destination.id.trim().is_empty() => {
                warn!(source_id = %input.item.id, "Destination returned an empty id");
                Ok(RouteOutcome::Failed {
                    plan,
                    error: PublishError::Rejected("empty destination id".to_string()),
                })
            }
            Ok(destination) => Ok(RouteOutcome::Published { destination, plan }),
            Err(PublishError::AuthRejected(reason)) => Err(CredentialsRejected { reason }),
            Err(error) => Ok(RouteOutcome::Failed { plan, error }),
        }
    }
}
