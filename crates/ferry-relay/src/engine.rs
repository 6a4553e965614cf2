//! Relay engine: walks one item's chain and publishes it.
//!
//! # Item lifecycle
//!
//! ```text
//! RESOLVING_CHAIN ──► PUBLISHING_ANCESTORS ──► PUBLISHING_TARGET ──► DONE
//!        │                     │                       │
//!        └─────────────────────┴───────────────────────┴──► ABORTED
//! ```
//!
//! Ancestors are published strictly before their descendant. The first
//! failing node aborts the whole item: a target whose chain is broken is
//! never published on its own. Nothing is retried inside one call; the
//! scheduler offers unresolved items again next cycle.
//!
//! A credential rejection trips the circuit breaker and halts the item;
//! every later item halts too until an operator resumes.

use std::fmt;
use std::sync::Arc;

use ferry_core::{ContentItem, DestinationRef, Sanitizer, prepare_source_text};
use tracing::{debug, error, info, warn};

use crate::adapter::{Destination, MediaTransformer, TransformedMedia, Translator};
use crate::breaker::CircuitBreaker;
use crate::config::RelayConfig;
use crate::control::{ControlHandle, EngineControl};
use crate::error::Result;
use crate::events::EngineEvent;
use crate::governor::RateGovernor;
use crate::resolver::{NodeRole, resolve_chain};
use crate::router::{PublishRouter, RouteInput, RouteOutcome};
use crate::store::IdentityStore;

/// Where in its lifecycle an item stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    ResolvingChain,
    PublishingAncestors,
    PublishingTarget,
    Done,
    Aborted,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResolvingChain => "resolving_chain",
            Self::PublishingAncestors => "publishing_ancestors",
            Self::PublishingTarget => "publishing_target",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Result of [`RelayEngine::relay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The target was published.
    Relayed { destination: DestinationRef },
    /// The target already had a mapping; nothing was published.
    AlreadyRelayed { destination: DestinationRef },
    /// The author is not relayed; the item is marked processed.
    Filtered,
    /// A node failed; the item stays unprocessed for a later cycle.
    Aborted {
        stage: RelayState,
        failed_id: String,
        reason: String,
    },
    /// The circuit breaker is open.
    Halted { reason: String },
}

impl RelayOutcome {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Relayed { .. } => "relayed",
            Self::AlreadyRelayed { .. } => "already_relayed",
            Self::Filtered => "filtered",
            Self::Aborted { .. } => "aborted",
            Self::Halted { .. } => "halted",
        }
    }
}

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub translator: Arc<dyn Translator>,
    pub media: Arc<dyn MediaTransformer>,
    pub destination: Arc<dyn Destination>,
}

/// Result of publishing one node.
enum NodeResult {
    Published(DestinationRef),
    Failed(String),
    Halted(String),
}

/// Orchestrates chain resolution, routing, persistence and pacing.
pub struct RelayEngine {
    config: Arc<RelayConfig>,
    store: Arc<IdentityStore>,
    control: Arc<EngineControl>,
    breaker: Arc<CircuitBreaker>,
    governor: RateGovernor,
    router: PublishRouter,
    translator: Arc<dyn Translator>,
    media: Arc<dyn MediaTransformer>,
    sanitizer: Sanitizer,
}

impl RelayEngine {
    /// Create an engine.
    pub fn new(
        config: RelayConfig,
        store: Arc<IdentityStore>,
        control: Arc<EngineControl>,
        collaborators: Collaborators,
    ) -> Self {
        let config = Arc::new(config);
        let breaker = Arc::new(CircuitBreaker::new(control.clone()));
        let governor = RateGovernor::new(control.clone());
        let router = PublishRouter::new(collaborators.destination, config.clone());

        Self {
            config,
            store,
            control,
            breaker,
            governor,
            router,
            translator: collaborators.translator,
            media: collaborators.media,
            sanitizer: Sanitizer::default(),
        }
    }

    /// Replace the destination sanitizer.
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Operator control surface for this engine.
    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle::new(self.control.clone(), self.breaker.clone(), self.store.clone())
    }

    /// Report publishes that started before a crash and never finished.
    ///
    /// Each is surfaced as an [`EngineEvent::UnknownAttempt`] and cleared;
    /// the item is retried on the next cycle. Returns how many were found.
    pub fn recover_attempts(&self) -> Result<usize> {
        let attempts = self.store.unresolved_attempts()?;
        for attempt in &attempts {
            warn!(
                source_id = %attempt.source_id,
                started_at = attempt.started_at,
                "Publish outcome unknown after restart; destination may hold a duplicate"
            );
            self.control.emit(EngineEvent::UnknownAttempt {
                source_id: attempt.source_id.clone(),
                started_at: attempt.started_at,
            });
            self.store.abandon_attempt(&attempt.source_id)?;
        }
        Ok(attempts.len())
    }

    /// Relay one item and its unrelayed ancestors.
    ///
    /// `Err` means a local failure (store, invalid item). Destination-side
    /// failures come back as [`RelayOutcome::Aborted`] or
    /// [`RelayOutcome::Halted`].
    pub async fn relay(&self, item: &ContentItem) -> Result<RelayOutcome> {
        item.validate()?;

        if let Some(destination) = self.store.get(&item.id)? {
            debug!(source_id = %item.id, %destination, "Item already relayed");
            self.store.mark_processed(&item.id)?;
            return Ok(self.finish(RelayOutcome::AlreadyRelayed { destination }));
        }

        if !self.config.accepts_author(&item.author) {
            debug!(source_id = %item.id, author = %item.author, "Author not relayed");
            self.store.mark_processed(&item.id)?;
            return Ok(self.finish(RelayOutcome::Filtered));
        }

        if let Some(reason) = self.open_breaker_reason() {
            return Ok(self.finish(RelayOutcome::Halted { reason }));
        }

        let plan = resolve_chain(item, |id| self.store.get(id))?;
        for skipped in &plan.skipped_placeholders {
            debug!(source_id = %item.id, placeholder = %skipped, "Skipping unmapped placeholder");
        }
        info!(
            source_id = %item.id,
            chain_len = plan.nodes.len(),
            pending_ancestors = plan.pending_ancestors(),
            "Relaying item"
        );

        let mut predecessor: Option<DestinationRef> = None;
        for node in &plan.nodes {
            if let Some(known) = &node.known {
                predecessor = Some(known.clone());
                continue;
            }

            let stage = match node.role {
                NodeRole::Ancestor => {
                    // Published earlier in this call via another path.
                    if let Some(known) = self.store.get(&node.item.id)? {
                        predecessor = Some(known);
                        continue;
                    }
                    RelayState::PublishingAncestors
                }
                NodeRole::Target => RelayState::PublishingTarget,
            };

            match self.publish_node(node.item, predecessor.as_ref()).await? {
                NodeResult::Published(destination) => predecessor = Some(destination),
                NodeResult::Failed(reason) => {
                    warn!(
                        source_id = %item.id,
                        failed_id = %node.item.id,
                        stage = %stage,
                        reason = %reason,
                        "Chain broken, item aborted"
                    );
                    self.control.record_failure();
                    self.control.emit(EngineEvent::ItemFailed {
                        source_id: item.id.clone(),
                        reason: reason.clone(),
                    });
                    return Ok(self.finish(RelayOutcome::Aborted {
                        stage,
                        failed_id: node.item.id.clone(),
                        reason,
                    }));
                }
                NodeResult::Halted(reason) => {
                    self.control.record_failure();
                    return Ok(self.finish(RelayOutcome::Halted { reason }));
                }
            }
        }

        // The target is always the last node, so the predecessor is its identity.
        let Some(destination) = predecessor else {
            return Err(crate::Error::Store(format!(
                "no destination recorded for {}",
                item.id
            )));
        };
        self.store.mark_processed(&item.id)?;
        self.control.record_success();
        info!(source_id = %item.id, %destination, state = %RelayState::Done, "Item relayed");
        Ok(self.finish(RelayOutcome::Relayed { destination }))
    }

    /// Count and announce an item that failed outside the chain walk.
    pub(crate) fn record_item_error(&self, source_id: &str, reason: &str) {
        self.control.record_failure();
        self.control.emit(EngineEvent::ItemFailed {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        });
        metrics::counter!("relay_items_total", "outcome" => "error").increment(1);
    }

    fn open_breaker_reason(&self) -> Option<String> {
        if !self.breaker.is_open() {
            return None;
        }
        Some(
            self.breaker
                .snapshot()
                .reason
                .unwrap_or_else(|| "circuit open".to_string()),
        )
    }

    fn finish(&self, outcome: RelayOutcome) -> RelayOutcome {
        metrics::counter!("relay_items_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Translate, transform, publish, persist and cool down one node.
    async fn publish_node(
        &self,
        item: &ContentItem,
        predecessor: Option<&DestinationRef>,
    ) -> Result<NodeResult> {
        let prepared = prepare_source_text(&item.text);
        let translated = if prepared.trim().is_empty() {
            String::new()
        } else {
            self.translator.translate(&prepared).await
        };
        let text = self.sanitizer.sanitize(&translated);

        let media = if item.has_media() {
            self.media.transform(&item.media).await
        } else {
            TransformedMedia::none()
        };

        let result = self.publish_transformed(item, &text, &media, predecessor).await;
        self.media.release(&media).await;
        result
    }

    async fn publish_transformed(
        &self,
        item: &ContentItem,
        text: &str,
        media: &TransformedMedia,
        predecessor: Option<&DestinationRef>,
    ) -> Result<NodeResult> {
        // Pauses are observed here, never mid-call.
        self.governor.await_runnable().await;
        if let Some(reason) = self.open_breaker_reason() {
            return Ok(NodeResult::Halted(reason));
        }

        self.store.begin_attempt(&item.id)?;
        let routed = self
            .router
            .publish(RouteInput {
                item,
                text,
                media,
                predecessor,
            })
            .await;

        match routed {
            Ok(RouteOutcome::Published { destination, plan }) => {
                if !self.store.put(&item.id, &destination)? {
                    warn!(source_id = %item.id, %destination, "Published a node that already had a mapping");
                }
                metrics::counter!("relay_publish_total", "strategy" => plan.strategy())
                    .increment(1);
                if plan.carries_media() {
                    self.control.record_media();
                }
                info!(
                    source_id = %item.id,
                    %destination,
                    strategy = plan.strategy(),
                    "Published node"
                );
                self.control.emit(EngineEvent::Published {
                    source_id: item.id.clone(),
                    destination: destination.clone(),
                    strategy: plan.strategy(),
                });
                ferry_core::metrics::set_gauge(
                    "relay_identity_entries",
                    self.store.mapping_count() as f64,
                );

                self.governor.cooldown(self.config.cooldown).await;
                Ok(NodeResult::Published(destination))
            }
            Ok(RouteOutcome::Failed { plan, error }) => {
                self.store.abandon_attempt(&item.id)?;
                metrics::counter!("relay_publish_failures_total", "reason" => error.label())
                    .increment(1);
                warn!(
                    source_id = %item.id,
                    strategy = plan.strategy(),
                    error = %error,
                    "Publish failed"
                );
                Ok(NodeResult::Failed(error.to_string()))
            }
            Err(rejected) => {
                self.store.abandon_attempt(&item.id)?;
                metrics::counter!("relay_publish_failures_total", "reason" => "auth").increment(1);
                error!(source_id = %item.id, reason = %rejected.reason, "Credentials rejected");
                self.breaker.trip(rejected.reason.clone());
                Ok(NodeResult::Halted(rejected.reason))
            }
        }
    }
}
