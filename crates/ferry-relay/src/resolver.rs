//! Quote-chain resolution.
//!
//! Turns an item and its flattened `quote_chain` into an ordered list of
//! nodes, oldest first, with the target last. Each ancestor is either
//! already known at the destination or needs to be relayed first.
//!
//! Placeholder ancestors are never relayed. A placeholder with a stored
//! mapping still anchors its successor; one without is skipped, so the
//! successor falls back to the nearest real predecessor.

use ferry_core::{ContentItem, DestinationRef};

use crate::error::Result;

/// Position of a node in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// A referenced item published before the target.
    Ancestor,
    /// The item being relayed.
    Target,
}

/// One step of a resolved chain.
#[derive(Debug, Clone)]
pub struct ChainNode<'a> {
    pub item: &'a ContentItem,
    pub role: NodeRole,
    /// Destination identity if the node is already relayed.
    pub known: Option<DestinationRef>,
}

impl ChainNode<'_> {
    /// Whether this node must be published.
    pub fn needs_relay(&self) -> bool {
        self.known.is_none()
    }
}

/// Result of [`resolve_chain`].
#[derive(Debug, Clone)]
pub struct ChainPlan<'a> {
    /// Nodes oldest first; the target is always last.
    pub nodes: Vec<ChainNode<'a>>,
    /// Ids of unmapped placeholder ancestors that were dropped.
    pub skipped_placeholders: Vec<&'a str>,
}

impl<'a> ChainPlan<'a> {
    /// Ancestors that still need publishing.
    pub fn pending_ancestors(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.role == NodeRole::Ancestor && n.needs_relay())
            .count()
    }

    /// The target node.
    pub fn target(&self) -> &ChainNode<'a> {
        // resolve_chain always pushes the target last.
        &self.nodes[self.nodes.len() - 1]
    }
}

/// Resolve an item's chain against a mapping lookup.
///
/// `lookup` is usually [`IdentityStore::get`](crate::IdentityStore::get).
/// Ancestors sharing an id with an earlier ancestor (or with the target)
/// are collapsed so nothing is published twice.
pub fn resolve_chain<'a, F>(item: &'a ContentItem, mut lookup: F) -> Result<ChainPlan<'a>>
where
    F: FnMut(&str) -> Result<Option<DestinationRef>>,
{
    let mut nodes = Vec::with_capacity(item.quote_chain.len() + 1);
    let mut skipped_placeholders = Vec::new();

    for ancestor in &item.quote_chain {
        if ancestor.id == item.id || nodes.iter().any(|n: &ChainNode| n.item.id == ancestor.id) {
            continue;
        }

        let known = lookup(&ancestor.id)?;
        if ancestor.placeholder && known.is_none() {
            skipped_placeholders.push(ancestor.id.as_str());
            continue;
        }

        nodes.push(ChainNode {
            item: ancestor,
            role: NodeRole::Ancestor,
            known,
        });
    }

    nodes.push(ChainNode {
        item,
        role: NodeRole::Target,
        known: None,
    });

    Ok(ChainPlan {
        nodes,
        skipped_placeholders,
    })
}
