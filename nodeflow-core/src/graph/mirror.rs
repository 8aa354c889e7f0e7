//! Graph Mirror
//!
//! A lightweight copy of one live node tree, kept in sync through discrete
//! events instead of full rescans. The mirror is what the scheduler walks;
//! the live tree is only consulted to resolve new ids.
//!
//! # Event application
//!
//! A batch is applied in two passes: every event carrying a node id first,
//! then every event carrying a link id. Resolving a link needs both endpoint
//! nodes in the mirror, and the host may report a link before the node it
//! attaches to.
//!
//! # Outdated rules
//!
//! - A new node is outdated.
//! - A node whose properties changed is outdated.
//! - A node gaining or losing an input link is outdated.
//! - A node gaining its first output link is outdated. Losing its last output
//!   link does not clear anything.

use std::collections::BTreeSet;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info, trace, warn};

use super::event::{EventKind, TreeEvent};
use super::node::{Link, LinkId, Node, NodeId, TreeId};
use super::scheduler::{Recalculated, WalkState, WorthRecalculating};
use super::traverse::Traversal;
use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::host::{HostGraph, NodeProcessor};

/// Outcome of comparing a mirror against its live tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Nodes in the live tree the mirror doesn't know.
    pub missing_nodes: BTreeSet<NodeId>,
    /// Nodes in the mirror the live tree no longer has.
    pub extra_nodes: BTreeSet<NodeId>,
    pub missing_links: BTreeSet<LinkId>,
    pub extra_links: BTreeSet<LinkId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_nodes.is_empty()
            && self.extra_nodes.is_empty()
            && self.missing_links.is_empty()
            && self.extra_links.is_empty()
    }
}

/// Mirror of a single node tree.
#[derive(Debug, Clone)]
pub struct GraphMirror {
    id: TreeId,
    nodes: IndexMap<NodeId, Node>,
    links: IndexMap<LinkId, Link>,
    walk: WalkState,

    /// Set whenever a node or link is added or removed. Cleared once the
    /// walk has re-derived output reachability.
    topology_changed: bool,
}

impl GraphMirror {
    /// Create an empty mirror.
    pub fn new(id: TreeId) -> Self {
        Self {
            id,
            nodes: IndexMap::new(),
            links: IndexMap::new(),
            walk: WalkState::default(),
            topology_changed: true,
        }
    }

    pub fn id(&self) -> &TreeId {
        &self.id
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn link(&self, id: &LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn link_ids(&self) -> BTreeSet<LinkId> {
        self.links.keys().cloned().collect()
    }

    /// Whether the mirror must be rebuilt from the live tree.
    ///
    /// An empty mirror can't be told apart from one that was never synced. A
    /// live tree with no nodes has nothing to schedule, so treating it as
    /// unsynced costs nothing.
    pub fn needs_full_resync(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn topology_changed(&self) -> bool {
        self.topology_changed
    }

    /// Sets computed by the last walk.
    pub fn walk_state(&self) -> &WalkState {
        &self.walk
    }

    /// Re-add every node and link of the live tree.
    ///
    /// Re-adding a known id refreshes it in place, so calling this on a
    /// populated mirror does not duplicate anything.
    pub fn full_resync<H: HostGraph + ?Sized>(&mut self, host: &H) -> UpdateResult<()> {
        let node_ids = host.node_ids(&self.id)?;
        let link_ids = host.link_ids(&self.id)?;
        debug!(tree = %self.id, nodes = node_ids.len(), links = link_ids.len(), "full resync");

        for node in &node_ids {
            self.add_node(host, node)?;
        }
        for link in &link_ids {
            self.add_link(host, link)?;
        }
        self.topology_changed = true;
        Ok(())
    }

    /// Compare mirror ids with live ids.
    ///
    /// O(tree size); only meant for debug configurations.
    pub fn verify_consistency<H: HostGraph + ?Sized>(
        &self,
        host: &H,
    ) -> UpdateResult<ConsistencyReport> {
        let live_nodes: BTreeSet<NodeId> = host.node_ids(&self.id)?.into_iter().collect();
        let live_links: BTreeSet<LinkId> = host.link_ids(&self.id)?.into_iter().collect();
        let nodes = self.node_ids();
        let links = self.link_ids();

        Ok(ConsistencyReport {
            missing_nodes: live_nodes.difference(&nodes).cloned().collect(),
            extra_nodes: nodes.difference(&live_nodes).cloned().collect(),
            missing_links: live_links.difference(&links).cloned().collect(),
            extra_links: links.difference(&live_links).cloned().collect(),
        })
    }

    /// Apply a batch of events.
    ///
    /// An unsynced mirror is rebuilt from the live tree instead, which
    /// already reflects the batch. In debug mode the result is checked
    /// against the live tree and logged; the check never fails the call.
    pub fn update_reconstruction<H: HostGraph + ?Sized>(
        &mut self,
        host: &H,
        events: &[TreeEvent],
        config: &UpdateConfig,
    ) -> UpdateResult<()> {
        if self.needs_full_resync() {
            self.full_resync(host)?;
        } else {
            if config.is_in_debug_mode() {
                for event in events {
                    let topology = event.kind.changes_topology();
                    debug!(tree = %self.id, %event, topology, "update event");
                }
            }

            // nodes should be first
            for event in events {
                if let Some(node) = event.node_id() {
                    self.apply_node_event(host, event.kind, node)?;
                }
            }
            for event in events {
                if let Some(link) = event.link_id() {
                    self.apply_link_event(host, event.kind, link)?;
                }
            }
        }

        if config.is_in_debug_mode() {
            self.log_consistency(host);
        }
        Ok(())
    }

    fn apply_node_event<H: HostGraph + ?Sized>(
        &mut self,
        host: &H,
        kind: EventKind,
        node: &NodeId,
    ) -> UpdateResult<()> {
        match kind {
            EventKind::AddNode | EventKind::CopyNode => self.add_node(host, node),
            EventKind::FreeNode => self.free_node(node),
            EventKind::NodePropertyUpdate => self.set_outdated(node),
            EventKind::AddLink | EventKind::FreeLink => {
                Err(UpdateError::UnhandledEvent { kind, payload: "node" })
            }
        }
    }

    fn apply_link_event<H: HostGraph + ?Sized>(
        &mut self,
        host: &H,
        kind: EventKind,
        link: &LinkId,
    ) -> UpdateResult<()> {
        match kind {
            EventKind::AddLink => self.add_link(host, link),
            EventKind::FreeLink => self.free_link(link),
            EventKind::AddNode
            | EventKind::CopyNode
            | EventKind::FreeNode
            | EventKind::NodePropertyUpdate => {
                Err(UpdateError::UnhandledEvent { kind, payload: "link" })
            }
        }
    }

    fn log_consistency<H: HostGraph + ?Sized>(&self, host: &H) {
        match self.verify_consistency(host) {
            Ok(report) if report.is_consistent() => {
                info!(tree = %self.id, "reconstruction is correct");
            }
            Ok(report) => {
                warn!(tree = %self.id, ?report, "reconstruction does not match the live tree");
            }
            Err(err) => {
                warn!(tree = %self.id, %err, "could not verify reconstruction");
            }
        }
    }

    /// Mirror a node of the live tree.
    pub fn add_node<H: HostGraph + ?Sized>(&mut self, host: &H, node: &NodeId) -> UpdateResult<()> {
        let live = host.node(&self.id, node)?;
        self.insert_node(node.clone(), live.name);
        Ok(())
    }

    /// Insert a node without consulting the host.
    ///
    /// A known id keeps its links and is renamed and marked outdated.
    pub fn insert_node(&mut self, id: NodeId, name: impl Into<String>) {
        match self.nodes.get_mut(&id) {
            Some(existing) => {
                existing.rename(name);
                existing.mark_outdated();
            }
            None => {
                trace!(tree = %self.id, node = %id, "node added");
                self.nodes.insert(id.clone(), Node::new(id, name));
            }
        }
        self.topology_changed = true;
    }

    /// Forget a node.
    ///
    /// The node's link registrations are cleared but the links stay in the
    /// mirror until their own `free_link` events arrive.
    pub fn free_node(&mut self, node: &NodeId) -> UpdateResult<()> {
        let mut freed = self
            .nodes
            .shift_remove(node)
            .ok_or_else(|| UpdateError::missing_node(&self.id, node))?;
        freed.clear_links();
        trace!(tree = %self.id, %node, "node freed");
        self.topology_changed = true;
        Ok(())
    }

    /// Mark a node outdated after a property change.
    pub fn set_outdated(&mut self, node: &NodeId) -> UpdateResult<()> {
        self.node_mut(node)?.mark_outdated();
        Ok(())
    }

    /// Mark a node as freshly recomputed.
    pub fn mark_updated(&mut self, node: &NodeId) -> UpdateResult<()> {
        self.node_mut(node)?.mark_updated();
        Ok(())
    }

    fn node_mut(&mut self, node: &NodeId) -> UpdateResult<&mut Node> {
        self.nodes
            .get_mut(node)
            .ok_or_else(|| UpdateError::missing_node(&self.id, node))
    }

    /// Mirror a link of the live tree, resolving its endpoints through the host.
    pub fn add_link<H: HostGraph + ?Sized>(&mut self, host: &H, link: &LinkId) -> UpdateResult<()> {
        let live = host.link(&self.id, link)?;
        self.connect(link.clone(), live.from_node, live.to_node)
    }

    /// Insert a link between two mirrored nodes without consulting the host.
    ///
    /// A known link id is re-registered with the new endpoints.
    pub fn connect(
        &mut self,
        link: impl Into<LinkId>,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
    ) -> UpdateResult<()> {
        let link = Link::new(link.into(), from.into(), to.into());
        for endpoint in [link.from_node(), link.to_node()] {
            if !self.nodes.contains_key(endpoint) {
                return Err(UpdateError::missing_node(&self.id, endpoint));
            }
        }
        if self.links.contains_key(link.id()) {
            self.unregister_link(link.id());
        }

        let from_node = self.node_mut(link.from_node())?;
        let had_consumers = !from_node.outputs().is_empty();
        from_node.insert_output(link.clone());
        if !had_consumers {
            from_node.mark_outdated();
        }

        let to_node = self.node_mut(link.to_node())?;
        to_node.insert_input(link.clone());
        to_node.mark_outdated();

        trace!(tree = %self.id, link = %link.id(), from = %link.from_node(), to = %link.to_node(), "link added");
        self.links.insert(link.id().clone(), link);
        self.topology_changed = true;
        Ok(())
    }

    /// Forget a link and mark its destination outdated.
    ///
    /// Either endpoint may already have been freed.
    pub fn free_link(&mut self, link: &LinkId) -> UpdateResult<()> {
        let freed = self
            .unregister_link(link)
            .ok_or_else(|| UpdateError::missing_link(&self.id, link))?;
        if let Some(to_node) = self.nodes.get_mut(freed.to_node()) {
            to_node.mark_outdated();
        }
        trace!(tree = %self.id, %link, "link freed");
        self.topology_changed = true;
        Ok(())
    }

    fn unregister_link(&mut self, link: &LinkId) -> Option<Link> {
        let removed = self.links.shift_remove(link)?;
        for endpoint in [removed.from_node(), removed.to_node()] {
            if let Some(node) = self.nodes.get_mut(endpoint) {
                node.free_link(link);
            }
        }
        Some(removed)
    }

    /// Every node forward-reachable from `seeds`, seeds included.
    pub fn affected_by<I>(&self, seeds: I) -> BTreeSet<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        Traversal::forward(self, seeds).collect()
    }

    /// Every node backward-reachable from `seeds`, seeds included.
    pub fn feeding<I>(&self, seeds: I) -> BTreeSet<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        Traversal::backward(self, seeds).collect()
    }

    /// Re-derive output nodes and what is connected to them.
    ///
    /// Only needed after nodes or links were added or removed; the walk
    /// calls it on its own when the topology flag is set.
    pub fn prepare_walk_after_topology_changes<H: HostGraph + ?Sized>(
        &mut self,
        host: &H,
        config: &UpdateConfig,
    ) -> UpdateResult<()> {
        let mut walk = std::mem::take(&mut self.walk);
        let prepared = walk.prepare(self, host, config);
        self.walk = walk;
        prepared?;
        self.topology_changed = false;
        Ok(())
    }

    /// Start a walk over the nodes worth recalculating.
    ///
    /// The returned iterator owns its state, so the mirror can be updated
    /// (e.g. with [`mark_updated`](Self::mark_updated)) while it is consumed.
    pub fn walk_worth_recalculating<H: HostGraph + ?Sized>(
        &mut self,
        host: &H,
        config: &UpdateConfig,
    ) -> UpdateResult<WorthRecalculating> {
        if self.topology_changed {
            self.prepare_walk_after_topology_changes(host, config)?;
        }
        let mut walk = std::mem::take(&mut self.walk);
        walk.recalculate_effected_by_changes_nodes(self);
        let iter = walk.schedule(self, config.max_walk_steps);
        self.walk = walk;
        Ok(iter)
    }

    /// Walk and recompute every node worth recalculating.
    ///
    /// Each node is handed to `processor` in dependency order and marked
    /// updated once it succeeds. A failing node is recorded with its error,
    /// left outdated for the next walk, and the walk goes on. Only lookup
    /// and broken-graph errors abort the cycle.
    pub fn recalculate<H, P>(
        &mut self,
        host: &H,
        processor: &mut P,
        config: &UpdateConfig,
    ) -> UpdateResult<Vec<Recalculated>>
    where
        H: HostGraph + ?Sized,
        P: NodeProcessor + ?Sized,
    {
        let mut walk = self.walk_worth_recalculating(host, config)?;
        let mut recalculated = Vec::new();
        for node in walk.by_ref() {
            let node = node?;
            let started = Instant::now();
            let error = match processor.process_node(&self.id, &node) {
                Ok(()) => {
                    self.mark_updated(&node)?;
                    None
                }
                Err(err) => {
                    warn!(tree = %self.id, %node, %err, "node failed to recalculate");
                    // downstream nodes may not have been outdated themselves
                    self.set_outdated(&node)?;
                    Some(err.to_string())
                }
            };
            recalculated.push(Recalculated {
                node,
                elapsed: started.elapsed(),
                error,
            });
        }
        debug!(
            tree = %self.id,
            count = recalculated.len(),
            steps = walk.steps(),
            failed = recalculated.iter().filter(|r| r.error.is_some()).count(),
            "recalculated nodes"
        );
        Ok(recalculated)
    }
}
