//! Change Detector
//!
//! Decides which nodes of a live tree changed since the previous update and
//! recomputes them in dependency order.
//!
//! # Algorithm
//!
//! A full tree update runs three passes:
//!
//! 1. Refresh the socket and property caches. Every input socket remembers
//!    which node it was linked to, every property its last value.
//! 2. Walk forward from the root nodes (nodes without linked inputs) and
//!    decide each node once all of its upstream nodes are decided. A node is
//!    changed when its input links or properties changed, when an upstream
//!    output socket changed, or when one of the sockets it feeds was
//!    relinked. Anything downstream of a changed node is changed too.
//! 3. Walk forward again and process changed nodes, holding a node back
//!    until every changed upstream node has been processed.
//!
//! Single-node and animation updates skip the first two passes: the start
//! nodes and everything downstream of them are simply marked changed.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use tracing::{debug, trace};

use super::cache::{ChangeCache, SocketSide};
use super::live::{LiveForest, LiveNode, LiveTree, SocketView};
use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::graph::{NodeId, TreeId};

/// What an update call addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateTarget {
    /// Every tree of the forest.
    All,
    /// One tree, by name.
    Tree(String),
    /// One node and everything downstream of it.
    Node { tree: String, node: String },
}

impl UpdateTarget {
    pub fn tree(name: impl Into<String>) -> Self {
        UpdateTarget::Tree(name.into())
    }

    pub fn node(tree: impl Into<String>, node: impl Into<String>) -> Self {
        UpdateTarget::Node {
            tree: tree.into(),
            node: node.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Detect changes and recompute what they affect.
    #[default]
    Normal,
    /// A frame change: recompute animation nodes and their downstream.
    Animation,
}

impl FromStr for UpdateMode {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "NORMAL" | "normal" => Ok(UpdateMode::Normal),
            "ANIMATE" | "animate" | "ANIMATION" | "animation" => Ok(UpdateMode::Animation),
            other => Err(UpdateError::UnsupportedMode(other.to_owned())),
        }
    }
}

/// Change-driven update engine working directly on live trees.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    cache: ChangeCache,
    root_nodes: HashMap<String, Vec<String>>,
    animation_nodes: HashMap<String, Vec<String>>,
    config: UpdateConfig,
}

impl ChangeDetector {
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Whether `node` was flagged as changed during the latest update.
    pub fn has_changed(&self, tree: &str, node: &str) -> bool {
        self.cache.node_changed(tree, node)
    }

    /// Nodes of `tree` flagged as changed during the latest update, sorted.
    pub fn changed_nodes(&self, tree: &str) -> Vec<String> {
        self.cache.changed_nodes(tree)
    }

    /// Forget the root and animation node lists of `tree`.
    ///
    /// Full tree updates do this themselves. Call it after editing a tree
    /// that will next see an animation update.
    pub fn invalidate(&mut self, tree: &str) {
        self.root_nodes.remove(tree);
        self.animation_nodes.remove(tree);
    }

    /// Run one update over `forest`.
    pub fn update<F>(&mut self, forest: &mut F, target: UpdateTarget, mode: UpdateMode) -> UpdateResult<()>
    where
        F: LiveForest + ?Sized,
    {
        self.cache.clear_node_flags();

        match (mode, target) {
            (UpdateMode::Animation, UpdateTarget::Node { tree, node }) => Err(UpdateError::UnsupportedTarget(
                format!("animation update of single node {node} in tree {tree}"),
            )),
            (UpdateMode::Animation, UpdateTarget::All) => {
                for name in forest.tree_names() {
                    if let Some(tree) = forest.tree_mut(&name) {
                        self.animate_tree(tree)?;
                    }
                }
                Ok(())
            }
            (UpdateMode::Animation, UpdateTarget::Tree(name)) => {
                let tree = forest
                    .tree_mut(&name)
                    .ok_or_else(|| UpdateError::MissingTree(TreeId::from(name)))?;
                self.animate_tree(tree)
            }
            (UpdateMode::Normal, UpdateTarget::All) => {
                for name in forest.tree_names() {
                    let Some(tree) = forest.tree_mut(&name) else {
                        continue;
                    };
                    if tree.is_processing_enabled() && !tree.node_names().is_empty() {
                        self.update_tree(tree)?;
                    }
                }
                Ok(())
            }
            (UpdateMode::Normal, UpdateTarget::Tree(name)) => {
                let tree = forest
                    .tree_mut(&name)
                    .ok_or_else(|| UpdateError::MissingTree(TreeId::from(name)))?;
                if tree.is_processing_enabled() {
                    self.update_tree(tree)?;
                }
                Ok(())
            }
            (UpdateMode::Normal, UpdateTarget::Node { tree: tree_name, node }) => {
                let tree = forest
                    .tree_mut(&tree_name)
                    .ok_or_else(|| UpdateError::MissingTree(TreeId::from(tree_name.as_str())))?;
                if !tree.is_processing_enabled() {
                    return Ok(());
                }
                if tree.node(&node).is_none() {
                    return Err(UpdateError::MissingNode {
                        tree: TreeId::from(tree_name),
                        node: NodeId::from(node),
                    });
                }
                self.update_from_nodes(tree, &[node])
            }
        }
    }

    fn update_tree(&mut self, tree: &mut dyn LiveTree) -> UpdateResult<()> {
        let name = tree.name().to_owned();
        debug!(tree = %name, "tree update");

        self.invalidate(&name);
        self.refresh_sockets_and_props(&*tree);
        let roots = self.root_nodes(&*tree);
        self.update_nodes_status(&*tree, &roots);
        self.process_nodes(tree, &roots)
    }

    fn animate_tree(&mut self, tree: &mut dyn LiveTree) -> UpdateResult<()> {
        if !tree.is_processing_enabled() || !tree.is_animated() {
            return Ok(());
        }
        let nodes = self.animation_nodes(&*tree);
        if nodes.is_empty() {
            return Ok(());
        }
        debug!(tree = %tree.name(), nodes = nodes.len(), "animation update");
        self.update_from_nodes(tree, &nodes)
    }

    /// Refresh the property cache of `starts`, mark them and their
    /// downstream as changed, and process.
    fn update_from_nodes(&mut self, tree: &mut dyn LiveTree, starts: &[String]) -> UpdateResult<()> {
        let tree_name = tree.name().to_owned();
        for start in starts {
            if let Some(node) = tree.node(start) {
                self.cache.update_props(&tree_name, node);
            }
        }

        let mut stack = starts.to_vec();
        let mut seen: HashSet<String> = HashSet::new();
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(node) = tree.node(&name) {
                self.cache.set_node_changed(&tree_name, &name, true);
                stack.extend(node.next_nodes());
            }
        }

        self.process_nodes(tree, starts)
    }

    fn refresh_sockets_and_props(&mut self, tree: &dyn LiveTree) {
        let tree_name = tree.name();
        for name in tree.node_names() {
            let Some(node) = tree.node(&name) else {
                continue;
            };
            for socket in node.inputs() {
                self.cache.update_input_socket(tree_name, &name, &socket);
            }
            self.cache.update_props(tree_name, node);
        }
    }

    fn root_nodes(&mut self, tree: &dyn LiveTree) -> Vec<String> {
        if let Some(roots) = self.root_nodes.get(tree.name()) {
            return roots.clone();
        }
        let roots: Vec<String> = tree
            .node_names()
            .into_iter()
            .filter(|name| {
                tree.node(name)
                    .is_some_and(|node| !node.inputs().iter().any(SocketView::is_linked))
            })
            .collect();
        self.root_nodes.insert(tree.name().to_owned(), roots.clone());
        roots
    }

    fn animation_nodes(&mut self, tree: &dyn LiveTree) -> Vec<String> {
        if let Some(nodes) = self.animation_nodes.get(tree.name()) {
            return nodes.clone();
        }
        let nodes: Vec<String> = tree
            .node_names()
            .into_iter()
            .filter(|name| {
                tree.node(name)
                    .is_some_and(|node| self.config.is_animation_type(node.type_id()))
            })
            .collect();
        self.animation_nodes.insert(tree.name().to_owned(), nodes.clone());
        nodes
    }

    /// Decide every node reachable from `roots` exactly once.
    fn update_nodes_status(&mut self, tree: &dyn LiveTree, roots: &[String]) {
        let tree_name = tree.name();
        let mut roots = roots.to_vec();
        let mut input_changed: Vec<String> = Vec::new();
        let mut to_check: Vec<String> = Vec::new();
        let mut done: HashSet<String> = HashSet::new();

        loop {
            let (name, forced) = if let Some(name) = input_changed.pop() {
                (name, true)
            } else if let Some(name) = to_check.pop() {
                (name, false)
            } else if let Some(name) = roots.pop() {
                (name, false)
            } else {
                break;
            };
            if done.contains(&name) {
                continue;
            }
            let Some(node) = tree.node(&name) else {
                continue;
            };

            let changed = if forced {
                true
            } else {
                if node.previous_nodes().iter().any(|up| !done.contains(up)) {
                    if self.config.debug {
                        trace!(node = %name, "can't decide yet, upstream undecided");
                    }
                    continue;
                }
                self.should_node_change(tree_name, node)
            };
            if self.config.debug {
                trace!(node = %name, changed, "node status");
            }

            self.cache.set_node_changed(tree_name, &name, changed);
            for socket in node.outputs() {
                self.cache
                    .set_socket_changed(tree_name, &name, SocketSide::Output, &socket.identifier, changed);
            }
            let next = node.next_nodes().into_iter().filter(|n| !done.contains(n));
            if changed {
                input_changed.extend(next);
            } else {
                to_check.extend(next);
            }
            done.insert(name);
        }
    }

    fn should_node_change(&self, tree: &str, node: &dyn LiveNode) -> bool {
        let name = node.name();
        let inputs = node.inputs();

        if inputs
            .iter()
            .any(|s| self.cache.socket_changed(tree, name, SocketSide::Input, &s.identifier))
        {
            return true;
        }
        if self.cache.any_prop_changed(tree, node) {
            return true;
        }
        if inputs
            .iter()
            .filter_map(SocketView::other)
            .any(|other| {
                let side = SocketSide::of(other.is_output);
                self.cache.socket_changed(tree, &other.node, side, &other.identifier)
            })
        {
            return true;
        }
        node.outputs()
            .iter()
            .flat_map(|s| s.links.iter())
            .any(|link| {
                let side = SocketSide::of(link.is_output);
                self.cache.socket_changed(tree, &link.node, side, &link.identifier)
            })
    }

    /// Process changed nodes reachable from `start`.
    ///
    /// A changed node waits while any changed upstream node is unprocessed;
    /// it is pushed again when that upstream node finishes.
    fn process_nodes(&mut self, tree: &mut dyn LiveTree, start: &[String]) -> UpdateResult<()> {
        let tree_name = tree.name().to_owned();
        let mut stack = start.to_vec();
        let mut done: HashSet<String> = HashSet::new();

        while let Some(name) = stack.pop() {
            if done.contains(&name) {
                continue;
            }
            let Some(node) = tree.node(&name) else {
                continue;
            };
            let next = node.next_nodes();
            let previous = node.previous_nodes();

            if self.cache.node_changed(&tree_name, &name) {
                let blocked = previous
                    .iter()
                    .any(|up| self.cache.node_changed(&tree_name, up) && !done.contains(up));
                if blocked {
                    if self.config.debug {
                        trace!(node = %name, "skipped, changed input not processed yet");
                    }
                    continue;
                }
                if let Some(processable) = tree.processable(&name) {
                    processable.process().map_err(|source| UpdateError::NodeProcess {
                        node: name.clone(),
                        source,
                    })?;
                    if self.config.debug {
                        debug!(tree = %tree_name, node = %name, "processed");
                    }
                }
            }

            stack.extend(next.into_iter().filter(|n| !done.contains(n)));
            done.insert(name);
        }
        Ok(())
    }
}
