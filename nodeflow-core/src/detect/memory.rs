//! In-memory live forest.
//!
//! A self-contained implementation of the live graph interfaces, used by the
//! tests and by embedders without a host of their own. Processing a node
//! appends its name to a [`Journal`] shared by the whole forest.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::live::{LiveForest, LiveNode, LiveTree, Processable, PropValue, SocketRef, SocketView};
use crate::error::{NodeError, UpdateError, UpdateResult};
use crate::graph::{NodeId, TreeId};

/// Record of processed nodes, in processing order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn record(&self, node: &str) {
        self.0.lock().push(node.to_owned());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug)]
pub struct MemoryNode {
    name: String,
    type_id: String,
    inputs: Vec<SocketView>,
    outputs: Vec<SocketView>,
    props: IndexMap<String, PropValue>,
    extra_props: IndexMap<String, PropValue>,
    processable: bool,
    failure: Option<String>,
    runs: usize,
    journal: Journal,
}

impl MemoryNode {
    pub fn set_prop(&mut self, key: &str, value: impl Into<PropValue>) -> &mut Self {
        self.props.insert(key.to_owned(), value.into());
        self
    }

    pub fn set_extra_prop(&mut self, key: &str, value: impl Into<PropValue>) -> &mut Self {
        self.extra_props.insert(key.to_owned(), value.into());
        self
    }

    pub fn set_processable(&mut self, processable: bool) -> &mut Self {
        self.processable = processable;
        self
    }

    /// Make every following `process` call fail with `message`.
    pub fn fail_with(&mut self, message: &str) -> &mut Self {
        self.failure = Some(message.to_owned());
        self
    }

    pub fn stop_failing(&mut self) -> &mut Self {
        self.failure = None;
        self
    }

    /// How many times `process` was called, failures included.
    pub fn runs(&self) -> usize {
        self.runs
    }
}

fn socket_mut<'a>(sockets: &'a mut Vec<SocketView>, identifier: &str, is_output: bool) -> &'a mut SocketView {
    let index = match sockets.iter().position(|s| s.identifier == identifier) {
        Some(index) => index,
        None => {
            sockets.push(SocketView::new(identifier, is_output));
            sockets.len() - 1
        }
    };
    &mut sockets[index]
}

impl LiveNode for MemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_id(&self) -> &str {
        &self.type_id
    }

    fn inputs(&self) -> Vec<SocketView> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<SocketView> {
        self.outputs.clone()
    }

    fn properties(&self) -> Vec<(String, PropValue)> {
        self.props.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn additional_properties(&self) -> Vec<(String, PropValue)> {
        self.extra_props.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Processable for MemoryNode {
    fn process(&mut self) -> Result<(), NodeError> {
        self.runs += 1;
        if let Some(message) = &self.failure {
            return Err(message.clone().into());
        }
        self.journal.record(&self.name);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryTree {
    name: String,
    processing_enabled: bool,
    animated: bool,
    nodes: IndexMap<String, MemoryNode>,
    journal: Journal,
}

impl MemoryTree {
    /// Add a node, replacing any node of the same name.
    pub fn add_node(&mut self, name: &str, type_id: &str, inputs: &[&str], outputs: &[&str]) -> &mut MemoryNode {
        self.remove_node(name);
        let node = MemoryNode {
            name: name.to_owned(),
            type_id: type_id.to_owned(),
            inputs: inputs.iter().map(|id| SocketView::new(*id, false)).collect(),
            outputs: outputs.iter().map(|id| SocketView::new(*id, true)).collect(),
            props: IndexMap::new(),
            extra_props: IndexMap::new(),
            processable: true,
            failure: None,
            runs: 0,
            journal: self.journal.clone(),
        };
        self.nodes.entry(name.to_owned()).or_insert(node)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut MemoryNode> {
        self.nodes.get_mut(name)
    }

    pub fn set_processing_enabled(&mut self, enabled: bool) {
        self.processing_enabled = enabled;
    }

    pub fn set_animated(&mut self, animated: bool) {
        self.animated = animated;
    }

    fn missing(&self, node: &str) -> UpdateError {
        UpdateError::missing_node(&TreeId::from(self.name.as_str()), &NodeId::from(node))
    }

    /// Link `from.from_socket` to `to.to_socket`.
    ///
    /// Unknown sockets are created. An input socket holds one link, so an
    /// existing link into `to_socket` is replaced.
    pub fn connect(&mut self, from: &str, from_socket: &str, to: &str, to_socket: &str) -> UpdateResult<()> {
        for node in [from, to] {
            if !self.nodes.contains_key(node) {
                return Err(self.missing(node));
            }
        }
        self.disconnect(to, to_socket);

        if let Some(node) = self.nodes.get_mut(from) {
            socket_mut(&mut node.outputs, from_socket, true).links.push(SocketRef {
                node: to.to_owned(),
                identifier: to_socket.to_owned(),
                is_output: false,
            });
        }
        if let Some(node) = self.nodes.get_mut(to) {
            socket_mut(&mut node.inputs, to_socket, false).links.push(SocketRef {
                node: from.to_owned(),
                identifier: from_socket.to_owned(),
                is_output: true,
            });
        }
        Ok(())
    }

    /// Remove the link into `to.to_socket`. Returns whether there was one.
    pub fn disconnect(&mut self, to: &str, to_socket: &str) -> bool {
        let Some(remote) = self
            .nodes
            .get_mut(to)
            .and_then(|node| node.inputs.iter_mut().find(|s| s.identifier == to_socket))
            .and_then(|socket| socket.links.pop())
        else {
            return false;
        };
        if let Some(from) = self.nodes.get_mut(&remote.node) {
            for socket in from.outputs.iter_mut().filter(|s| s.identifier == remote.identifier) {
                socket.links.retain(|l| !(l.node == to && l.identifier == to_socket));
            }
        }
        true
    }

    /// Remove a node and every link touching it.
    pub fn remove_node(&mut self, name: &str) -> bool {
        if self.nodes.shift_remove(name).is_none() {
            return false;
        }
        for node in self.nodes.values_mut() {
            for socket in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
                socket.links.retain(|l| l.node != name);
            }
        }
        true
    }
}

impl LiveTree for MemoryTree {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_processing_enabled(&self) -> bool {
        self.processing_enabled
    }

    fn is_animated(&self) -> bool {
        self.animated
    }

    fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    fn node(&self, name: &str) -> Option<&dyn LiveNode> {
        self.nodes.get(name).map(|node| node as &dyn LiveNode)
    }

    fn processable(&mut self, name: &str) -> Option<&mut dyn Processable> {
        match self.nodes.get_mut(name) {
            Some(node) if node.processable => Some(node as &mut dyn Processable),
            _ => None,
        }
    }
}

/// A set of named in-memory trees.
#[derive(Debug, Default)]
pub struct MemoryForest {
    trees: IndexMap<String, MemoryTree>,
    journal: Journal,
}

impl MemoryForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty tree, replacing any tree of the same name.
    pub fn add_tree(&mut self, name: &str) -> &mut MemoryTree {
        let tree = MemoryTree {
            name: name.to_owned(),
            processing_enabled: true,
            animated: false,
            nodes: IndexMap::new(),
            journal: self.journal.clone(),
        };
        let (index, _) = self.trees.insert_full(name.to_owned(), tree);
        &mut self.trees[index]
    }

    pub fn get_tree_mut(&mut self, name: &str) -> Option<&mut MemoryTree> {
        self.trees.get_mut(name)
    }

    pub fn remove_tree(&mut self, name: &str) -> bool {
        self.trees.shift_remove(name).is_some()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

impl LiveForest for MemoryForest {
    fn tree_names(&self) -> Vec<String> {
        self.trees.keys().cloned().collect()
    }

    fn tree(&self, name: &str) -> Option<&dyn LiveTree> {
        self.trees.get(name).map(|tree| tree as &dyn LiveTree)
    }

    fn tree_mut(&mut self, name: &str) -> Option<&mut dyn LiveTree> {
        self.trees.get_mut(name).map(|tree| tree as &mut dyn LiveTree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_replaces_input_link() {
        let mut forest = MemoryForest::new();
        let tree = forest.add_tree("t");
        tree.add_node("a", "A", &[], &["out"]);
        tree.add_node("b", "B", &[], &["out"]);
        tree.add_node("c", "C", &["in"], &[]);
        tree.connect("a", "out", "c", "in").unwrap();
        tree.connect("b", "out", "c", "in").unwrap();

        let c = tree.node("c").unwrap();
        assert_eq!(c.previous_nodes(), vec!["b"]);
        assert!(tree.node("a").unwrap().next_nodes().is_empty());
        assert_eq!(tree.node("b").unwrap().next_nodes(), vec!["c"]);
    }

    #[test]
    fn connect_unknown_node_fails() {
        let mut forest = MemoryForest::new();
        let tree = forest.add_tree("t");
        tree.add_node("a", "A", &[], &["out"]);

        let err = tree.connect("a", "out", "ghost", "in").unwrap_err();
        assert!(matches!(err, UpdateError::MissingNode { .. }));
    }

    #[test]
    fn removing_a_node_drops_its_links() {
        let mut forest = MemoryForest::new();
        let tree = forest.add_tree("t");
        tree.add_node("a", "A", &[], &["out"]);
        tree.add_node("b", "B", &["in"], &[]);
        tree.connect("a", "out", "b", "in").unwrap();

        assert!(tree.remove_node("a"));
        assert!(!tree.node("b").unwrap().inputs()[0].is_linked());
        assert!(!tree.remove_node("a"));
    }

    #[test]
    fn processing_is_journaled() {
        let mut forest = MemoryForest::new();
        let tree = forest.add_tree("t");
        tree.add_node("a", "A", &[], &[]);
        tree.add_node("frame", "NodeFrame", &[], &[]).set_processable(false);

        assert!(tree.processable("frame").is_none());
        tree.processable("a").unwrap().process().unwrap();
        tree.node_mut("a").unwrap().fail_with("boom");
        assert!(tree.processable("a").unwrap().process().is_err());

        assert_eq!(tree.node_mut("a").unwrap().runs(), 2);
        assert_eq!(forest.journal().entries(), vec!["a"]);
    }
}
