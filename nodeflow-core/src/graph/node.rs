//! Mirror Nodes and Links
//!
//! This module defines the entities that live in a graph mirror. The mirror
//! only models node-to-node connectivity; which socket a link attaches to is
//! folded into the link id by the host and otherwise discarded.

use std::borrow::Borrow;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Get the raw id.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a node tree, stable for the tree's lifetime in the host.
    TreeId
);

string_id!(
    /// Identifier of a node, assigned by the host.
    NodeId
);

string_id!(
    /// Identifier of a link: the host concatenates both endpoint socket ids.
    LinkId
);

/// Neighbour list returned by [`Node::next`] and [`Node::last`].
pub type Neighbours = SmallVec<[NodeId; 4]>;

/// A connection between two mirror nodes.
///
/// Links hold node ids rather than node references so a link stays a valid
/// data holder after one of its endpoints has been freed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    id: LinkId,
    from_node: NodeId,
    to_node: NodeId,
}

impl Link {
    pub fn new(id: LinkId, from_node: NodeId, to_node: NodeId) -> Self {
        Self {
            id,
            from_node,
            to_node,
        }
    }

    pub fn id(&self) -> &LinkId {
        &self.id
    }

    /// Node on the output side of the link.
    pub fn from_node(&self) -> &NodeId {
        &self.from_node
    }

    /// Node on the input side of the link.
    pub fn to_node(&self) -> &NodeId {
        &self.to_node
    }
}

/// A node in the graph mirror.
///
/// Identity is entirely by id; the display name is informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    name: String,

    /// Set when the cached result of the node is stale.
    is_outdated: bool,

    /// Incoming links keyed by link id.
    inputs: IndexMap<LinkId, Link>,

    /// Outgoing links keyed by link id.
    outputs: IndexMap<LinkId, Link>,
}

impl Node {
    /// Create a node. New nodes are outdated so their first walk computes them.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_outdated: true,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_outdated(&self) -> bool {
        self.is_outdated
    }

    pub fn mark_outdated(&mut self) {
        self.is_outdated = true;
    }

    /// Mark the node as holding a fresh result.
    pub fn mark_updated(&mut self) {
        self.is_outdated = false;
    }

    pub fn inputs(&self) -> &IndexMap<LinkId, Link> {
        &self.inputs
    }

    pub fn outputs(&self) -> &IndexMap<LinkId, Link> {
        &self.outputs
    }

    pub(crate) fn insert_input(&mut self, link: Link) {
        self.inputs.insert(link.id.clone(), link);
    }

    pub(crate) fn insert_output(&mut self, link: Link) {
        self.outputs.insert(link.id.clone(), link);
    }

    /// Forget `link` on whichever side it is registered.
    pub(crate) fn free_link(&mut self, link: &LinkId) {
        self.inputs.shift_remove(link);
        self.outputs.shift_remove(link);
    }

    /// Drop all link registrations. The links themselves are left alone.
    pub(crate) fn clear_links(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }

    /// Nodes fed by this node.
    pub fn next(&self) -> Neighbours {
        let mut next: Neighbours = SmallVec::new();
        for link in self.outputs.values() {
            if !next.contains(&link.to_node) {
                next.push(link.to_node.clone());
            }
        }
        next
    }

    /// Nodes feeding this node.
    pub fn last(&self) -> Neighbours {
        let mut last: Neighbours = SmallVec::new();
        for link in self.inputs.values() {
            if !last.contains(&link.from_node) {
                last.push(link.from_node.clone());
            }
        }
        last
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: &str, from: &str, to: &str) -> Link {
        Link::new(id.into(), from.into(), to.into())
    }

    #[test]
    fn new_node_starts_outdated() {
        let mut node = Node::new("n1".into(), "Scalar");
        assert!(node.is_outdated());
        node.mark_updated();
        assert!(!node.is_outdated());
        node.mark_outdated();
        assert!(node.is_outdated());
    }

    #[test]
    fn identity_ignores_name_and_state() {
        let a = Node::new("same".into(), "First");
        let mut b = Node::new("same".into(), "Second");
        b.mark_updated();
        assert_eq!(a, b);
    }

    #[test]
    fn neighbours_are_deduplicated() {
        let mut node = Node::new("a".into(), "A");
        node.insert_output(link("l1", "a", "b"));
        node.insert_output(link("l2", "a", "b"));
        node.insert_output(link("l3", "a", "c"));
        node.insert_input(link("l4", "z", "a"));

        let next: Vec<_> = node.next().into_iter().collect();
        assert_eq!(next, vec![NodeId::from("b"), NodeId::from("c")]);
        assert_eq!(node.last().as_slice(), &[NodeId::from("z")]);
    }

    #[test]
    fn free_link_removes_either_side() {
        let mut node = Node::new("a".into(), "A");
        node.insert_output(link("out", "a", "b"));
        node.insert_input(link("in", "z", "a"));

        node.free_link(&LinkId::from("out"));
        assert!(node.outputs().is_empty());
        assert_eq!(node.inputs().len(), 1);

        node.free_link(&LinkId::from("in"));
        node.free_link(&LinkId::from("never-registered"));
        assert!(node.inputs().is_empty());
    }

    #[test]
    fn ids_borrow_as_str() {
        let mut map = IndexMap::new();
        map.insert(NodeId::from("n"), 1);
        assert_eq!(map.get("n"), Some(&1));
        assert_eq!(NodeId::from("n").to_string(), "n");
    }
}
