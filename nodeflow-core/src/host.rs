//! Host Graph Collaborator
//!
//! The live node trees are owned by the host application. The mirror only
//! ever reads them through [`HostGraph`], and asks the host to recompute a
//! node through [`NodeProcessor`].
//!
//! [`MemoryHost`] is a plain in-memory host. Embedders without a real host
//! (tests, benches, headless tools) drive the mirror with it.

use indexmap::IndexMap;

use crate::error::{NodeError, UpdateError, UpdateResult};
use crate::graph::{LinkId, NodeId, TreeId};

/// What the host knows about a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNode {
    pub name: String,
    /// Node type identifier, matched against the sink allow-list.
    pub type_id: String,
}

/// What the host knows about a link. Links always run output to input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLink {
    pub from_node: NodeId,
    pub from_socket: String,
    pub to_node: NodeId,
    pub to_socket: String,
}

/// Read-only queries the update core issues against the live graph.
///
/// Every lookup fails with a missing-entity error when the id is unknown.
#[cfg_attr(test, mockall::automock)]
pub trait HostGraph {
    fn node(&self, tree: &TreeId, node: &NodeId) -> UpdateResult<HostNode>;

    fn link(&self, tree: &TreeId, link: &LinkId) -> UpdateResult<HostLink>;

    fn node_ids(&self, tree: &TreeId) -> UpdateResult<Vec<NodeId>>;

    fn link_ids(&self, tree: &TreeId) -> UpdateResult<Vec<LinkId>>;
}

/// Recomputes a node on behalf of the scheduler.
pub trait NodeProcessor {
    fn process_node(&mut self, tree: &TreeId, node: &NodeId) -> Result<(), NodeError>;
}

impl<F> NodeProcessor for F
where
    F: FnMut(&TreeId, &NodeId) -> Result<(), NodeError>,
{
    fn process_node(&mut self, tree: &TreeId, node: &NodeId) -> Result<(), NodeError> {
        self(tree, node)
    }
}

#[derive(Debug, Default, Clone)]
struct HostTree {
    nodes: IndexMap<NodeId, HostNode>,
    links: IndexMap<LinkId, HostLink>,
}

/// An in-memory forest of node trees.
#[derive(Debug, Default, Clone)]
pub struct MemoryHost {
    trees: IndexMap<TreeId, HostTree>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tree(&mut self, tree: impl Into<TreeId>) -> TreeId {
        let tree = tree.into();
        self.trees.entry(tree.clone()).or_default();
        tree
    }

    /// Remove a tree, as when the host deletes it.
    pub fn remove_tree(&mut self, tree: &TreeId) -> bool {
        self.trees.shift_remove(tree).is_some()
    }

    fn tree(&self, tree: &TreeId) -> UpdateResult<&HostTree> {
        self.trees
            .get(tree)
            .ok_or_else(|| UpdateError::MissingTree(tree.clone()))
    }

    fn tree_mut(&mut self, tree: &TreeId) -> UpdateResult<&mut HostTree> {
        self.trees
            .get_mut(tree)
            .ok_or_else(|| UpdateError::MissingTree(tree.clone()))
    }

    /// Add a node. Replaces name and type if the id already exists.
    pub fn add_node(
        &mut self,
        tree: &TreeId,
        node: impl Into<NodeId>,
        name: impl Into<String>,
        type_id: impl Into<String>,
    ) -> UpdateResult<NodeId> {
        let node = node.into();
        self.tree_mut(tree)?.nodes.insert(
            node.clone(),
            HostNode {
                name: name.into(),
                type_id: type_id.into(),
            },
        );
        Ok(node)
    }

    /// Link two sockets. The link id is the concatenation of both socket ids.
    pub fn connect(
        &mut self,
        tree: &TreeId,
        from_node: &NodeId,
        from_socket: &str,
        to_node: &NodeId,
        to_socket: &str,
    ) -> UpdateResult<LinkId> {
        let host_tree = self.tree_mut(tree)?;
        for node in [from_node, to_node] {
            if !host_tree.nodes.contains_key(node) {
                return Err(UpdateError::missing_node(tree, node));
            }
        }
        let link = LinkId::from(format!("{from_node}.{from_socket}{to_node}.{to_socket}"));
        host_tree.links.insert(
            link.clone(),
            HostLink {
                from_node: from_node.clone(),
                from_socket: from_socket.to_owned(),
                to_node: to_node.clone(),
                to_socket: to_socket.to_owned(),
            },
        );
        Ok(link)
    }

    /// Link the default output of `from` to the default input of `to`.
    pub fn connect_nodes(&mut self, tree: &TreeId, from: &NodeId, to: &NodeId) -> UpdateResult<LinkId> {
        self.connect(tree, from, "out", to, "in")
    }

    /// Remove a node and every link touching it.
    ///
    /// Returns the removed link ids, which is what the host reports as
    /// `free_link` events alongside the `free_node` event.
    pub fn remove_node(&mut self, tree: &TreeId, node: &NodeId) -> UpdateResult<Vec<LinkId>> {
        let host_tree = self.tree_mut(tree)?;
        if host_tree.nodes.shift_remove(node).is_none() {
            return Err(UpdateError::missing_node(tree, node));
        }
        let dropped: Vec<LinkId> = host_tree
            .links
            .iter()
            .filter(|(_, link)| &link.from_node == node || &link.to_node == node)
            .map(|(id, _)| id.clone())
            .collect();
        for link in &dropped {
            host_tree.links.shift_remove(link);
        }
        Ok(dropped)
    }

    pub fn remove_link(&mut self, tree: &TreeId, link: &LinkId) -> UpdateResult<HostLink> {
        self.tree_mut(tree)?
            .links
            .shift_remove(link)
            .ok_or_else(|| UpdateError::missing_link(tree, link))
    }
}

impl HostGraph for MemoryHost {
    fn node(&self, tree: &TreeId, node: &NodeId) -> UpdateResult<HostNode> {
        self.tree(tree)?
            .nodes
            .get(node)
            .cloned()
            .ok_or_else(|| UpdateError::missing_node(tree, node))
    }

    fn link(&self, tree: &TreeId, link: &LinkId) -> UpdateResult<HostLink> {
        self.tree(tree)?
            .links
            .get(link)
            .cloned()
            .ok_or_else(|| UpdateError::missing_link(tree, link))
    }

    fn node_ids(&self, tree: &TreeId) -> UpdateResult<Vec<NodeId>> {
        Ok(self.tree(tree)?.nodes.keys().cloned().collect())
    }

    fn link_ids(&self, tree: &TreeId) -> UpdateResult<Vec<LinkId>> {
        Ok(self.tree(tree)?.links.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_ids_concatenate_sockets() {
        let mut host = MemoryHost::new();
        let tree = host.add_tree("t");
        let a = host.add_node(&tree, "a", "A", "SvNumberNode").unwrap();
        let b = host.add_node(&tree, "b", "B", "SvStethoscopeNodeMK2").unwrap();
        let link = host.connect(&tree, &a, "out0", &b, "in1").unwrap();

        assert_eq!(link.as_str(), "a.out0b.in1");
        let resolved = host.link(&tree, &link).unwrap();
        assert_eq!(resolved.from_node, a);
        assert_eq!(resolved.to_node, b);
    }

    #[test]
    fn removing_a_node_drops_its_links() {
        let mut host = MemoryHost::new();
        let tree = host.add_tree("t");
        let a = host.add_node(&tree, "a", "A", "X").unwrap();
        let b = host.add_node(&tree, "b", "B", "X").unwrap();
        let c = host.add_node(&tree, "c", "C", "X").unwrap();
        let ab = host.connect_nodes(&tree, &a, &b).unwrap();
        let bc = host.connect_nodes(&tree, &b, &c).unwrap();

        let dropped = host.remove_node(&tree, &b).unwrap();
        assert_eq!(dropped, vec![ab, bc]);
        assert!(host.link_ids(&tree).unwrap().is_empty());
        assert_eq!(host.node_ids(&tree).unwrap(), vec![a, c]);
    }

    #[test]
    fn lookups_report_missing_entities() {
        let mut host = MemoryHost::new();
        let tree = host.add_tree("t");

        let err = host.node(&tree, &NodeId::from("ghost")).unwrap_err();
        assert!(matches!(err, UpdateError::MissingNode { .. }));

        let err = host.link(&tree, &LinkId::from("ghost")).unwrap_err();
        assert!(matches!(err, UpdateError::MissingLink { .. }));

        let err = host.node_ids(&TreeId::from("other")).unwrap_err();
        assert!(matches!(err, UpdateError::MissingTree(_)));
    }

    #[test]
    fn closures_are_processors() {
        let mut seen = Vec::new();
        let mut processor = |_: &TreeId, node: &NodeId| -> Result<(), NodeError> {
            seen.push(node.clone());
            Ok(())
        };
        processor
            .process_node(&TreeId::from("t"), &NodeId::from("n"))
            .unwrap();
        assert_eq!(seen, vec![NodeId::from("n")]);
    }
}
