//! Change caches
//!
//! Everything the change detector remembers between updates. Keys are typed
//! so node, socket and property entries can never collide.

use std::collections::HashMap;

use super::live::{LiveNode, PropValue, SocketView};

/// Which side of a node a socket sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketSide {
    Input,
    Output,
}

impl SocketSide {
    pub fn of(is_output: bool) -> Self {
        if is_output {
            SocketSide::Output
        } else {
            SocketSide::Input
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Node {
        tree: String,
        node: String,
    },
    Socket {
        tree: String,
        node: String,
        side: SocketSide,
        identifier: String,
    },
    Prop {
        tree: String,
        node: String,
        prop: String,
    },
}

impl CacheKey {
    pub fn node(tree: &str, node: &str) -> Self {
        CacheKey::Node {
            tree: tree.to_owned(),
            node: node.to_owned(),
        }
    }

    pub fn socket(tree: &str, node: &str, side: SocketSide, identifier: &str) -> Self {
        CacheKey::Socket {
            tree: tree.to_owned(),
            node: node.to_owned(),
            side,
            identifier: identifier.to_owned(),
        }
    }

    pub fn prop(tree: &str, node: &str, prop: &str) -> Self {
        CacheKey::Prop {
            tree: tree.to_owned(),
            node: node.to_owned(),
            prop: prop.to_owned(),
        }
    }
}

/// Change flags and last-seen values.
///
/// Flags answer "did this change during the latest update" and default to
/// `false` for keys never seen.
#[derive(Debug, Default)]
pub struct ChangeCache {
    node_changed: HashMap<CacheKey, bool>,
    socket_changed: HashMap<CacheKey, bool>,
    prop_changed: HashMap<CacheKey, bool>,
    /// Remote node of each input socket, `None` when unlinked.
    socket_links: HashMap<CacheKey, Option<String>>,
    prop_values: HashMap<CacheKey, PropValue>,
}

impl ChangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget node decisions. Called at the start of every update.
    pub fn clear_node_flags(&mut self) {
        self.node_changed.clear();
    }

    pub fn node_changed(&self, tree: &str, node: &str) -> bool {
        self.node_changed
            .get(&CacheKey::node(tree, node))
            .copied()
            .unwrap_or(false)
    }

    pub fn set_node_changed(&mut self, tree: &str, node: &str, changed: bool) {
        self.node_changed.insert(CacheKey::node(tree, node), changed);
    }

    /// Nodes of `tree` flagged as changed during the latest update.
    pub fn changed_nodes(&self, tree: &str) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .node_changed
            .iter()
            .filter_map(|(key, changed)| match key {
                CacheKey::Node { tree: t, node } if t == tree && *changed => Some(node.clone()),
                _ => None,
            })
            .collect();
        nodes.sort();
        nodes
    }

    pub fn socket_changed(&self, tree: &str, node: &str, side: SocketSide, identifier: &str) -> bool {
        self.socket_changed
            .get(&CacheKey::socket(tree, node, side, identifier))
            .copied()
            .unwrap_or(false)
    }

    pub fn set_socket_changed(
        &mut self,
        tree: &str,
        node: &str,
        side: SocketSide,
        identifier: &str,
        changed: bool,
    ) {
        self.socket_changed
            .insert(CacheKey::socket(tree, node, side, identifier), changed);
    }

    /// Compare an input socket's link with the one seen last time.
    ///
    /// A socket is changed when it gained, lost or swapped its link. A
    /// socket seen for the first time counts as changed only if it is linked.
    pub fn update_input_socket(&mut self, tree: &str, node: &str, socket: &SocketView) -> bool {
        let key = CacheKey::socket(tree, node, SocketSide::Input, &socket.identifier);
        let remote = socket.other().map(|other| other.node.clone());
        let changed = match self.socket_links.get(&key) {
            Some(cached) => *cached != remote,
            None => remote.is_some(),
        };
        self.socket_links.insert(key.clone(), remote);
        self.socket_changed.insert(key, changed);
        changed
    }

    pub fn prop_changed(&self, tree: &str, node: &str, prop: &str) -> bool {
        self.prop_changed
            .get(&CacheKey::prop(tree, node, prop))
            .copied()
            .unwrap_or(false)
    }

    /// Compare every property of `node` with its cached value and store the
    /// new values. New properties count as changed.
    pub fn update_props(&mut self, tree: &str, node: &dyn LiveNode) {
        for (prop, value) in node.all_properties() {
            let key = CacheKey::prop(tree, node.name(), &prop);
            let changed = match self.prop_values.get(&key) {
                Some(cached) => value.differs_from(cached),
                None => true,
            };
            self.prop_changed.insert(key.clone(), changed);
            self.prop_values.insert(key, value);
        }
    }

    pub fn any_prop_changed(&self, tree: &str, node: &dyn LiveNode) -> bool {
        node.all_properties()
            .iter()
            .any(|(prop, _)| self.prop_changed(tree, node.name(), prop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::live::SocketRef;

    fn linked(identifier: &str, remote: &str) -> SocketView {
        let mut socket = SocketView::new(identifier, false);
        socket.links.push(SocketRef {
            node: remote.into(),
            identifier: "out".into(),
            is_output: true,
        });
        socket
    }

    #[test]
    fn unknown_keys_are_unchanged() {
        let cache = ChangeCache::new();
        assert!(!cache.node_changed("t", "n"));
        assert!(!cache.socket_changed("t", "n", SocketSide::Input, "x"));
        assert!(!cache.prop_changed("t", "n", "p"));
    }

    #[test]
    fn keys_do_not_collide_across_kinds() {
        let mut cache = ChangeCache::new();
        cache.set_socket_changed("t", "n", SocketSide::Output, "n", true);
        assert!(!cache.socket_changed("t", "n", SocketSide::Input, "n"));
        assert!(!cache.node_changed("t", "n"));
    }

    #[test]
    fn input_socket_relink_is_detected() {
        let mut cache = ChangeCache::new();
        assert!(cache.update_input_socket("t", "n", &linked("in", "a")));
        assert!(!cache.update_input_socket("t", "n", &linked("in", "a")));
        assert!(cache.update_input_socket("t", "n", &linked("in", "b")));
        assert!(cache.update_input_socket("t", "n", &SocketView::new("in", false)));
        assert!(!cache.update_input_socket("t", "n", &SocketView::new("in", false)));
        assert!(!cache.socket_changed("t", "n", SocketSide::Input, "in"));
    }

    #[test]
    fn unlinked_socket_seen_first_is_unchanged() {
        let mut cache = ChangeCache::new();
        assert!(!cache.update_input_socket("t", "n", &SocketView::new("in", false)));
        assert!(!cache.socket_changed("t", "n", SocketSide::Input, "in"));
        assert!(cache.update_input_socket("t", "n", &linked("in", "a")));
        assert!(cache.socket_changed("t", "n", SocketSide::Input, "in"));
    }

    #[test]
    fn changed_nodes_are_filtered_by_tree() {
        let mut cache = ChangeCache::new();
        cache.set_node_changed("t", "b", true);
        cache.set_node_changed("t", "a", true);
        cache.set_node_changed("t", "c", false);
        cache.set_node_changed("u", "d", true);

        assert_eq!(cache.changed_nodes("t"), vec!["a", "b"]);
        cache.clear_node_flags();
        assert!(cache.changed_nodes("t").is_empty());
    }
}
