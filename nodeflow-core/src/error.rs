//! Error types for the update core.
//!
//! Nothing in this crate retries or masks a failure. A missing entity means
//! the mirror and the live graph disagree, a broken update graph means the
//! scheduler found a cycle among the nodes it was asked to order, and both
//! are surfaced to the caller as-is.

use thiserror::Error;

use crate::graph::{EventKind, LinkId, NodeId, TreeId};

/// Error returned by a node's own recomputation.
pub type NodeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while mirroring, scheduling or detecting changes.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// An event kind outside the closed set was received.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// An event kind arrived carrying the wrong kind of id.
    #[error("can't handle {kind} event carrying a {payload} id")]
    UnhandledEvent {
        /// Kind of the rejected event.
        kind: EventKind,
        /// Which id the event carried ("node" or "link").
        payload: &'static str,
    },

    /// The change detector was asked to update something it can't address.
    #[error("unsupported update target: {0}")]
    UnsupportedTarget(String),

    /// The change detector was asked to run in a mode it doesn't know.
    #[error("unsupported update mode: {0}")]
    UnsupportedMode(String),

    /// The host has no tree with this id (deleted or renamed out of band).
    #[error("node tree {0} has disappeared or its id has changed")]
    MissingTree(TreeId),

    /// The host or the mirror has no node with this id.
    #[error("node {node} not found in tree {tree}")]
    MissingNode {
        /// Tree that was searched.
        tree: TreeId,
        /// Node that was not found.
        node: NodeId,
    },

    /// The host or the mirror has no link with this id.
    #[error("link {link} not found in tree {tree}")]
    MissingLink {
        /// Tree that was searched.
        tree: TreeId,
        /// Link that was not found.
        link: LinkId,
    },

    /// The scheduler could not order the worth-recalculating nodes.
    #[error("update graph looks broken (possible cycle): gave up after {steps} steps with {pending} nodes pending")]
    BrokenUpdateGraph {
        /// Steps taken before giving up.
        steps: usize,
        /// Nodes still waiting or in the frontier.
        pending: usize,
    },

    /// A node's recomputation failed.
    #[error("node {node} failed to process: {source}")]
    NodeProcess {
        /// Name or id of the failing node.
        node: String,
        /// Error raised by the node.
        #[source]
        source: NodeError,
    },

    /// Serialized events or configuration could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl UpdateError {
    /// Shorthand for a node missing from `tree`.
    pub fn missing_node(tree: &TreeId, node: &NodeId) -> Self {
        Self::MissingNode {
            tree: tree.clone(),
            node: node.clone(),
        }
    }

    /// Shorthand for a link missing from `tree`.
    pub fn missing_link(tree: &TreeId, link: &LinkId) -> Self {
        Self::MissingLink {
            tree: tree.clone(),
            link: link.clone(),
        }
    }

    /// Whether this error is a caller bug rather than a graph problem.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownEventKind(_)
                | Self::UnhandledEvent { .. }
                | Self::UnsupportedTarget(_)
                | Self::UnsupportedMode(_)
        )
    }
}

/// Result alias used across the crate.
pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_classified() {
        assert!(UpdateError::UnknownEventKind("rename_node".into()).is_contract_violation());
        assert!(UpdateError::UnsupportedMode("FRAME".into()).is_contract_violation());
        assert!(!UpdateError::MissingTree(TreeId::from("t")).is_contract_violation());
        assert!(!UpdateError::BrokenUpdateGraph { steps: 10, pending: 2 }.is_contract_violation());
    }

    #[test]
    fn messages_name_the_entity() {
        let err = UpdateError::missing_node(&TreeId::from("tree"), &NodeId::from("n1"));
        assert_eq!(err.to_string(), "node n1 not found in tree tree");

        let err = UpdateError::UnhandledEvent {
            kind: EventKind::AddLink,
            payload: "node",
        };
        assert_eq!(err.to_string(), "can't handle add_link event carrying a node id");
    }
}
