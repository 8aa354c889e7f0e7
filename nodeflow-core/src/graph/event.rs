//! Tree Events
//!
//! Discrete notifications that something in a live node tree changed. The
//! host converts its own signals into these before handing a batch to
//! [`GraphMirror::update_reconstruction`](super::GraphMirror::update_reconstruction).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::node::{LinkId, NodeId};
use crate::error::{UpdateError, UpdateResult};

/// The closed set of event kinds the mirror understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AddNode,
    CopyNode,
    FreeNode,
    NodePropertyUpdate,
    AddLink,
    FreeLink,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AddNode => "add_node",
            EventKind::CopyNode => "copy_node",
            EventKind::FreeNode => "free_node",
            EventKind::NodePropertyUpdate => "node_property_update",
            EventKind::AddLink => "add_link",
            EventKind::FreeLink => "free_link",
        }
    }

    /// Whether the event adds or removes a node or link.
    pub fn changes_topology(&self) -> bool {
        !matches!(self, EventKind::NodePropertyUpdate)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add_node" => Ok(EventKind::AddNode),
            "copy_node" => Ok(EventKind::CopyNode),
            "free_node" => Ok(EventKind::FreeNode),
            "node_property_update" => Ok(EventKind::NodePropertyUpdate),
            "add_link" => Ok(EventKind::AddLink),
            "free_link" => Ok(EventKind::FreeLink),
            other => Err(UpdateError::UnknownEventKind(other.to_owned())),
        }
    }
}

/// What an event refers to: a node or a link, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    Node(NodeId),
    Link(LinkId),
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEvent {
    pub kind: EventKind,
    pub target: EventTarget,
}

impl TreeEvent {
    pub fn node(kind: EventKind, node: impl Into<NodeId>) -> Self {
        Self {
            kind,
            target: EventTarget::Node(node.into()),
        }
    }

    pub fn link(kind: EventKind, link: impl Into<LinkId>) -> Self {
        Self {
            kind,
            target: EventTarget::Link(link.into()),
        }
    }

    pub fn add_node(node: impl Into<NodeId>) -> Self {
        Self::node(EventKind::AddNode, node)
    }

    pub fn copy_node(node: impl Into<NodeId>) -> Self {
        Self::node(EventKind::CopyNode, node)
    }

    pub fn free_node(node: impl Into<NodeId>) -> Self {
        Self::node(EventKind::FreeNode, node)
    }

    pub fn property_update(node: impl Into<NodeId>) -> Self {
        Self::node(EventKind::NodePropertyUpdate, node)
    }

    pub fn add_link(link: impl Into<LinkId>) -> Self {
        Self::link(EventKind::AddLink, link)
    }

    pub fn free_link(link: impl Into<LinkId>) -> Self {
        Self::link(EventKind::FreeLink, link)
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        match &self.target {
            EventTarget::Node(id) => Some(id),
            EventTarget::Link(_) => None,
        }
    }

    pub fn link_id(&self) -> Option<&LinkId> {
        match &self.target {
            EventTarget::Link(id) => Some(id),
            EventTarget::Node(_) => None,
        }
    }

    /// Parse a JSON array of events as produced by a host bridge.
    ///
    /// Unknown kinds are rejected here rather than skipped later.
    pub fn parse_batch(json: &str) -> UpdateResult<Vec<TreeEvent>> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for TreeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            EventTarget::Node(id) => write!(f, "{}(node={})", self.kind, id),
            EventTarget::Link(id) => write!(f, "{}(link={})", self.kind, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_their_names() {
        for kind in [
            EventKind::AddNode,
            EventKind::CopyNode,
            EventKind::FreeNode,
            EventKind::NodePropertyUpdate,
            EventKind::AddLink,
            EventKind::FreeLink,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_fails_loudly() {
        let err = "rename_node".parse::<EventKind>().unwrap_err();
        assert!(matches!(err, UpdateError::UnknownEventKind(ref k) if k == "rename_node"));
    }

    #[test]
    fn batch_parses_from_json() {
        let events = TreeEvent::parse_batch(
            r#"[
                {"kind": "add_link", "target": {"link": "a.out|b.in"}},
                {"kind": "add_node", "target": {"node": "a"}}
            ]"#,
        )
        .unwrap();
        assert_eq!(events[0], TreeEvent::add_link("a.out|b.in"));
        assert_eq!(events[1].node_id(), Some(&NodeId::from("a")));
        assert_eq!(events[1].link_id(), None);
    }

    #[test]
    fn batch_with_unknown_kind_is_rejected() {
        let err = TreeEvent::parse_batch(r#"[{"kind": "undo", "target": {"node": "a"}}]"#)
            .unwrap_err();
        assert!(matches!(err, UpdateError::Parse(_)));
    }

    #[test]
    fn only_property_updates_keep_topology() {
        assert!(!EventKind::NodePropertyUpdate.changes_topology());
        assert!(EventKind::FreeLink.changes_topology());
    }
}
