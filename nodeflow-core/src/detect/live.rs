//! Live graph interfaces for the change detector.
//!
//! Unlike the mirror, the change detector reads the host's trees directly on
//! every update, down to individual sockets and property values.

use crate::error::NodeError;

/// A node property value as the host reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Vectors, colours, matrices and other array properties.
    Seq(Vec<PropValue>),
}

impl PropValue {
    pub fn seq<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<PropValue>,
    {
        PropValue::Seq(values.into_iter().map(Into::into).collect())
    }

    /// Whether `self` differs from a previously cached value.
    ///
    /// Sequences are compared element by element. Values of different
    /// shapes always differ.
    pub fn differs_from(&self, cached: &PropValue) -> bool {
        match (self, cached) {
            (PropValue::Seq(current), PropValue::Seq(cached)) => {
                current.len() != cached.len()
                    || current.iter().zip(cached).any(|(v, c)| v.differs_from(c))
            }
            (PropValue::Seq(_), _) | (_, PropValue::Seq(_)) => true,
            (current, cached) => current != cached,
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Str(v.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Str(v)
    }
}

/// The far end of a link, seen from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRef {
    pub node: String,
    pub identifier: String,
    pub is_output: bool,
}

/// A socket of a live node together with where it is linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketView {
    pub identifier: String,
    pub name: String,
    pub is_output: bool,
    /// Remote sockets. An input socket has at most one.
    pub links: Vec<SocketRef>,
}

impl SocketView {
    pub fn new(identifier: impl Into<String>, is_output: bool) -> Self {
        let identifier = identifier.into();
        Self {
            name: identifier.clone(),
            identifier,
            is_output,
            links: Vec::new(),
        }
    }

    pub fn is_linked(&self) -> bool {
        !self.links.is_empty()
    }

    /// The socket on the other end of the first link.
    pub fn other(&self) -> Option<&SocketRef> {
        self.links.first()
    }
}

/// Read access to a node of a live tree.
pub trait LiveNode {
    fn name(&self) -> &str;

    fn type_id(&self) -> &str;

    fn inputs(&self) -> Vec<SocketView>;

    fn outputs(&self) -> Vec<SocketView>;

    /// Properties stored on the node.
    fn properties(&self) -> Vec<(String, PropValue)>;

    /// Extra values a node type wants compared as if they were properties.
    fn additional_properties(&self) -> Vec<(String, PropValue)> {
        Vec::new()
    }

    /// Properties followed by additional properties.
    fn all_properties(&self) -> Vec<(String, PropValue)> {
        let mut props = self.properties();
        props.extend(self.additional_properties());
        props
    }

    /// Names of the nodes fed by this node, without duplicates.
    fn next_nodes(&self) -> Vec<String> {
        let mut next: Vec<String> = Vec::new();
        for socket in self.outputs() {
            for link in socket.links {
                if !next.contains(&link.node) {
                    next.push(link.node);
                }
            }
        }
        next
    }

    /// Names of the nodes feeding this node.
    fn previous_nodes(&self) -> Vec<String> {
        let mut previous: Vec<String> = Vec::new();
        for socket in self.inputs() {
            if let Some(other) = socket.other() {
                if !previous.contains(&other.node) {
                    previous.push(other.node.clone());
                }
            }
        }
        previous
    }
}

/// Capability of nodes that can recompute themselves.
pub trait Processable {
    fn process(&mut self) -> Result<(), NodeError>;
}

/// A live node tree.
pub trait LiveTree {
    fn name(&self) -> &str;

    /// Trees can be switched off by the user; they are then never updated.
    fn is_processing_enabled(&self) -> bool;

    /// Whether the tree follows animation frames.
    fn is_animated(&self) -> bool;

    fn node_names(&self) -> Vec<String>;

    fn node(&self, name: &str) -> Option<&dyn LiveNode>;

    /// The node as a [`Processable`], if its type can recompute.
    fn processable(&mut self, name: &str) -> Option<&mut dyn Processable>;
}

/// Every tree the change detector may update.
pub trait LiveForest {
    fn tree_names(&self) -> Vec<String>;

    fn tree(&self, name: &str) -> Option<&dyn LiveTree>;

    fn tree_mut(&mut self, name: &str) -> Option<&mut dyn LiveTree>;
}
