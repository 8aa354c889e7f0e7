//! Update Graph
//!
//! This module mirrors the host's node trees and schedules recomputation
//! after they change.
//!
//! # Overview
//!
//! The host owns the real node trees and reports edits as [`TreeEvent`]s.
//! Each tree has a [`GraphMirror`]:
//!
//! - Nodes and links are copied by id; sockets are not modelled.
//! - Events flip nodes to outdated (new nodes, property edits, relinking).
//! - A walk intersects "downstream of an outdated node" with "upstream of an
//!   output node" and emits that set in dependency order.
//!
//! # Design Decisions
//!
//! 1. Links store endpoint ids, not references, so a link whose node was
//!    freed stays a valid value until its own `free_link` event arrives.
//!
//! 2. Reachability from output nodes only depends on topology and is cached
//!    until a node or link is added or removed.
//!
//! 3. Walks pop the smallest node id first. Any order satisfying the
//!    dependencies is correct; a fixed one keeps runs reproducible.

mod event;
mod mirror;
mod node;
mod registry;
mod scheduler;
mod traverse;

pub use event::{EventKind, EventTarget, TreeEvent};
pub use mirror::{ConsistencyReport, GraphMirror};
pub use node::{Link, LinkId, Neighbours, Node, NodeId, TreeId};
pub use registry::MirrorRegistry;
pub use scheduler::{Recalculated, WalkState, WorthRecalculating};
pub use traverse::{Direction, Traversal};
