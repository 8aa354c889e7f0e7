//! Nodeflow Core
//!
//! This crate decides which nodes of a visual node editor need recomputing
//! after the user edits a tree, and in which order. It implements:
//!
//! - A mirror of each host tree, kept in sync by edit events
//! - Dirty tracking and relevance filtering towards output nodes
//! - A topological walk with cycle detection
//! - An independent change detector that diffs live trees directly
//!
//! The host application owns the real trees and the node computations; this
//! crate only reads them through the traits in [`host`] and [`detect`].
//!
//! # Architecture
//!
//! - `graph`: tree mirrors, edit events, scheduling
//! - `detect`: the change-detection engine
//! - `host`: host-side interfaces plus an in-memory host
//! - `config`: user preferences
//! - `error`: error types
//!
//! # Example
//!
//! ```rust
//! use nodeflow_core::graph::{MirrorRegistry, TreeEvent};
//! use nodeflow_core::host::MemoryHost;
//!
//! let mut host = MemoryHost::new();
//! let tree = host.add_tree("tree");
//! let number = host.add_node(&tree, "n1", "Number", "SvNumberNode").unwrap();
//! let viewer = host.add_node(&tree, "n2", "Viewer", "SvVDExperimental").unwrap();
//! host.connect_nodes(&tree, &number, &viewer).unwrap();
//!
//! let mut registry = MirrorRegistry::default();
//! registry
//!     .update_reconstruction(&host, &tree, &[TreeEvent::add_node("n1")])
//!     .unwrap();
//!
//! let order: Vec<_> = registry
//!     .walk_worth_recalculating(&host, &tree)
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(order, vec![number, viewer]);
//! ```

pub mod config;
pub mod detect;
pub mod error;
pub mod graph;
pub mod host;

pub use config::UpdateConfig;
pub use error::{NodeError, UpdateError, UpdateResult};
