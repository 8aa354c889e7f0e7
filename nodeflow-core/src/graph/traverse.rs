//! Reachability traversal over a mirror.
//!
//! ```text
//!  1----3
//!   \  /
//! 4--2
//! ```
//!
//! Walking forward from 1 visits 1, 2 and 3 but never 4. Visiting order is
//! only guaranteed to reach every node once; the frontier pops the smallest
//! id first so runs are reproducible.

use std::collections::{BTreeSet, HashSet};

use super::mirror::GraphMirror;
use super::node::{Neighbours, Node, NodeId};

/// Which edges a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow output links (downstream).
    Forward,
    /// Follow input links (upstream).
    Backward,
}

impl Direction {
    fn neighbours(self, node: &Node) -> Neighbours {
        match self {
            Direction::Forward => node.next(),
            Direction::Backward => node.last(),
        }
    }
}

/// Lazy traversal yielding every node reachable from a seed set.
///
/// Seeds and neighbours that are not (or no longer) in the mirror are
/// skipped; a link may outlive one of its endpoints until its own
/// `free_link` event arrives.
pub struct Traversal<'a> {
    mirror: &'a GraphMirror,
    direction: Direction,
    frontier: BTreeSet<NodeId>,
    visited: HashSet<NodeId>,
}

impl<'a> Traversal<'a> {
    pub fn new<I>(mirror: &'a GraphMirror, seeds: I, direction: Direction) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        Self {
            mirror,
            direction,
            frontier: seeds.into_iter().collect(),
            visited: HashSet::new(),
        }
    }

    pub fn forward<I>(mirror: &'a GraphMirror, seeds: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        Self::new(mirror, seeds, Direction::Forward)
    }

    pub fn backward<I>(mirror: &'a GraphMirror, seeds: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        Self::new(mirror, seeds, Direction::Backward)
    }
}

impl Iterator for Traversal<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(current) = self.frontier.pop_first() {
            if !self.visited.insert(current.clone()) {
                continue;
            }
            let Some(node) = self.mirror.node(&current) else {
                continue;
            };
            for neighbour in self.direction.neighbours(node) {
                if !self.visited.contains(&neighbour) {
                    self.frontier.insert(neighbour);
                }
            }
            return Some(current);
        }
        None
    }
}
