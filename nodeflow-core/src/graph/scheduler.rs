//! Update Scheduler
//!
//! The scheduler decides which mirrored nodes must be recomputed after a
//! batch of events, and in which order.
//!
//! # Algorithm
//!
//! ```text
//!  1----2-----3-----4
//!            / \
//!  8---9----5   6---7
//!     /
//!   10
//! ```
//!
//! Node 4 is an output node; 2 and 10 are outdated. Then:
//!
//! 1. Nodes connected to the output are everything upstream of 4, so 6 and 7
//!    are never computed. This set only changes with topology.
//! 2. Nodes effected by changes are everything downstream of 2 and 10, so 1
//!    and 8 keep their results.
//! 3. The intersection, {2, 3, 4, 5, 9, 10}, is worth recalculating.
//! 4. Emission starts from the outdated members of that set and follows
//!    output links inside it. A node is emitted only once all of its
//!    worth-recalculating predecessors were emitted; otherwise it waits.
//!    Whenever the frontier runs dry the waiting nodes are retried.
//!
//! A pass over the waiting nodes that emits nothing can never make progress
//! again, which means the worth-recalculating nodes contain a cycle. The walk
//! also gives up after a configurable number of steps.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use tracing::{trace, warn};

use super::mirror::GraphMirror;
use super::node::{Neighbours, NodeId};
use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::host::HostGraph;

/// Sets derived by the last walk over a mirror.
#[derive(Debug, Clone, Default)]
pub struct WalkState {
    output_nodes: BTreeSet<NodeId>,
    outdated_nodes: BTreeSet<NodeId>,
    nodes_connected_to_output: BTreeSet<NodeId>,
    effected_by_changes_nodes: BTreeSet<NodeId>,
    worth_recalculating_nodes: BTreeSet<NodeId>,
}

impl WalkState {
    /// Nodes whose type is on the sink allow-list.
    pub fn output_nodes(&self) -> &BTreeSet<NodeId> {
        &self.output_nodes
    }

    pub fn outdated_nodes(&self) -> &BTreeSet<NodeId> {
        &self.outdated_nodes
    }

    /// Nodes backward-reachable from an output node.
    pub fn nodes_connected_to_output(&self) -> &BTreeSet<NodeId> {
        &self.nodes_connected_to_output
    }

    /// Nodes forward-reachable from an outdated node.
    pub fn effected_by_changes_nodes(&self) -> &BTreeSet<NodeId> {
        &self.effected_by_changes_nodes
    }

    pub fn worth_recalculating_nodes(&self) -> &BTreeSet<NodeId> {
        &self.worth_recalculating_nodes
    }

    pub(crate) fn prepare<H: HostGraph + ?Sized>(
        &mut self,
        mirror: &GraphMirror,
        host: &H,
        config: &UpdateConfig,
    ) -> UpdateResult<()> {
        self.search_output_nodes(mirror, host, config)?;
        self.recalculate_connected_to_output_nodes(mirror);
        Ok(())
    }

    fn search_output_nodes<H: HostGraph + ?Sized>(
        &mut self,
        mirror: &GraphMirror,
        host: &H,
        config: &UpdateConfig,
    ) -> UpdateResult<()> {
        self.output_nodes.clear();
        for node in mirror.nodes() {
            let live = host.node(mirror.id(), node.id())?;
            if config.is_output_type(&live.type_id) {
                self.output_nodes.insert(node.id().clone());
            }
        }
        Ok(())
    }

    fn recalculate_connected_to_output_nodes(&mut self, mirror: &GraphMirror) {
        self.nodes_connected_to_output = mirror.feeding(self.output_nodes.iter().cloned());
    }

    pub(crate) fn recalculate_effected_by_changes_nodes(&mut self, mirror: &GraphMirror) {
        self.outdated_nodes = mirror
            .nodes()
            .filter(|node| node.is_outdated())
            .map(|node| node.id().clone())
            .collect();
        self.effected_by_changes_nodes = mirror.affected_by(self.outdated_nodes.iter().cloned());
        self.worth_recalculating_nodes = self
            .nodes_connected_to_output
            .intersection(&self.effected_by_changes_nodes)
            .cloned()
            .collect();
    }

    /// Snapshot the worth-recalculating subgraph into a walk.
    pub(crate) fn schedule(&self, mirror: &GraphMirror, max_steps: usize) -> WorthRecalculating {
        let worth: BTreeSet<NodeId> = self
            .worth_recalculating_nodes
            .iter()
            .filter(|id| mirror.node(id).is_some())
            .cloned()
            .collect();

        let mut predecessors = HashMap::with_capacity(worth.len());
        let mut successors = HashMap::with_capacity(worth.len());
        for id in &worth {
            let Some(node) = mirror.node(id) else {
                continue;
            };
            let within = |ids: Neighbours| -> Neighbours {
                ids.into_iter().filter(|n| worth.contains(n)).collect()
            };
            predecessors.insert(id.clone(), within(node.last()));
            successors.insert(id.clone(), within(node.next()));
        }

        let seeds = self.outdated_nodes.intersection(&worth).cloned().collect();
        WorthRecalculating::new(predecessors, successors, seeds, max_steps)
    }
}

/// Lazy, dependency-ordered sequence of nodes to recompute.
///
/// Yields `Err(BrokenUpdateGraph)` once and then ends if the nodes can't be
/// ordered. The walk owns a snapshot of the relevant subgraph and is not
/// restartable.
#[derive(Debug)]
pub struct WorthRecalculating {
    predecessors: HashMap<NodeId, Neighbours>,
    successors: HashMap<NodeId, Neighbours>,
    next_nodes: BTreeSet<NodeId>,
    waiting_nodes: BTreeSet<NodeId>,
    visited: HashSet<NodeId>,
    steps: usize,
    max_steps: usize,

    /// Whether anything was emitted since the waiting nodes were last retried.
    progressed: bool,
    finished: bool,
}

impl WorthRecalculating {
    /// Build a walk from explicit adjacency.
    ///
    /// `predecessors` and `successors` must only mention nodes that are
    /// themselves worth recalculating.
    pub fn new(
        predecessors: HashMap<NodeId, Neighbours>,
        successors: HashMap<NodeId, Neighbours>,
        seeds: BTreeSet<NodeId>,
        max_steps: usize,
    ) -> Self {
        Self {
            predecessors,
            successors,
            next_nodes: seeds,
            waiting_nodes: BTreeSet::new(),
            visited: HashSet::new(),
            steps: 0,
            max_steps,
            progressed: false,
            finished: false,
        }
    }

    /// Steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn can_be_recalculated(&self, node: &NodeId) -> bool {
        self.predecessors
            .get(node)
            .map_or(true, |before| before.iter().all(|n| self.visited.contains(n)))
    }

    fn abort(&mut self) -> UpdateError {
        self.finished = true;
        let pending = self.next_nodes.len() + self.waiting_nodes.len();
        warn!(steps = self.steps, pending, "update graph looks broken, giving up");
        UpdateError::BrokenUpdateGraph {
            steps: self.steps,
            pending,
        }
    }
}

impl Iterator for WorthRecalculating {
    type Item = UpdateResult<NodeId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if self.next_nodes.is_empty() && self.waiting_nodes.is_empty() {
                self.finished = true;
                return None;
            }
            if self.steps >= self.max_steps {
                return Some(Err(self.abort()));
            }
            self.steps += 1;

            let Some(current) = self.next_nodes.pop_first() else {
                if !self.progressed {
                    return Some(Err(self.abort()));
                }
                self.progressed = false;
                self.next_nodes = std::mem::take(&mut self.waiting_nodes);
                continue;
            };

            if !self.can_be_recalculated(&current) {
                trace!(node = %current, "waiting for predecessors");
                self.waiting_nodes.insert(current);
                continue;
            }

            if let Some(after) = self.successors.get(&current) {
                for next in after {
                    if !self.visited.contains(next) && !self.waiting_nodes.contains(next) {
                        self.next_nodes.insert(next.clone());
                    }
                }
            }
            self.visited.insert(current.clone());
            self.progressed = true;
            trace!(node = %current, step = self.steps, "recalculate");
            return Some(Ok(current));
        }
    }
}

/// A node recomputed by [`GraphMirror::recalculate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recalculated {
    pub node: NodeId,
    pub elapsed: Duration,
    /// Message of the error the node failed with, if any.
    pub error: Option<String>,
}

impl Recalculated {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TreeId;
    use crate::host::MemoryHost;

    const OUTPUT: &str = "SvStethoscopeNodeMK2";
    const PLAIN: &str = "SvNumberNode";

    fn ids(names: &[&str]) -> BTreeSet<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    /// Build host + synced mirror with every node up to date.
    fn build(nodes: &[(&str, &str)], links: &[(&str, &str)]) -> (MemoryHost, GraphMirror) {
        let mut host = MemoryHost::new();
        let tree = host.add_tree("tree");
        for (id, type_id) in nodes {
            host.add_node(&tree, *id, id.to_uppercase(), *type_id).unwrap();
        }
        for (from, to) in links {
            host.connect_nodes(&tree, &NodeId::from(*from), &NodeId::from(*to))
                .unwrap();
        }
        let mut mirror = GraphMirror::new(TreeId::from("tree"));
        mirror.full_resync(&host).unwrap();
        for id in mirror.node_ids() {
            mirror.mark_updated(&id).unwrap();
        }
        (host, mirror)
    }

    fn walk(host: &MemoryHost, mirror: &mut GraphMirror) -> Vec<NodeId> {
        mirror
            .walk_worth_recalculating(host, &UpdateConfig::default())
            .unwrap()
            .collect::<UpdateResult<Vec<_>>>()
            .unwrap()
    }

    fn position(order: &[NodeId], id: &str) -> usize {
        order.iter().position(|n| n.as_str() == id).unwrap()
    }

    #[test]
    fn diamond_walks_in_dependency_order() {
        let (host, mut mirror) = build(
            &[("a", PLAIN), ("b", PLAIN), ("c", PLAIN), ("d", OUTPUT)],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        mirror.set_outdated(&NodeId::from("a")).unwrap();

        let order = walk(&host, &mut mirror);
        assert_eq!(
            mirror.walk_state().worth_recalculating_nodes(),
            &ids(&["a", "b", "c", "d"])
        );
        assert_eq!(order.len(), 4);
        assert_eq!(order[0].as_str(), "a");
        assert_eq!(order[3].as_str(), "d");
    }

    #[test]
    fn disconnected_dirty_node_is_skipped() {
        let (host, mut mirror) = build(&[("a", PLAIN), ("b", OUTPUT)], &[]);
        mirror.set_outdated(&NodeId::from("a")).unwrap();

        let order = walk(&host, &mut mirror);
        assert!(mirror.walk_state().worth_recalculating_nodes().is_empty());
        assert!(order.is_empty());
    }

    #[test]
    fn documented_example() {
        //  1----2-----3-----4
        //            / \
        //  8---9----5   6---7
        //     /
        //   10
        let (host, mut mirror) = build(
            &[
                ("1", PLAIN),
                ("2", PLAIN),
                ("3", PLAIN),
                ("4", OUTPUT),
                ("5", PLAIN),
                ("6", PLAIN),
                ("7", PLAIN),
                ("8", PLAIN),
                ("9", PLAIN),
                ("10", PLAIN),
            ],
            &[
                ("1", "2"),
                ("2", "3"),
                ("3", "4"),
                ("5", "3"),
                ("3", "6"),
                ("6", "7"),
                ("8", "9"),
                ("9", "5"),
                ("10", "9"),
            ],
        );
        mirror.set_outdated(&NodeId::from("2")).unwrap();
        mirror.set_outdated(&NodeId::from("10")).unwrap();

        let order = walk(&host, &mut mirror);
        let state = mirror.walk_state();
        assert_eq!(state.output_nodes(), &ids(&["4"]));
        assert_eq!(state.outdated_nodes(), &ids(&["2", "10"]));
        assert!(!state.nodes_connected_to_output().contains("6"));
        assert!(!state.effected_by_changes_nodes().contains("1"));
        assert_eq!(
            state.worth_recalculating_nodes(),
            &ids(&["10", "9", "5", "2", "3", "4"])
        );

        let emitted: BTreeSet<_> = order.iter().cloned().collect();
        assert_eq!(&emitted, state.worth_recalculating_nodes());
        assert!(position(&order, "10") < position(&order, "9"));
        assert!(position(&order, "9") < position(&order, "5"));
        assert!(position(&order, "5") < position(&order, "3"));
        assert!(position(&order, "2") < position(&order, "3"));
        assert_eq!(order.last().unwrap().as_str(), "4");
    }

    #[test]
    fn upstream_only_branch_is_not_recalculated() {
        // u feeds the output but never changes; x is dirty but dangling.
        let (host, mut mirror) = build(
            &[("u", PLAIN), ("m", PLAIN), ("out", OUTPUT), ("x", PLAIN)],
            &[("u", "out"), ("m", "out"), ("m", "x")],
        );
        mirror.set_outdated(&NodeId::from("m")).unwrap();

        let order: BTreeSet<_> = walk(&host, &mut mirror).into_iter().collect();
        assert_eq!(order, ids(&["m", "out"]));
    }

    #[test]
    fn cycle_is_reported_not_looped() {
        let (host, mut mirror) = build(&[("a", PLAIN), ("b", OUTPUT)], &[("a", "b")]);
        mirror.connect("b->a", "b", "a").unwrap();
        mirror.set_outdated(&NodeId::from("a")).unwrap();

        let mut iter = mirror
            .walk_worth_recalculating(&host, &UpdateConfig::default())
            .unwrap();
        let err = iter.next().unwrap().unwrap_err();
        assert!(matches!(err, UpdateError::BrokenUpdateGraph { pending: 2, .. }));
        assert!(iter.next().is_none());
    }

    #[test]
    fn step_ceiling_aborts_long_walks() {
        let (host, mut mirror) = build(
            &[("a", PLAIN), ("b", PLAIN), ("c", OUTPUT)],
            &[("a", "b"), ("b", "c")],
        );
        mirror.set_outdated(&NodeId::from("a")).unwrap();

        let config = UpdateConfig::default().with_max_walk_steps(2);
        let results: Vec<_> = mirror
            .walk_worth_recalculating(&host, &config)
            .unwrap()
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(UpdateError::BrokenUpdateGraph { steps: 2, pending: 1 })
        ));
    }

    #[test]
    fn topology_sets_are_cached_between_walks() {
        let (host, mut mirror) = build(&[("a", PLAIN), ("b", OUTPUT)], &[("a", "b")]);
        walk(&host, &mut mirror);
        assert!(!mirror.topology_changed());
        assert_eq!(mirror.walk_state().nodes_connected_to_output(), &ids(&["a", "b"]));

        mirror.set_outdated(&NodeId::from("a")).unwrap();
        let order = walk(&host, &mut mirror);
        assert_eq!(order, vec![NodeId::from("a"), NodeId::from("b")]);
        assert!(!mirror.topology_changed());
    }

    #[test]
    fn recalculate_clears_outdated_flags() {
        let (host, mut mirror) = build(
            &[("a", PLAIN), ("b", PLAIN), ("c", OUTPUT)],
            &[("a", "b"), ("b", "c")],
        );
        mirror.set_outdated(&NodeId::from("b")).unwrap();

        let mut processed = Vec::new();
        let done = {
            let mut processor = |_: &TreeId, node: &NodeId| -> Result<(), crate::error::NodeError> {
                processed.push(node.clone());
                Ok(())
            };
            mirror
                .recalculate(&host, &mut processor, &UpdateConfig::default())
                .unwrap()
        };

        assert_eq!(processed, vec![NodeId::from("b"), NodeId::from("c")]);
        let order: Vec<_> = done.iter().map(|r| r.node.clone()).collect();
        assert_eq!(order, processed);
        assert!(mirror.nodes().all(|node| !node.is_outdated()));

        let mut untouched = |_: &TreeId, _: &NodeId| -> Result<(), crate::error::NodeError> {
            Err("nothing should be recalculated".into())
        };
        let again = mirror
            .recalculate(&host, &mut untouched, &UpdateConfig::default())
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn failing_node_stays_outdated() {
        let (host, mut mirror) = build(&[("a", PLAIN), ("b", OUTPUT)], &[("a", "b")]);
        mirror.set_outdated(&NodeId::from("a")).unwrap();

        let mut processor = |_: &TreeId, node: &NodeId| -> Result<(), crate::error::NodeError> {
            if node.as_str() == "b" {
                return Err("viewer has no object".into());
            }
            Ok(())
        };
        let done = mirror
            .recalculate(&host, &mut processor, &UpdateConfig::default())
            .unwrap();

        assert_eq!(done.len(), 2);
        assert!(done[0].is_ok());
        assert_eq!(done[1].node, NodeId::from("b"));
        assert_eq!(done[1].error.as_deref(), Some("viewer has no object"));
        assert!(!mirror.node(&NodeId::from("a")).unwrap().is_outdated());
        assert!(mirror.node(&NodeId::from("b")).unwrap().is_outdated());

        let mut ok = |_: &TreeId, _: &NodeId| -> Result<(), crate::error::NodeError> { Ok(()) };
        let retried = mirror
            .recalculate(&host, &mut ok, &UpdateConfig::default())
            .unwrap();
        let order: Vec<_> = retried.iter().map(|r| r.node.clone()).collect();
        assert_eq!(order, vec![NodeId::from("b")]);
        assert!(mirror.nodes().all(|node| !node.is_outdated()));
    }

    #[test]
    fn failure_does_not_stop_independent_branches() {
        let (host, mut mirror) = build(
            &[("a", PLAIN), ("b", PLAIN), ("out1", OUTPUT), ("out2", OUTPUT)],
            &[("a", "out1"), ("b", "out2")],
        );
        mirror.set_outdated(&NodeId::from("a")).unwrap();
        mirror.set_outdated(&NodeId::from("b")).unwrap();

        let mut processed = Vec::new();
        let done = {
            let mut processor = |_: &TreeId, node: &NodeId| -> Result<(), crate::error::NodeError> {
                processed.push(node.clone());
                if node.as_str() == "a" {
                    return Err("bad input".into());
                }
                Ok(())
            };
            mirror
                .recalculate(&host, &mut processor, &UpdateConfig::default())
                .unwrap()
        };

        assert_eq!(processed.len(), 4);
        assert!(processed.contains(&NodeId::from("b")));
        assert!(processed.contains(&NodeId::from("out2")));
        let failed: Vec<_> = done.iter().filter(|r| !r.is_ok()).map(|r| r.node.clone()).collect();
        assert_eq!(failed, vec![NodeId::from("a")]);

        assert!(mirror.node(&NodeId::from("a")).unwrap().is_outdated());
        assert!(!mirror.node(&NodeId::from("b")).unwrap().is_outdated());
        assert!(!mirror.node(&NodeId::from("out2")).unwrap().is_outdated());
    }

    #[test]
    fn explicit_adjacency_walk() {
        let preds = HashMap::from([
            (NodeId::from("x"), Neighbours::new()),
            (NodeId::from("y"), Neighbours::from_vec(vec![NodeId::from("x")])),
        ]);
        let succs = HashMap::from([
            (NodeId::from("x"), Neighbours::from_vec(vec![NodeId::from("y")])),
            (NodeId::from("y"), Neighbours::new()),
        ]);
        let walk = WorthRecalculating::new(preds, succs, ids(&["y", "x"]), 100);
        let order: Vec<_> = walk.map(Result::unwrap).collect();
        assert_eq!(order, vec![NodeId::from("x"), NodeId::from("y")]);
    }
}
