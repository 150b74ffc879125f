//! Extended dependency graph for `--track-ios --graph`: the full state
//! graph including Remap and many-to-one joins, as an arena of nodes with
//! typed indices instead of owning pointers (grounded in `alias_tree.rs`'s
//! flat `Vec`-backed shape, generalized from a segment tree to a small node
//! arena). The base `LifetimeTracker` in the parent module covers the
//! common Q/G/I/D/C path and is what `--track-ios` alone enables; this
//! submodule only engages with `--graph` on top of it.

use std::collections::HashMap;

use crate::error::AnalyzerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Queue,
    Merge,
    Insert,
    Dispatch,
    Complete,
    Requeue,
    Plug,
    Unplug,
    Split,
    Remap,
}

#[derive(Clone, Debug)]
pub struct GraphNode {
    pub kind: NodeKind,
    pub device: u32,
    pub sector: u64,
    pub time: u64,
    /// The event this one directly followed in the same request's timeline.
    pub parent: Option<NodeId>,
    /// Set on a Remap node: the node space the request continues in.
    pub remap_target: Option<NodeId>,
    /// Set on a Complete node that accounts for more than one upstream
    /// request (a many-to-one merge join observed at completion time).
    pub joins: Vec<NodeId>,
}

/// Default bound on retraversal attempts for a chain blocked on a node
/// that hasn't arrived yet, matching §4.4's "abandoned after a small
/// bounded number of passes (default 5)".
pub const DEFAULT_MAX_RETRIES: u32 = 5;

pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    live: HashMap<(u32, u64), NodeId>,
    retries: HashMap<NodeId, u32>,
    max_retries: u32,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            nodes: Vec::new(),
            live: HashMap::new(),
            retries: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0]
    }

    fn push(&mut self, node: GraphNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Record a lifecycle event for (device, sector), chaining it to
    /// whichever node currently occupies that key.
    pub fn record(&mut self, kind: NodeKind, device: u32, sector: u64, time: u64) -> NodeId {
        let parent = self.live.get(&(device, sector)).copied();
        let id = self.push(GraphNode {
            kind,
            device,
            sector,
            time,
            parent,
            remap_target: None,
            joins: Vec::new(),
        });
        self.live.insert((device, sector), id);
        id
    }

    /// Record a remap: the request at (old_device, old_sector) continues
    /// its life at (new_device, new_sector). Rejects the edge if it would
    /// close a cycle.
    pub fn record_remap(
        &mut self,
        old_device: u32,
        old_sector: u64,
        new_device: u32,
        new_sector: u64,
        time: u64,
    ) -> Result<NodeId, AnalyzerError> {
        let remap_id = self.record(NodeKind::Remap, old_device, old_sector, time);
        let target_id = self.live.get(&(new_device, new_sector)).copied();
        if let Some(target) = target_id {
            if self.reachable(target, remap_id) {
                return Err(cycle_error(old_device, old_sector));
            }
            self.nodes[remap_id.0].remap_target = Some(target);
        }
        self.live.insert((new_device, new_sector), remap_id);
        Ok(remap_id)
    }

    /// Record that `complete` accounts for requests merged in from
    /// `sources` as well as its own chain (a many-to-one join).
    pub fn record_join(&mut self, complete: NodeId, sources: &[NodeId]) -> Result<(), AnalyzerError> {
        for &source in sources {
            if self.reachable(source, complete) {
                return Err(cycle_error(self.nodes[complete.0].device, self.nodes[complete.0].sector));
            }
        }
        self.nodes[complete.0].joins.extend_from_slice(sources);
        Ok(())
    }

    /// Is `target` reachable from `start` by following parent/remap/join
    /// edges? Used to reject an edge that would close a cycle before it's
    /// added.
    fn reachable(&self, start: NodeId, target: NodeId) -> bool {
        let mut stack = vec![start];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            let node = &self.nodes[current.0];
            stack.extend(node.parent);
            stack.extend(node.remap_target);
            stack.extend(node.joins.iter().copied());
        }
        false
    }

    /// Walk back from a Complete node collecting every ancestor (through
    /// parent, remap, and join edges) that has a fully-resolved chain. If
    /// any edge points nowhere (the referenced node was never recorded —
    /// can't happen with `NodeId`s minted by this graph, but a dangling
    /// join built from a stale id would surface as `None` here), the
    /// traversal is retried on a later call up to `max_retries` times
    /// before the chain is abandoned.
    pub fn traverse(&mut self, complete: NodeId) -> TraversalOutcome {
        let mut chain = Vec::new();
        let mut stack = vec![complete];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = stack.pop() {
            if current.0 >= self.nodes.len() {
                let attempts = self.retries.entry(complete).or_insert(0);
                *attempts += 1;
                return if *attempts >= self.max_retries {
                    self.retries.remove(&complete);
                    TraversalOutcome::Abandoned
                } else {
                    TraversalOutcome::Pending
                };
            }
            if !seen.insert(current) {
                continue;
            }
            chain.push(current);
            let node = &self.nodes[current.0];
            stack.extend(node.parent);
            stack.extend(node.remap_target);
            stack.extend(node.joins.iter().copied());
        }
        self.retries.remove(&complete);
        TraversalOutcome::Ready(chain)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug)]
pub enum TraversalOutcome {
    Ready(Vec<NodeId>),
    Pending,
    Abandoned,
}

fn cycle_error(device: u32, sector: u64) -> AnalyzerError {
    AnalyzerError::ResourceExhaustion {
        device,
        detail: format!("dependency graph cycle detected at sector {sector}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_a_simple_chain() {
        let mut graph = DependencyGraph::new();
        let q = graph.record(NodeKind::Queue, 8, 100, 0);
        let i = graph.record(NodeKind::Insert, 8, 100, 1);
        let d = graph.record(NodeKind::Dispatch, 8, 100, 2);
        let c = graph.record(NodeKind::Complete, 8, 100, 3);
        assert_eq!(graph.node(i).parent, Some(q));
        assert_eq!(graph.node(d).parent, Some(i));
        assert_eq!(graph.node(c).parent, Some(d));

        match graph.traverse(c) {
            TraversalOutcome::Ready(chain) => assert_eq!(chain.len(), 4),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn remap_links_into_the_new_key_chain() {
        let mut graph = DependencyGraph::new();
        graph.record(NodeKind::Queue, 8, 100, 0);
        let new_q = graph.record(NodeKind::Queue, 9, 500, 1);
        let remap = graph.record_remap(8, 100, 9, 500, 2).unwrap();
        assert_eq!(graph.node(remap).remap_target, Some(new_q));
    }

    #[test]
    fn join_rejects_a_cycle() {
        let mut graph = DependencyGraph::new();
        let a = graph.record(NodeKind::Queue, 8, 100, 0);
        let b = graph.record(NodeKind::Complete, 8, 200, 1);
        // b is not an ancestor of a, so joining a onto b is fine...
        assert!(graph.record_join(b, &[a]).is_ok());
        // ...but joining b onto a would close a cycle (a -> ... -> b -> a).
        assert!(graph.record_join(a, &[b]).is_err());
    }

    #[test]
    fn abandons_after_default_retry_bound() {
        let mut graph = DependencyGraph::new();
        let dangling = NodeId(42);
        for _ in 0..DEFAULT_MAX_RETRIES - 1 {
            assert!(matches!(graph.traverse(dangling), TraversalOutcome::Pending));
        }
        assert!(matches!(graph.traverse(dangling), TraversalOutcome::Abandoned));
    }
}
