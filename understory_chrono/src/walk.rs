// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Iterative depth-first graph walk with cycle detection.
//!
//! [`WalkDepth`] drives an explicit-stack DFS over any [`WalkSource`] and
//! reports three kinds of events to a [`WalkVisitor`]:
//!
//! - `on_node` when a node is reached for the first time,
//! - `on_topological_node` once every node reachable from it has completed,
//! - `on_cycle` when an edge leads back to a node that is still in progress.
//!
//! The topological stream is a post-order: in the forward direction (towards
//! dependents) the last node reported is the first one that may be computed.
//!
//! ```
//! use understory_chrono::{WalkDepth, WalkDirection, WalkOutcome, WalkSource, WalkVisitor};
//!
//! struct Chain;
//!
//! impl WalkSource<u32> for Chain {
//!     fn for_each_edge(&self, node: u32, direction: WalkDirection, mut f: impl FnMut(u32)) {
//!         match direction {
//!             WalkDirection::Forward if node < 3 => f(node + 1),
//!             WalkDirection::Backward if node > 0 => f(node - 1),
//!             _ => {}
//!         }
//!     }
//! }
//!
//! #[derive(Default)]
//! struct PostOrder(Vec<u32>);
//!
//! impl WalkVisitor<u32> for PostOrder {
//!     fn on_topological_node(&mut self, node: u32) {
//!         self.0.push(node);
//!     }
//! }
//!
//! let mut walker = WalkDepth::new();
//! let mut order = PostOrder::default();
//! let outcome = walker.walk(&Chain, WalkDirection::Forward, [0], &mut order);
//! assert_eq!(outcome, WalkOutcome::Complete);
//! assert_eq!(order.0, [3, 2, 1, 0]);
//! ```

use core::hash::Hash;

use hashbrown::HashMap;

/// Which edges a walk follows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WalkDirection {
    /// From a node to the nodes that depend on it.
    Forward,
    /// From a node to the nodes it depends on.
    Backward,
}

/// A graph the walker can traverse.
pub trait WalkSource<N> {
    /// Calls `f` for every node adjacent to `node` in `direction`.
    ///
    /// Edges should be reported in a stable order; the walker visits the last
    /// reported edge first.
    fn for_each_edge(&self, node: N, direction: WalkDirection, f: impl FnMut(N));
}

/// What the walker does after reporting a cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum OnCycle {
    /// Discard the back edge and continue walking.
    Resume,
    /// Stop the walk.
    #[default]
    Cancel,
}

/// How a walk ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WalkOutcome {
    /// Every reachable node completed.
    Complete,
    /// A visitor cancelled the walk from `on_cycle`.
    Cancelled,
}

/// Callbacks invoked by [`WalkDepth::walk`].
///
/// Every method has an empty default, so visitors only implement what they need.
pub trait WalkVisitor<N> {
    /// A node was reached for the first time, `depth` entries deep in the walk stack.
    fn on_node(&mut self, node: N, depth: usize) {
        let _ = (node, depth);
    }

    /// Every node reachable from `node` has completed.
    fn on_topological_node(&mut self, node: N) {
        let _ = node;
    }

    /// An edge leads back to `node`, which is still in progress.
    ///
    /// `path` lists the nodes along the cycle, starting and ending with `node`.
    fn on_cycle(&mut self, node: N, path: &[N]) -> OnCycle {
        let _ = (node, path);
        OnCycle::Cancel
    }
}

/// Per-node bookkeeping recorded by a walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VisitInfo {
    /// Stack depth at which the node was first reached (1 for a root on the bottom).
    pub visited_at: usize,
    /// `true` once every node reachable from this one has completed.
    pub visited_topologically: bool,
}

/// Reusable depth-first walker.
///
/// The stack and the visit map retain their capacity between walks. Visit
/// information from the last walk stays available through
/// [`visit_info`](Self::visit_info) until the next walk starts.
#[derive(Debug, Clone)]
pub struct WalkDepth<N>
where
    N: Copy + Eq + Hash,
{
    stack: Vec<N>,
    visited: HashMap<N, VisitInfo>,
}

impl<N> Default for WalkDepth<N>
where
    N: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<N> WalkDepth<N>
where
    N: Copy + Eq + Hash,
{
    /// Creates an empty walker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            visited: HashMap::new(),
        }
    }

    /// Returns what the last walk recorded for `node`.
    #[must_use]
    pub fn visit_info(&self, node: N) -> Option<VisitInfo> {
        self.visited.get(&node).copied()
    }

    /// Returns `true` if the last walk reached `node`.
    #[must_use]
    pub fn is_visited(&self, node: N) -> bool {
        self.visited.contains_key(&node)
    }

    /// Returns the number of nodes reached by the last walk.
    #[must_use]
    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    /// Forgets everything recorded by the last walk.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.visited.clear();
    }

    /// Walks `source` from `roots`, following edges in `direction`.
    ///
    /// Roots are pushed in order, so the last root is walked first. Nodes
    /// reached from an earlier root are not walked again.
    pub fn walk<S, V>(
        &mut self,
        source: &S,
        direction: WalkDirection,
        roots: impl IntoIterator<Item = N>,
        visitor: &mut V,
    ) -> WalkOutcome
    where
        S: WalkSource<N>,
        V: WalkVisitor<N> + ?Sized,
    {
        self.clear();
        self.stack.extend(roots);

        while let Some(&node) = self.stack.last() {
            let depth = self.stack.len();

            match self.visited.get(&node).copied() {
                None => {
                    self.visited.insert(
                        node,
                        VisitInfo {
                            visited_at: depth,
                            visited_topologically: false,
                        },
                    );
                    visitor.on_node(node, depth);

                    let visited = &self.visited;
                    let stack = &mut self.stack;
                    source.for_each_edge(node, direction, |next| {
                        if !visited.get(&next).is_some_and(|info| info.visited_topologically) {
                            stack.push(next);
                        }
                    });

                    if self.stack.len() == depth {
                        self.stack.pop();
                        self.complete(node, visitor);
                    }
                }
                Some(info) if info.visited_topologically => {
                    self.stack.pop();
                }
                Some(info) if info.visited_at < depth => {
                    let path = self.cycle_path(node, info.visited_at);
                    match visitor.on_cycle(node, &path) {
                        OnCycle::Resume => {
                            self.stack.pop();
                        }
                        OnCycle::Cancel => return WalkOutcome::Cancelled,
                    }
                }
                Some(_) => {
                    self.stack.pop();
                    self.complete(node, visitor);
                }
            }
        }

        WalkOutcome::Complete
    }

    fn complete<V>(&mut self, node: N, visitor: &mut V)
    where
        V: WalkVisitor<N> + ?Sized,
    {
        if let Some(info) = self.visited.get_mut(&node) {
            info.visited_topologically = true;
        }
        visitor.on_topological_node(node);
    }

    /// Nodes currently in progress from the first occurrence of `node` upwards.
    fn cycle_path(&self, node: N, visited_at: usize) -> Vec<N> {
        let start = visited_at - 1;
        let mut path: Vec<N> = self.stack[start..]
            .iter()
            .enumerate()
            .filter(|&(offset, entry)| {
                self.visited.get(entry).is_some_and(|info| {
                    info.visited_at == start + offset + 1 && !info.visited_topologically
                })
            })
            .map(|(_, &entry)| entry)
            .collect();
        path.push(node);
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adjacency list with edges kept in insertion order.
    #[derive(Default)]
    struct Edges {
        out: HashMap<u32, Vec<u32>>,
        into: HashMap<u32, Vec<u32>>,
    }

    impl Edges {
        fn add(&mut self, from: u32, to: u32) {
            self.out.entry(from).or_default().push(to);
            self.into.entry(to).or_default().push(from);
        }
    }

    impl WalkSource<u32> for Edges {
        fn for_each_edge(&self, node: u32, direction: WalkDirection, f: impl FnMut(u32)) {
            let map = match direction {
                WalkDirection::Forward => &self.out,
                WalkDirection::Backward => &self.into,
            };
            map.get(&node)
                .into_iter()
                .flatten()
                .copied()
                .for_each(f);
        }
    }

    struct Recorder {
        action: OnCycle,
        cycles: Vec<Vec<u32>>,
        nodes: Vec<(u32, usize)>,
        topological: Vec<u32>,
    }

    impl Recorder {
        fn new(action: OnCycle) -> Self {
            Self {
                action,
                cycles: Vec::new(),
                nodes: Vec::new(),
                topological: Vec::new(),
            }
        }
    }

    impl WalkVisitor<u32> for Recorder {
        fn on_node(&mut self, node: u32, depth: usize) {
            self.nodes.push((node, depth));
        }

        fn on_topological_node(&mut self, node: u32) {
            self.topological.push(node);
        }

        fn on_cycle(&mut self, _node: u32, path: &[u32]) -> OnCycle {
            self.cycles.push(path.to_vec());
            self.action
        }
    }

    fn walk(edges: &Edges, roots: &[u32], action: OnCycle) -> (WalkOutcome, Recorder) {
        let mut recorder = Recorder::new(action);
        let mut walker = WalkDepth::new();
        let outcome = walker.walk(
            edges,
            WalkDirection::Forward,
            roots.iter().copied(),
            &mut recorder,
        );
        (outcome, recorder)
    }

    fn two_self_loops() -> Edges {
        let mut edges = Edges::default();
        edges.add(1, 1);
        edges.add(2, 2);
        edges.add(1, 2);
        edges
    }

    #[test]
    fn self_loops_reported_per_root_in_either_root_order() {
        let edges = two_self_loops();

        let (outcome, recorder) = walk(&edges, &[2, 1], OnCycle::Resume);
        assert_eq!(outcome, WalkOutcome::Complete);
        assert_eq!(recorder.cycles, [vec![2, 2], vec![1, 1]]);

        let (_, recorder) = walk(&edges, &[1, 2], OnCycle::Resume);
        assert_eq!(recorder.cycles, [vec![2, 2], vec![1, 1]]);
    }

    #[test]
    fn self_loop_cancels_walk() {
        let mut edges = Edges::default();
        edges.add(1, 1);

        let (outcome, recorder) = walk(&edges, &[1], OnCycle::Cancel);
        assert_eq!(outcome, WalkOutcome::Cancelled);
        assert_eq!(recorder.cycles, [vec![1, 1]]);
        assert!(recorder.topological.is_empty());
    }

    #[test]
    fn two_node_cycle_path() {
        let mut edges = Edges::default();
        edges.add(1, 2);
        edges.add(2, 1);

        let (_, recorder) = walk(&edges, &[1], OnCycle::Cancel);
        assert_eq!(recorder.cycles, [vec![1, 2, 1]]);
    }

    #[test]
    fn cycle_path_skips_the_entry_chain() {
        let mut edges = Edges::default();
        edges.add(1, 2);
        edges.add(2, 3);
        edges.add(3, 4);
        edges.add(4, 2);
        edges.add(3, 5);

        let (outcome, recorder) = walk(&edges, &[1], OnCycle::Cancel);
        assert_eq!(outcome, WalkOutcome::Cancelled);
        assert_eq!(recorder.cycles, [vec![2, 3, 4, 2]]);
    }

    #[test]
    fn cycle_path_ignores_completed_side_branches() {
        let mut edges = Edges::default();
        edges.add(1, 2);
        edges.add(2, 3);
        edges.add(3, 4);
        edges.add(4, 2);
        edges.add(3, 5);

        edges.add(2, 6);
        edges.add(2, 7);
        edges.add(6, 7);

        edges.add(3, 8);
        edges.add(3, 9);
        edges.add(8, 9);

        edges.add(4, 10);
        edges.add(4, 11);
        edges.add(11, 10);

        let (_, recorder) = walk(&edges, &[1], OnCycle::Cancel);
        assert_eq!(recorder.cycles, [vec![2, 3, 4, 2]]);
    }

    #[test]
    fn resume_reports_every_cycle() {
        let mut edges = Edges::default();
        edges.add(1, 2);
        edges.add(2, 3);
        edges.add(2, 1);
        edges.add(3, 2);

        let (outcome, recorder) = walk(&edges, &[1], OnCycle::Resume);
        assert_eq!(outcome, WalkOutcome::Complete);
        assert_eq!(recorder.cycles, [vec![1, 2, 1], vec![2, 3, 2]]);
        assert_eq!(recorder.topological, [3, 2, 1]);
    }

    #[test]
    fn resume_order_follows_edge_order() {
        let mut edges = Edges::default();
        edges.add(1, 2);
        edges.add(2, 1);
        edges.add(2, 3);
        edges.add(3, 2);

        let (_, recorder) = walk(&edges, &[1], OnCycle::Resume);
        assert_eq!(recorder.cycles, [vec![2, 3, 2], vec![1, 2, 1]]);
    }

    #[test]
    fn diamond_completes_each_node_once() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4
        let mut edges = Edges::default();
        edges.add(1, 2);
        edges.add(1, 3);
        edges.add(2, 4);
        edges.add(3, 4);

        let (outcome, recorder) = walk(&edges, &[1], OnCycle::Cancel);
        assert_eq!(outcome, WalkOutcome::Complete);
        assert!(recorder.cycles.is_empty());
        assert_eq!(recorder.topological, [4, 3, 2, 1]);
        assert_eq!(recorder.nodes, [(1, 1), (3, 3), (4, 4), (2, 2)]);
    }

    #[test]
    fn backward_walk_follows_reverse_edges() {
        let mut edges = Edges::default();
        edges.add(1, 2);
        edges.add(2, 3);

        let mut recorder = Recorder::new(OnCycle::Cancel);
        let mut walker = WalkDepth::new();
        walker.walk(&edges, WalkDirection::Backward, [3], &mut recorder);
        assert_eq!(recorder.topological, [1, 2, 3]);
    }

    #[test]
    fn visit_info_survives_until_next_walk() {
        let mut edges = Edges::default();
        edges.add(1, 2);

        let mut walker = WalkDepth::new();
        let mut recorder = Recorder::new(OnCycle::Cancel);
        walker.walk(&edges, WalkDirection::Forward, [1], &mut recorder);

        assert_eq!(
            walker.visit_info(2),
            Some(VisitInfo {
                visited_at: 2,
                visited_topologically: true,
            })
        );
        assert!(walker.is_visited(1));
        assert_eq!(walker.visited_len(), 2);

        walker.walk(&edges, WalkDirection::Forward, [2], &mut recorder);
        assert!(!walker.is_visited(1));
    }
}
