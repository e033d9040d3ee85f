//! Boykov-Kolmogorov min-cut / max-flow over an explicit residual graph.
//!
//! Edges are stored in pairs: edge `e` and its reverse `e ^ 1`. Each node
//! keeps a single net terminal capacity (positive: residual from the source,
//! negative: residual to the sink), so data terms may be shifted freely.

use std::collections::VecDeque;

/// Failures that leave the cut undefined.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub(crate) enum GraphError {
    /// An edge or terminal capacity was NaN or infinite.
    #[error("non-finite capacity {value} at node {node}")]
    NonFiniteCapacity { node: usize, value: f64 },

    /// An edge capacity was negative.
    #[error("negative capacity {value} between nodes {from} and {to}")]
    NegativeCapacity { from: usize, to: usize, value: f64 },

    /// An augmenting path had no positive bottleneck.
    #[error("augmenting path with zero bottleneck")]
    ZeroBottleneck,

    /// A search tree was inconsistent while tracing a path.
    #[error("search tree broken at node {0}")]
    BrokenTree(usize),

    /// The total flow overflowed.
    #[error("total flow is not finite")]
    NonFiniteFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tree {
    Source,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    Free,
    Terminal,
    Orphan,
    /// Edge from the node to its parent.
    Edge(usize),
}

#[derive(Debug, Clone)]
struct Node {
    first: Option<usize>,
    tcap: f64,
    parent: Parent,
    tree: Tree,
    ts: usize,
    dist: usize,
    active: bool,
}

#[derive(Debug, Clone)]
struct Edge {
    dst: usize,
    next: Option<usize>,
    cap: f64,
}

/// Residual edge a node of `tree` grows along, for an edge `e` leaving it.
const fn outward(tree: Tree, e: usize) -> usize {
    match tree {
        Tree::Source => e,
        Tree::Sink => e ^ 1,
    }
}

/// Edge carrying flow along an augmenting path, for a parent edge `e`.
const fn along_path(tree: Tree, e: usize) -> usize {
    match tree {
        Tree::Source => e ^ 1,
        Tree::Sink => e,
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    flow: f64,
}

impl Graph {
    pub(crate) fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(nodes),
            edges: Vec::with_capacity(2 * edges),
            flow: 0.0,
        }
    }

    pub(crate) fn add_node(&mut self) -> usize {
        self.nodes.push(Node {
            first: None,
            tcap: 0.0,
            parent: Parent::Free,
            tree: Tree::Source,
            ts: 0,
            dist: 0,
            active: false,
        });
        self.nodes.len() - 1
    }

    /// Connect `from` and `to` with capacities in both directions.
    pub(crate) fn add_edge(
        &mut self,
        from: usize,
        to: usize,
        cap: f64,
        rev_cap: f64,
    ) -> Result<(), GraphError> {
        for value in [cap, rev_cap] {
            if !value.is_finite() {
                return Err(GraphError::NonFiniteCapacity { node: from, value });
            }
            if value < 0.0 {
                return Err(GraphError::NegativeCapacity { from, to, value });
            }
        }

        let e = self.edges.len();
        self.edges.push(Edge {
            dst: to,
            next: self.nodes[from].first,
            cap,
        });
        self.nodes[from].first = Some(e);
        self.edges.push(Edge {
            dst: from,
            next: self.nodes[to].first,
            cap: rev_cap,
        });
        self.nodes[to].first = Some(e + 1);
        Ok(())
    }

    /// Add source and sink capacities to `node`.
    ///
    /// Only the difference matters for the cut; the shared part is counted
    /// as flow immediately.
    pub(crate) fn add_terminal_weights(
        &mut self,
        node: usize,
        source: f64,
        sink: f64,
    ) -> Result<(), GraphError> {
        for value in [source, sink] {
            if !value.is_finite() {
                return Err(GraphError::NonFiniteCapacity { node, value });
            }
        }

        let mut source = source;
        let mut sink = sink;
        let current = self.nodes[node].tcap;
        if current > 0.0 {
            source += current;
        } else {
            sink -= current;
        }
        self.flow += source.min(sink);
        self.nodes[node].tcap = source - sink;
        Ok(())
    }

    /// Whether `node` ended on the source side of the minimum cut.
    pub(crate) fn in_source_segment(&self, node: usize) -> bool {
        let n = &self.nodes[node];
        n.parent != Parent::Free && n.tree == Tree::Source
    }

    /// Run the solver to completion and return the total flow (the cut cost).
    pub(crate) fn max_flow(&mut self) -> Result<f64, GraphError> {
        let mut active = VecDeque::new();
        let mut orphans = Vec::new();
        let mut time = 0usize;

        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.ts = 0;
            if node.tcap == 0.0 {
                node.parent = Parent::Free;
                node.active = false;
            } else {
                node.parent = Parent::Terminal;
                node.tree = if node.tcap > 0.0 {
                    Tree::Source
                } else {
                    Tree::Sink
                };
                node.dist = 1;
                node.active = true;
                active.push_back(i);
            }
        }

        loop {
            let Some(bridge) = self.grow(&mut active) else {
                break;
            };
            self.augment(bridge, &mut orphans)?;
            time += 1;
            self.adopt(&mut orphans, &mut active, time);
        }

        if self.flow.is_finite() {
            Ok(self.flow)
        } else {
            Err(GraphError::NonFiniteFlow)
        }
    }

    /// Grow both search trees until they touch; returns the edge from the
    /// source tree into the sink tree.
    fn grow(&mut self, active: &mut VecDeque<usize>) -> Option<usize> {
        while let Some(&v) = active.front() {
            if self.nodes[v].parent != Parent::Free {
                let tree = self.nodes[v].tree;
                let mut next = self.nodes[v].first;
                while let Some(e) = next {
                    next = self.edges[e].next;
                    if self.edges[outward(tree, e)].cap == 0.0 {
                        continue;
                    }
                    let u = self.edges[e].dst;
                    let (v_ts, v_dist) = (self.nodes[v].ts, self.nodes[v].dist);
                    let un = &mut self.nodes[u];
                    if un.parent == Parent::Free {
                        un.tree = tree;
                        un.parent = Parent::Edge(e ^ 1);
                        un.ts = v_ts;
                        un.dist = v_dist + 1;
                        if !un.active {
                            un.active = true;
                            active.push_back(u);
                        }
                    } else if un.tree != tree {
                        return Some(outward(tree, e));
                    } else if un.dist > v_dist + 1 && un.ts <= v_ts {
                        un.parent = Parent::Edge(e ^ 1);
                        un.ts = v_ts;
                        un.dist = v_dist + 1;
                    }
                }
            }
            active.pop_front();
            self.nodes[v].active = false;
        }
        None
    }

    /// Push the bottleneck flow through the path containing `bridge`,
    /// collecting nodes whose parent link saturated.
    fn augment(&mut self, bridge: usize, orphans: &mut Vec<usize>) -> Result<(), GraphError> {
        let sides = [
            (Tree::Source, self.edges[bridge ^ 1].dst),
            (Tree::Sink, self.edges[bridge].dst),
        ];

        let mut bottleneck = self.edges[bridge].cap;
        for (tree, start) in sides {
            let mut v = start;
            loop {
                match self.nodes[v].parent {
                    Parent::Edge(e) => {
                        bottleneck = bottleneck.min(self.edges[along_path(tree, e)].cap);
                        v = self.edges[e].dst;
                    }
                    Parent::Terminal => break,
                    Parent::Free | Parent::Orphan => return Err(GraphError::BrokenTree(v)),
                }
            }
            bottleneck = bottleneck.min(self.nodes[v].tcap.abs());
        }
        if bottleneck <= 0.0 {
            return Err(GraphError::ZeroBottleneck);
        }

        self.edges[bridge].cap -= bottleneck;
        self.edges[bridge ^ 1].cap += bottleneck;
        self.flow += bottleneck;

        for (tree, start) in sides {
            let mut v = start;
            while let Parent::Edge(e) = self.nodes[v].parent {
                let forward = along_path(tree, e);
                self.edges[forward ^ 1].cap += bottleneck;
                self.edges[forward].cap -= bottleneck;
                let parent = self.edges[e].dst;
                if self.edges[forward].cap == 0.0 {
                    self.nodes[v].parent = Parent::Orphan;
                    orphans.push(v);
                }
                v = parent;
            }
            let root = &mut self.nodes[v];
            root.tcap += match tree {
                Tree::Source => -bottleneck,
                Tree::Sink => bottleneck,
            };
            if root.tcap == 0.0 {
                root.parent = Parent::Orphan;
                orphans.push(v);
            }
        }
        Ok(())
    }

    /// Find new parents for orphaned nodes, or release them from their tree.
    fn adopt(&mut self, orphans: &mut Vec<usize>, active: &mut VecDeque<usize>, time: usize) {
        while let Some(v) = orphans.pop() {
            let tree = self.nodes[v].tree;
            let mut best: Option<(usize, usize)> = None;

            let mut next = self.nodes[v].first;
            while let Some(e) = next {
                next = self.edges[e].next;
                if self.edges[outward(tree, e) ^ 1].cap == 0.0 {
                    continue;
                }
                let u = self.edges[e].dst;
                if self.nodes[u].tree != tree || self.nodes[u].parent == Parent::Free {
                    continue;
                }
                let Some(depth) = self.root_distance(u, time) else {
                    continue;
                };
                let d = depth + 1;
                if best.is_none_or(|(_, min)| d < min) {
                    best = Some((e, d));
                }

                // cache distances along the walked path
                let mut w = u;
                let mut dist = d;
                while self.nodes[w].ts != time {
                    dist -= 1;
                    self.nodes[w].ts = time;
                    self.nodes[w].dist = dist;
                    match self.nodes[w].parent {
                        Parent::Edge(ej) => w = self.edges[ej].dst,
                        _ => break,
                    }
                }
            }

            if let Some((e, dist)) = best {
                let node = &mut self.nodes[v];
                node.parent = Parent::Edge(e);
                node.ts = time;
                node.dist = dist;
                continue;
            }

            self.nodes[v].ts = 0;
            self.nodes[v].parent = Parent::Free;
            let mut next = self.nodes[v].first;
            while let Some(e) = next {
                next = self.edges[e].next;
                let u = self.edges[e].dst;
                let u_parent = self.nodes[u].parent;
                if self.nodes[u].tree != tree || u_parent == Parent::Free {
                    continue;
                }
                if self.edges[outward(tree, e) ^ 1].cap != 0.0 && !self.nodes[u].active {
                    self.nodes[u].active = true;
                    active.push_back(u);
                }
                if let Parent::Edge(ej) = u_parent {
                    if self.edges[ej].dst == v {
                        self.nodes[u].parent = Parent::Orphan;
                        orphans.push(u);
                    }
                }
            }
        }
    }

    /// Distance from `u` to its terminal, or `None` if the path hits an orphan.
    fn root_distance(&mut self, u: usize, time: usize) -> Option<usize> {
        let mut d = 0;
        let mut w = u;
        loop {
            if self.nodes[w].ts == time {
                return Some(d + self.nodes[w].dist);
            }
            d += 1;
            match self.nodes[w].parent {
                Parent::Edge(e) => w = self.edges[e].dst,
                Parent::Terminal => {
                    self.nodes[w].ts = time;
                    self.nodes[w].dist = 1;
                    return Some(d);
                }
                Parent::Free | Parent::Orphan => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_nodes(n: usize) -> Graph {
        let mut g = Graph::with_capacity(n, n * 2);
        for _ in 0..n {
            g.add_node();
        }
        g
    }

    #[test]
    fn single_chain_is_limited_by_bottleneck() {
        let mut g = graph_with_nodes(2);
        g.add_terminal_weights(0, 3.0, 0.0).unwrap();
        g.add_edge(0, 1, 2.0, 0.0).unwrap();
        g.add_terminal_weights(1, 0.0, 4.0).unwrap();

        let flow = g.max_flow().unwrap();
        assert!((flow - 2.0).abs() < 1e-12);
        assert!(g.in_source_segment(0));
        assert!(!g.in_source_segment(1));
    }

    #[test]
    fn textbook_network() {
        // s->v1 16, s->v2 13, v1->v3 12, v2->v1 4, v2->v4 14,
        // v3->v2 9, v3->t 20, v4->v3 7, v4->t 4; max flow 23
        let mut g = graph_with_nodes(4);
        g.add_terminal_weights(0, 16.0, 0.0).unwrap();
        g.add_terminal_weights(1, 13.0, 0.0).unwrap();
        g.add_terminal_weights(2, 0.0, 20.0).unwrap();
        g.add_terminal_weights(3, 0.0, 4.0).unwrap();
        g.add_edge(0, 2, 12.0, 0.0).unwrap();
        g.add_edge(1, 0, 4.0, 0.0).unwrap();
        g.add_edge(1, 3, 14.0, 0.0).unwrap();
        g.add_edge(2, 1, 9.0, 0.0).unwrap();
        g.add_edge(3, 2, 7.0, 0.0).unwrap();

        let flow = g.max_flow().unwrap();
        assert!((flow - 23.0).abs() < 1e-9);
        assert!(g.in_source_segment(0));
        assert!(g.in_source_segment(1));
        assert!(!g.in_source_segment(2));
        assert!(g.in_source_segment(3));
    }

    #[test]
    fn shared_terminal_weight_counts_as_flow() {
        let mut g = graph_with_nodes(1);
        g.add_terminal_weights(0, 5.0, 3.0).unwrap();
        let flow = g.max_flow().unwrap();
        assert!((flow - 3.0).abs() < 1e-12);
        assert!(g.in_source_segment(0));
    }

    #[test]
    fn negative_data_terms_are_shifted() {
        let mut g = graph_with_nodes(1);
        g.add_terminal_weights(0, -2.0, 1.0).unwrap();
        g.max_flow().unwrap();
        assert!(!g.in_source_segment(0));
    }

    #[test]
    fn strong_smoothness_pulls_weak_node_along() {
        let mut g = graph_with_nodes(3);
        g.add_terminal_weights(0, 10.0, 0.0).unwrap();
        g.add_terminal_weights(1, 0.0, 1.0).unwrap();
        g.add_terminal_weights(2, 0.0, 10.0).unwrap();
        g.add_edge(0, 1, 5.0, 5.0).unwrap();
        g.add_edge(1, 2, 0.5, 0.5).unwrap();

        let flow = g.max_flow().unwrap();
        assert!((flow - 1.5).abs() < 1e-12);
        assert!(g.in_source_segment(0));
        assert!(g.in_source_segment(1));
        assert!(!g.in_source_segment(2));
    }

    #[test]
    fn grid_with_hard_constraints() {
        // 4x4 grid, left column pinned to source, right column to sink,
        // uniform smoothness: the cut is a vertical line of 4 edges.
        let (w, h) = (4, 4);
        let mut g = graph_with_nodes(w * h);
        for y in 0..h {
            g.add_terminal_weights(y * w, 1000.0, 0.0).unwrap();
            g.add_terminal_weights(y * w + w - 1, 0.0, 1000.0).unwrap();
            for x in 0..w {
                let i = y * w + x;
                if x + 1 < w {
                    g.add_edge(i, i + 1, 1.0, 1.0).unwrap();
                }
                if y + 1 < h {
                    g.add_edge(i, i + w, 1.0, 1.0).unwrap();
                }
            }
        }

        let flow = g.max_flow().unwrap();
        assert!((flow - 4.0).abs() < 1e-9);
        for y in 0..h {
            assert!(g.in_source_segment(y * w));
            assert!(!g.in_source_segment(y * w + w - 1));
        }
    }

    #[test]
    fn rejects_bad_capacities() {
        let mut g = graph_with_nodes(2);
        assert!(matches!(
            g.add_edge(0, 1, f64::NAN, 0.0),
            Err(GraphError::NonFiniteCapacity { .. })
        ));
        assert!(matches!(
            g.add_edge(0, 1, 1.0, -1.0),
            Err(GraphError::NegativeCapacity { .. })
        ));
        assert!(matches!(
            g.add_terminal_weights(0, f64::INFINITY, 0.0),
            Err(GraphError::NonFiniteCapacity { .. })
        ));
    }

    #[test]
    fn isolated_free_node_is_background() {
        let mut g = graph_with_nodes(1);
        assert!(g.max_flow().unwrap().abs() < f64::EPSILON);
        assert!(!g.in_source_segment(0));
    }
}
