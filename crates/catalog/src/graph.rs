//! Directed graph over integer vertices with labelled edges
//!
//! Vertices are dense indices handed out by [`SimpleGraph::add_vertex`].
//! Each vertex carries a priority used to break ties during topological
//! sorting, so that independent vertices come out in declaration order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

/// Index of an edge in the graph
pub type EdgeId = usize;

/// Edge flags carried through to the transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeLabel {
    /// The target is refreshed when the source changes
    pub notification: bool,
    /// The target must not run when the source fails. Set by any ordering
    /// declaration, so it survives a merge with a notification edge.
    pub dependency: bool,
    /// Declared with a left-pointing arrow
    pub right2left: bool,
    /// Implied by containment rather than declared
    pub containment: bool,
}

impl EdgeLabel {
    pub fn ordering() -> Self {
        Self {
            dependency: true,
            ..Self::default()
        }
    }

    pub fn notification() -> Self {
        Self {
            notification: true,
            ..Self::default()
        }
    }

    pub fn containment() -> Self {
        Self {
            containment: true,
            dependency: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub label: EdgeLabel,
}

#[derive(Debug, Clone, Default)]
pub struct SimpleGraph {
    priorities: Vec<usize>,
    out_from: Vec<Vec<EdgeId>>,
    in_to: Vec<Vec<EdgeId>>,
    edges: Vec<GraphEdge>,
}

impl SimpleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex with the given tie-break priority (lower sorts first)
    pub fn add_vertex(&mut self, priority: usize) -> usize {
        self.priorities.push(priority);
        self.out_from.push(Vec::new());
        self.in_to.push(Vec::new());
        self.priorities.len() - 1
    }

    /// Add an edge; an identical source/target pair merges its flags
    pub fn add_edge(&mut self, source: usize, target: usize, label: EdgeLabel) -> EdgeId {
        if let Some(existing) = self.edge_between(source, target) {
            let edge = &mut self.edges[existing];
            edge.label.notification |= label.notification;
            edge.label.dependency |= label.dependency;
            edge.label.right2left |= label.right2left;
            edge.label.containment &= label.containment;
            return existing;
        }
        let id = self.edges.len();
        self.edges.push(GraphEdge {
            source,
            target,
            label,
        });
        self.out_from[source].push(id);
        self.in_to[target].push(id);
        id
    }

    pub fn edge_between(&self, source: usize, target: usize) -> Option<EdgeId> {
        self.out_from
            .get(source)?
            .iter()
            .copied()
            .find(|&e| self.edges[e].target == target)
    }

    /// Whether an edge exists between the two vertices in either direction
    pub fn adjacent(&self, a: usize, b: usize) -> bool {
        self.edge_between(a, b).is_some() || self.edge_between(b, a).is_some()
    }

    pub fn vertex_count(&self) -> usize {
        self.priorities.len()
    }

    pub fn edge(&self, id: EdgeId) -> &GraphEdge {
        &self.edges[id]
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn out_edges(&self, vertex: usize) -> impl Iterator<Item = &GraphEdge> {
        self.out_from[vertex].iter().map(|&e| &self.edges[e])
    }

    pub fn in_edges(&self, vertex: usize) -> impl Iterator<Item = &GraphEdge> {
        self.in_to[vertex].iter().map(|&e| &self.edges[e])
    }

    /// Every vertex reachable from `start` by following out edges
    pub fn downstream_from(&self, start: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(v) = queue.pop_front() {
            for edge in self.out_edges(v) {
                if seen.insert(edge.target) {
                    out.push(edge.target);
                    queue.push_back(edge.target);
                }
            }
        }
        out
    }

    /// Kahn's algorithm, breaking ties by priority
    ///
    /// On failure returns the cycles found among the vertices that could not
    /// be ordered, one shortest cycle per strongly connected component.
    pub fn topsort(&self) -> std::result::Result<Vec<usize>, Vec<Vec<usize>>> {
        let n = self.vertex_count();
        let mut in_degree: Vec<usize> = (0..n).map(|v| self.in_to[v].len()).collect();
        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..n)
            .filter(|&v| in_degree[v] == 0)
            .map(|v| Reverse((self.priorities[v], v)))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse((_, v))) = ready.pop() {
            order.push(v);
            for edge in self.out_edges(v) {
                in_degree[edge.target] -= 1;
                if in_degree[edge.target] == 0 {
                    ready.push(Reverse((self.priorities[edge.target], edge.target)));
                }
            }
        }

        if order.len() == n {
            Ok(order)
        } else {
            Err(self.find_cycles())
        }
    }

    /// Strongly connected components with more than one vertex (or a self loop)
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        Tarjan::new(self).run()
    }

    /// One shortest cycle per cyclic component, starting at its lowest-priority vertex
    pub fn find_cycles(&self) -> Vec<Vec<usize>> {
        let mut cycles: Vec<Vec<usize>> = self
            .strongly_connected_components()
            .into_iter()
            .filter_map(|component| self.shortest_cycle(&component))
            .collect();
        cycles.sort_by_key(|cycle| cycle.first().map(|&v| self.priorities[v]));
        cycles
    }

    fn shortest_cycle(&self, component: &[usize]) -> Option<Vec<usize>> {
        let members: HashSet<usize> = component.iter().copied().collect();
        let start = *component.iter().min_by_key(|&&v| (self.priorities[v], v))?;

        // BFS from start back to start, restricted to the component
        let mut previous: Vec<Option<usize>> = vec![None; self.vertex_count()];
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        while let Some(v) = queue.pop_front() {
            let mut targets: Vec<usize> = self
                .out_edges(v)
                .map(|e| e.target)
                .filter(|t| members.contains(t))
                .collect();
            targets.sort_by_key(|&t| (self.priorities[t], t));
            for t in targets {
                if t == start {
                    let mut path = vec![v];
                    let mut cursor = v;
                    while let Some(p) = previous[cursor] {
                        path.push(p);
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                if visited.insert(t) {
                    previous[t] = Some(v);
                    queue.push_back(t);
                }
            }
        }
        None
    }
}

/// Iterative Tarjan's algorithm; recursion depth would otherwise scale with
/// the longest dependency chain
struct Tarjan<'a> {
    graph: &'a SimpleGraph,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(graph: &'a SimpleGraph) -> Self {
        let n = graph.vertex_count();
        Self {
            graph,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<usize>> {
        for v in 0..self.graph.vertex_count() {
            if self.index[v].is_none() {
                self.visit(v);
            }
        }
        self.components
    }

    fn visit(&mut self, root: usize) {
        // (vertex, position in its successor list)
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        self.open(root);

        while let Some(frame) = frames.last_mut() {
            let (v, position) = *frame;
            let graph = self.graph;
            if position < graph.out_from[v].len() {
                let w = graph.edges[graph.out_from[v][position]].target;
                frame.1 += 1;
                match self.index[w] {
                    None => {
                        self.open(w);
                        frames.push((w, 0));
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
            }
            if Some(self.lowlink[v]) == self.index[v] {
                self.close(v);
            }
        }
    }

    fn open(&mut self, v: usize) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;
    }

    fn close(&mut self, v: usize) {
        let mut component = Vec::new();
        while let Some(w) = self.stack.pop() {
            self.on_stack[w] = false;
            component.push(w);
            if w == v {
                break;
            }
        }
        let self_loop = component.len() == 1 && self.graph.edge_between(v, v).is_some();
        if component.len() > 1 || self_loop {
            component.reverse();
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> SimpleGraph {
        let mut g = SimpleGraph::new();
        for i in 0..n {
            g.add_vertex(i);
        }
        g
    }

    #[test]
    fn test_topsort_respects_edges() {
        let mut g = chain(3);
        g.add_edge(2, 0, EdgeLabel::ordering());
        g.add_edge(0, 1, EdgeLabel::ordering());
        assert_eq!(g.topsort().unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_topsort_tie_break_is_declaration_order() {
        let g = chain(4);
        assert_eq!(g.topsort().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_topsort_ties_after_dependencies_resolve() {
        let mut g = chain(4);
        // 3 must precede 0; 1 and 2 are free
        g.add_edge(3, 0, EdgeLabel::ordering());
        assert_eq!(g.topsort().unwrap(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_cycle_reports_members() {
        let mut g = chain(4);
        g.add_edge(0, 1, EdgeLabel::ordering());
        g.add_edge(1, 2, EdgeLabel::ordering());
        g.add_edge(2, 0, EdgeLabel::ordering());
        g.add_edge(2, 3, EdgeLabel::ordering());
        let cycles = g.topsort().unwrap_err();
        assert_eq!(cycles, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_shortest_cycle_within_component() {
        let mut g = chain(4);
        // 0 -> 1 -> 2 -> 3 -> 0 and a shortcut 1 -> 0
        g.add_edge(0, 1, EdgeLabel::ordering());
        g.add_edge(1, 2, EdgeLabel::ordering());
        g.add_edge(2, 3, EdgeLabel::ordering());
        g.add_edge(3, 0, EdgeLabel::ordering());
        g.add_edge(1, 0, EdgeLabel::ordering());
        let cycles = g.find_cycles();
        assert_eq!(cycles, vec![vec![0, 1]]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut g = chain(1);
        g.add_edge(0, 0, EdgeLabel::ordering());
        assert_eq!(g.topsort().unwrap_err(), vec![vec![0]]);
    }

    #[test]
    fn test_duplicate_edges_merge_flags() {
        let mut g = chain(2);
        let a = g.add_edge(0, 1, EdgeLabel::ordering());
        let b = g.add_edge(0, 1, EdgeLabel::notification());
        assert_eq!(a, b);
        assert!(g.edge(a).label.notification);
        assert!(g.edge(a).label.dependency);
        assert_eq!(g.edges().len(), 1);

        // merge order does not matter
        let mut g = chain(2);
        let a = g.add_edge(0, 1, EdgeLabel::notification());
        assert!(!g.edge(a).label.dependency);
        g.add_edge(0, 1, EdgeLabel::ordering());
        assert!(g.edge(a).label.dependency);
    }

    #[test]
    fn test_downstream_from() {
        let mut g = chain(4);
        g.add_edge(0, 1, EdgeLabel::ordering());
        g.add_edge(1, 2, EdgeLabel::ordering());
        assert_eq!(g.downstream_from(0), vec![1, 2]);
        assert!(g.downstream_from(3).is_empty());
    }
}
