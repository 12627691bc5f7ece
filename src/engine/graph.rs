//! The task graph primitive.
//!
//! A [`TaskGraph`] is a DAG of [`TaskNode`]s. Every graph owns two anchor
//! nodes, `source` and `sink`, and every other node is expected to sit on a
//! path between them. Models and interactions each build their own graph;
//! the composition layer splices those graphs into one master graph with
//! [`TaskGraph::nest_graph`], without knowing anything about their insides.
//!
//! ## Ordering
//!
//! Nodes are stored in insertion order. [`TaskGraph::topological_order`] is
//! a Kahn sort that always picks the earliest-inserted ready node, so the
//! same construction sequence always yields the same order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Write;

use petgraph::Direction;
use petgraph::algo::{DfsSpace, has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use crate::engine::{NodeId, TaskNode};
use crate::error::GraphError;

#[derive(Clone)]
pub struct TaskGraph {
    name: String,
    pub(crate) graph: DiGraph<TaskNode, ()>,
    index: HashMap<NodeId, NodeIndex>,
    source: NodeId,
    sink: NodeId,
}

impl TaskGraph {
    /// Create a graph holding only its `{name}_Source` and `{name}_Sink`
    /// anchors.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let source = TaskNode::anchor(format!("{name}_Source"));
        let sink = TaskNode::anchor(format!("{name}_Sink"));

        let mut graph = Self {
            name,
            graph: DiGraph::new(),
            index: HashMap::new(),
            source: source.id(),
            sink: sink.id(),
        };

        graph.add_node(source);
        graph.add_node(sink);
        graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn sink(&self) -> NodeId {
        self.sink
    }

    /// Insert a node. Adding a node that is already present is a no-op.
    pub fn add_node(&mut self, node: TaskNode) -> NodeId {
        let id = node.id();
        if !self.index.contains_key(&id) {
            let index = self.graph.add_node(node);
            self.index.insert(id, index);
        }
        id
    }

    /// Shorthand for `add_node(TaskNode::new(name, body))`.
    pub fn add_function<F>(&mut self, name: impl Into<std::borrow::Cow<'static, str>>, body: F) -> NodeId
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_node(TaskNode::new(name, body))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&TaskNode> {
        self.index.get(&id).map(|&index| &self.graph[index])
    }

    /// The first node, in insertion order, carrying `name`.
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes().find(|node| node.name() == name).map(TaskNode::id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Require `from` to complete before `to` starts.
    ///
    /// Fails if either endpoint is not in this graph. Cycles are not checked
    /// here; they are reported by [`Self::topological_order`] and
    /// [`Self::validate`].
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let a = self.lookup(from)?;
        let b = self.lookup(to)?;
        self.graph.update_edge(a, b, ());
        Ok(())
    }

    pub fn add_edges(&mut self, edges: &[(NodeId, NodeId)]) -> Result<(), GraphError> {
        for &(from, to) in edges {
            self.add_edge(from, to)?;
        }
        Ok(())
    }

    /// Remove the edge `from → to`, returning whether it existed.
    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(&from), self.index.get(&to)) else {
            return false;
        };

        match self.graph.find_edge(a, b) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                true
            }
            None => false,
        }
    }

    pub fn contains_edge(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&a), Some(&b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    /// Every edge as `(from, to)` pairs.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (self.graph[edge.source()].id(), self.graph[edge.target()].id()))
            .collect()
    }

    /// Whether `to` can only run after `from`. False for unknown nodes.
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&a), Some(&b)) => a != b && has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Drop all edges, keeping the nodes. Used when a model rewires itself.
    pub fn clear_edges(&mut self) {
        self.graph.clear_edges();
    }

    pub fn set_enabled(&self, id: NodeId, enabled: bool) -> Result<(), GraphError> {
        let index = self.lookup(id)?;
        self.graph[index].set_enabled(enabled);
        Ok(())
    }

    /// Splice `sub` into this graph between `a` and `b`.
    ///
    /// Any direct edge `a → b` is removed and replaced by `a → sub.source`
    /// and `sub.sink → b`; all of `sub`'s nodes and edges are copied in.
    /// Nesting a graph whose nodes are already present (for instance the
    /// same graph twice) is rejected before anything is modified.
    pub fn nest_graph(&mut self, sub: &TaskGraph, a: NodeId, b: NodeId) -> Result<(), GraphError> {
        self.lookup(a)?;
        self.lookup(b)?;

        if let Some(node) = sub.nodes().find(|node| self.contains(node.id())) {
            return Err(GraphError::DuplicateNode(
                node.name().to_string(),
                self.name.clone(),
            ));
        }

        self.remove_edge(a, b);

        for node in sub.nodes() {
            self.add_node(node.clone());
        }

        for (from, to) in sub.edges() {
            self.add_edge(from, to)?;
        }

        self.add_edge(a, sub.source())?;
        self.add_edge(sub.sink(), b)?;

        tracing::debug!(
            graph = %self.name,
            nested = %sub.name,
            nodes = sub.node_count(),
            "nested task graph"
        );

        Ok(())
    }

    /// A topological order of all node ids, ties broken by insertion order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        Ok(self
            .sorted_indices()?
            .into_iter()
            .map(|index| self.graph[index].id())
            .collect())
    }

    pub(crate) fn sorted_indices(&self) -> Result<Vec<NodeIndex>, GraphError> {
        let count = self.graph.node_count();
        let mut indegree = vec![0usize; count];

        for edge in self.graph.raw_edges() {
            indegree[edge.target().index()] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(count);

        while let Some(Reverse(index)) = ready.pop() {
            let index = NodeIndex::new(index);
            order.push(index);

            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                indegree[next.index()] -= 1;
                if indegree[next.index()] == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        if order.len() == count {
            return Ok(order);
        }

        // Any node left with a positive in-degree is on or behind a cycle;
        // petgraph can point at one that is actually on it.
        let culprit = match toposort(&self.graph, None) {
            Err(cycle) => cycle.node_id(),
            Ok(_) => indegree
                .iter()
                .position(|&degree| degree > 0)
                .map(NodeIndex::new)
                .unwrap_or_default(),
        };

        Err(GraphError::Cycle {
            graph: self.name.clone(),
            node: self.graph[culprit].name().to_string(),
        })
    }

    /// Check the graph can be executed: it must be acyclic and every node
    /// other than the anchors must be reachable from `source` and must be
    /// able to reach `sink`.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.sorted_indices()?;

        let source = self.lookup(self.source)?;
        let sink = self.lookup(self.sink)?;

        let mut from_source = vec![false; self.graph.node_count()];
        let mut dfs = Dfs::new(&self.graph, source);
        while let Some(index) = dfs.next(&self.graph) {
            from_source[index.index()] = true;
        }

        let mut to_sink = vec![false; self.graph.node_count()];
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, sink);
        while let Some(index) = dfs.next(reversed) {
            to_sink[index.index()] = true;
        }

        for index in self.graph.node_indices() {
            if index == source || index == sink {
                continue;
            }

            if !from_source[index.index()] || !to_sink[index.index()] {
                return Err(GraphError::DanglingNode {
                    graph: self.name.clone(),
                    node: self.graph[index].name().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Remove every edge `u → v` for which another path from `u` to `v`
    /// exists. Reachability, and therefore execution order, is unchanged.
    /// Returns the number of removed edges.
    pub fn transitive_reduction(&mut self) -> Result<usize, GraphError> {
        self.sorted_indices()?;

        let mut space = DfsSpace::new(&self.graph);
        let mut redundant = Vec::new();

        for edge in self.graph.raw_edges() {
            let (from, to) = (edge.source(), edge.target());
            let implied = self
                .graph
                .neighbors_directed(from, Direction::Outgoing)
                .filter(|&next| next != to)
                .any(|next| has_path_connecting(&self.graph, next, to, Some(&mut space)));

            if implied {
                redundant.push((from, to));
            }
        }

        for &(from, to) in &redundant {
            if let Some(edge) = self.graph.find_edge(from, to) {
                self.graph.remove_edge(edge);
            }
        }

        Ok(redundant.len())
    }

    /// One line per node in execution order; disabled nodes are marked.
    pub fn summary(&self) -> Result<String, GraphError> {
        let mut output = String::new();
        let _ = writeln!(output, "{} ({} nodes, {} edges)", self.name, self.node_count(), self.edge_count());

        for (position, index) in self.sorted_indices()?.into_iter().enumerate() {
            let node = &self.graph[index];
            let state = if node.is_enabled() { "" } else { " [disabled]" };
            let _ = writeln!(output, "  {position:>3}: {}{state}", node.name());
        }

        Ok(output)
    }

    fn lookup(&self, id: NodeId) -> Result<NodeIndex, GraphError> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| GraphError::MissingNode(id.get(), self.name.clone()))
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&index) = self.index.get(&id) else {
            return Vec::new();
        };

        let mut ids: Vec<NodeId> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|next| self.graph[next].id())
            .collect();
        ids.sort_by_key(|id| self.index[id]);
        ids
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("name", &self.name)
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&x| x == id).unwrap()
    }

    fn chain(graph: &mut TaskGraph, names: &[&'static str]) -> Vec<NodeId> {
        let ids: Vec<NodeId> = names
            .iter()
            .map(|&name| graph.add_function(name, || Ok(())))
            .collect();

        let mut previous = graph.source();
        for &id in &ids {
            graph.add_edge(previous, id).unwrap();
            previous = id;
        }
        graph.add_edge(previous, graph.sink()).unwrap();
        ids
    }

    #[test]
    fn test_order_respects_every_edge() {
        let mut graph = TaskGraph::new("G");
        let a = graph.add_function("A", || Ok(()));
        let b = graph.add_function("B", || Ok(()));
        let c = graph.add_function("C", || Ok(()));
        let d = graph.add_function("D", || Ok(()));

        graph
            .add_edges(&[
                (graph.source(), a),
                (a, c),
                (b, d),
                (graph.source(), b),
                (c, d),
                (d, graph.sink()),
            ])
            .unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), graph.node_count());
        for (from, to) in graph.edges() {
            assert!(position(&order, from) < position(&order, to));
        }
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let mut graph = TaskGraph::new("G");
        let first = graph.add_function("First", || Ok(()));
        let second = graph.add_function("Second", || Ok(()));
        let third = graph.add_function("Third", || Ok(()));

        // Edges added in reverse so the result cannot come from edge order.
        for &id in [third, second, first].iter() {
            graph.add_edge(graph.source(), id).unwrap();
            graph.add_edge(id, graph.sink()).unwrap();
        }

        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec![graph.source(), first, second, third, graph.sink()]);
        assert_eq!(order, graph.topological_order().unwrap());
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let mut graph = TaskGraph::new("G");
        let stranger = TaskNode::new("Stranger", || Ok(()));

        let err = graph.add_edge(graph.source(), stranger.id()).unwrap_err();
        assert!(matches!(err, GraphError::MissingNode(id, _) if id == stranger.id().get()));
    }

    #[test]
    fn test_cycle_is_reported_not_partially_sorted() {
        let mut graph = TaskGraph::new("G");
        let ids = chain(&mut graph, &["A", "B", "C"]);
        graph.add_edge(ids[2], ids[0]).unwrap();

        let err = graph.topological_order().unwrap_err();
        match err {
            GraphError::Cycle { node, .. } => assert!(["A", "B", "C"].contains(&node.as_str())),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_dangling_node_fails_validation() {
        let mut graph = TaskGraph::new("G");
        chain(&mut graph, &["A"]);
        let orphan = graph.add_function("Orphan", || Ok(()));
        graph.add_edge(graph.source(), orphan).unwrap();

        let err = graph.validate().unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingNode {
                graph: "G".into(),
                node: "Orphan".into()
            }
        );

        graph.add_edge(orphan, graph.sink()).unwrap();
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_empty_graph_is_valid() {
        let graph = TaskGraph::new("Empty");
        assert!(graph.validate().is_ok());
        assert_eq!(graph.topological_order().unwrap().len(), 2);
    }

    #[test]
    fn test_nest_graph_splices_between_anchors() {
        let mut parent = TaskGraph::new("Parent");
        let a = parent.add_function("A", || Ok(()));
        let b = parent.add_function("B", || Ok(()));
        parent
            .add_edges(&[(parent.source(), a), (a, b), (b, parent.sink())])
            .unwrap();

        let mut sub = TaskGraph::new("Sub");
        let ids = chain(&mut sub, &["X", "Y"]);

        parent.nest_graph(&sub, a, b).unwrap();

        assert!(!parent.contains_edge(a, b));
        assert!(parent.contains_edge(a, sub.source()));
        assert!(parent.contains_edge(sub.sink(), b));
        for (from, to) in sub.edges() {
            assert!(parent.contains_edge(from, to));
        }
        assert!(parent.contains(ids[0]) && parent.contains(ids[1]));
        assert!(parent.validate().is_ok());

        let order = parent.topological_order().unwrap();
        assert!(position(&order, a) < position(&order, ids[0]));
        assert!(position(&order, ids[1]) < position(&order, b));
    }

    #[test]
    fn test_nesting_twice_is_rejected() {
        let mut parent = TaskGraph::new("Parent");
        let sub = TaskGraph::new("Sub");
        let (source, sink) = (parent.source(), parent.sink());

        parent.nest_graph(&sub, source, sink).unwrap();
        let edges = parent.edge_count();

        let err = parent.nest_graph(&sub, source, sink).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(..)));
        assert_eq!(parent.edge_count(), edges);
    }

    #[test]
    fn test_disabled_node_keeps_its_place() {
        let mut graph = TaskGraph::new("G");
        let ids = chain(&mut graph, &["A", "B", "C"]);
        let before = graph.topological_order().unwrap();

        graph.set_enabled(ids[1], false).unwrap();
        let after = graph.topological_order().unwrap();

        assert_eq!(before, after);
        assert!(position(&after, ids[0]) < position(&after, ids[2]));
        assert!(graph.summary().unwrap().contains("B [disabled]"));
    }

    #[test]
    fn test_transitive_reduction_keeps_order() {
        let mut graph = TaskGraph::new("G");
        let ids = chain(&mut graph, &["A", "B", "C"]);
        graph.add_edge(ids[0], ids[2]).unwrap();
        graph.add_edge(graph.source(), ids[2]).unwrap();

        let removed = graph.transitive_reduction().unwrap();
        assert_eq!(removed, 2);
        assert!(!graph.contains_edge(ids[0], ids[2]));
        assert!(graph.contains_edge(ids[0], ids[1]));
        assert!(graph.validate().is_ok());
        assert!(graph.has_path(ids[0], ids[2]));
        assert!(!graph.has_path(ids[2], ids[0]));
        assert!(!graph.has_path(ids[0], ids[0]));
    }

    #[test]
    fn test_neighbors_in_insertion_order() {
        let mut graph = TaskGraph::new("G");
        let ids = chain(&mut graph, &["A"]);
        let b = graph.add_function("B", || Ok(()));
        graph.add_edge(graph.source(), b).unwrap();

        assert_eq!(graph.successors(graph.source()), vec![ids[0], b]);
        assert_eq!(graph.predecessors(ids[0]), vec![graph.source()]);
        assert_eq!(graph.node_by_name("B"), Some(b));
    }
}
