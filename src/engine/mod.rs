//! The per-frame scheduler: task nodes, the graphs they form, and the
//! controller that executes a validated graph.

mod graph;
mod node;
mod runner;

pub use crate::engine::graph::TaskGraph;
pub use crate::engine::node::{NodeId, TaskFn, TaskNode};
pub use crate::engine::runner::{
    Diagnostics, ExecutionMode, NodeTiming, TaskExecution, TaskGraphController, TimingTable,
};

/// Anything that builds its own sub-graph and can wire it between two
/// anchors supplied by the caller.
pub trait GraphEdges {
    /// The graph this component adds its nodes to.
    fn task_graph(&self) -> &TaskGraph;

    /// Connect this component's internal nodes so that they run after
    /// `source` and before `sink`, both of which must be nodes of
    /// [`task_graph`](GraphEdges::task_graph).
    fn init_graph_edges(&mut self, source: NodeId, sink: NodeId) -> Result<(), crate::GraphError>;

    /// Wire the component between its own graph's anchors.
    fn init_default_graph_edges(&mut self) -> Result<(), crate::GraphError> {
        let source = self.task_graph().source();
        let sink = self.task_graph().sink();
        self.init_graph_edges(source, sink)
    }
}
