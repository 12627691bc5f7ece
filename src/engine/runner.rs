mod diagnostics;

use std::collections::HashMap;
use std::sync::mpsc::{TryRecvError, channel};
use std::time::Instant;

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::engine::{NodeId, TaskGraph, TaskNode};
use crate::error::{ExecError, GraphError};

pub use diagnostics::{Diagnostics, NodeTiming, TaskExecution, TimingTable};

/// How a [`TaskGraphController`] walks the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One node at a time, in the stable topological order.
    Sequential,
    /// Nodes are started as soon as all their predecessors have finished,
    /// so nodes with no path between them may overlap.
    #[default]
    Parallel,
}

/// A validated task graph, ready to be executed once per frame.
///
/// Validation and sorting happen once, in [`TaskGraphController::new`]; a
/// graph that is cyclic or has dangling nodes never gets this far.
pub struct TaskGraphController {
    graph: TaskGraph,
    order: Vec<NodeIndex>,
    dependents: Vec<Vec<NodeIndex>>,
    dependency_counts: Vec<usize>,
    mode: ExecutionMode,
    pool: Option<rayon::ThreadPool>,
}

impl TaskGraphController {
    pub fn new(graph: TaskGraph, mode: ExecutionMode) -> Result<Self, GraphError> {
        graph.validate()?;
        let order = graph.sorted_indices()?;

        let count = graph.graph.node_count();
        let mut dependents = vec![Vec::new(); count];
        let mut dependency_counts = vec![0; count];

        for index in graph.graph.node_indices() {
            for next in graph.graph.neighbors_directed(index, Direction::Outgoing) {
                dependents[index.index()].push(next);
                dependency_counts[next.index()] += 1;
            }
        }

        tracing::info!(
            graph = graph.name(),
            nodes = count,
            edges = graph.edge_count(),
            ?mode,
            "task graph ready"
        );

        Ok(Self {
            graph,
            order,
            dependents,
            dependency_counts,
            mode,
            pool: None,
        })
    }

    /// Run on a dedicated pool of `threads` workers instead of rayon's
    /// global pool. Data-parallel loops inside the nodes use the same pool.
    pub fn with_threads(mut self, threads: usize) -> Result<Self, ExecError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("mizuchi-worker-{index}"))
            .build()?;
        self.pool = Some(pool);
        Ok(self)
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// The cached execution order.
    pub fn order(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .map(|&index| self.graph.graph[index].id())
            .collect()
    }

    /// Run every enabled node once. The first failing node aborts the frame;
    /// nodes already running are allowed to finish, nothing after them
    /// starts.
    pub fn execute(&self) -> Result<Diagnostics, ExecError> {
        match (self.mode, &self.pool) {
            (ExecutionMode::Sequential, Some(pool)) => pool.install(|| self.run_sequential()),
            (ExecutionMode::Sequential, None) => self.run_sequential(),
            (ExecutionMode::Parallel, Some(pool)) => pool.scope(|s| self.run_parallel(s)),
            (ExecutionMode::Parallel, None) => rayon::scope(|s| self.run_parallel(s)),
        }
    }

    fn run_sequential(&self) -> Result<Diagnostics, ExecError> {
        let mut diagnostics = Diagnostics::default();

        for &index in &self.order {
            let task = &self.graph.graph[index];
            if !task.is_enabled() {
                diagnostics.skipped.push(task.id());
                continue;
            }
            if task.is_anchor() {
                continue;
            }

            let (result, execution) = run_task(task);
            result?;
            if let Some(execution) = execution {
                diagnostics.execution_times.insert(task.id(), execution);
            }
        }

        Ok(diagnostics)
    }

    /// Dependency-count scheduling: a node is spawned onto the pool the
    /// moment its last predecessor reports back. Anchors and disabled nodes
    /// are completed on the spot without being spawned.
    fn run_parallel<'s>(&'s self, s: &rayon::Scope<'s>) -> Result<Diagnostics, ExecError> {
        let total = self.order.len();
        if total == 0 {
            return Ok(Diagnostics::default());
        }

        let mut dependency_counts = self.dependency_counts.clone();
        let mut diagnostics = Diagnostics::default();
        let mut completed = 0;

        let (sender, receiver) =
            channel::<(NodeIndex, Result<(), ExecError>, Option<TaskExecution>)>();

        let spawn_task = |index: NodeIndex| {
            let task = &self.graph.graph[index];
            let sender = sender.clone();

            if task.is_anchor() || !task.is_enabled() {
                let _ = sender.send((index, Ok(()), None));
                return;
            }

            s.spawn(move |_| {
                let (result, execution) = run_task(task);
                let _ = sender.send((index, result, execution));
            });
        };

        for &index in &self.order {
            if dependency_counts[index.index()] == 0 {
                spawn_task(index);
            }
        }

        let mut results: HashMap<NodeIndex, Option<TaskExecution>> = HashMap::new();

        while completed < total {
            // The scheduling thread is itself a pool worker. Waiting with
            // `yield_now` lets it pick up spawned nodes instead of blocking,
            // which matters on a single-threaded pool.
            let (index, result, execution) = loop {
                match receiver.try_recv() {
                    Ok(message) => break message,
                    Err(TryRecvError::Empty) => {
                        if !matches!(rayon::yield_now(), Some(rayon::Yield::Executed)) {
                            std::thread::yield_now();
                        }
                    }
                    Err(TryRecvError::Disconnected) => unreachable!("scheduler holds a sender"),
                }
            };

            result?;
            completed += 1;
            results.insert(index, execution);

            for &next in &self.dependents[index.index()] {
                let count = &mut dependency_counts[next.index()];
                *count -= 1;
                if *count == 0 {
                    spawn_task(next);
                }
            }
        }

        for (index, execution) in results {
            let task = &self.graph.graph[index];
            match execution {
                Some(execution) => {
                    diagnostics.execution_times.insert(task.id(), execution);
                }
                None if !task.is_enabled() => diagnostics.skipped.push(task.id()),
                None => {}
            }
        }

        Ok(diagnostics)
    }
}

/// Run a single node, turning panics into errors the same way body errors
/// are reported.
fn run_task(task: &TaskNode) -> (Result<(), ExecError>, Option<TaskExecution>) {
    let span = tracing::span!(Level::DEBUG, "task", name = task.name());
    let _enter = span.enter();

    let start = Instant::now();

    let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run())) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };

            Err(anyhow::anyhow!(msg))
        }
    };

    let execution = task.is_timed().then(|| TaskExecution {
        start,
        duration: start.elapsed(),
    });

    let result = output.map_err(|source| {
        tracing::error!(task = task.name(), "task failed: {source:#}");
        ExecError::Task {
            name: task.name().to_string(),
            source,
        }
    });

    (result, execution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn logging_node(log: &Log, name: &'static str) -> TaskNode {
        let log = log.clone();
        TaskNode::new(name, move || {
            log.lock().push(name);
            Ok(())
        })
    }

    fn chain(log: &Log, names: &[&'static str]) -> (TaskGraph, Vec<NodeId>) {
        let mut graph = TaskGraph::new("Chain");
        let ids: Vec<NodeId> = names
            .iter()
            .map(|&name| graph.add_node(logging_node(log, name)))
            .collect();

        let mut previous = graph.source();
        for &id in &ids {
            graph.add_edge(previous, id).unwrap();
            previous = id;
        }
        graph.add_edge(previous, graph.sink()).unwrap();
        (graph, ids)
    }

    #[test]
    fn test_sequential_runs_in_order() {
        let log = Log::default();
        let (graph, _) = chain(&log, &["A", "B", "C"]);
        let controller = TaskGraphController::new(graph, ExecutionMode::Sequential).unwrap();

        controller.execute().unwrap();
        assert_eq!(*log.lock(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_parallel_respects_edges() {
        let log = Log::default();
        let mut graph = TaskGraph::new("Diamond");
        let top = graph.add_node(logging_node(&log, "Top"));
        let left = graph.add_node(logging_node(&log, "Left"));
        let right = graph.add_node(logging_node(&log, "Right"));
        let bottom = graph.add_node(logging_node(&log, "Bottom"));
        graph
            .add_edges(&[
                (graph.source(), top),
                (top, left),
                (top, right),
                (left, bottom),
                (right, bottom),
                (bottom, graph.sink()),
            ])
            .unwrap();

        let controller = TaskGraphController::new(graph, ExecutionMode::Parallel).unwrap();
        for _ in 0..20 {
            log.lock().clear();
            controller.execute().unwrap();

            let log = log.lock();
            assert_eq!(log.len(), 4);
            assert_eq!(log[0], "Top");
            assert_eq!(log[3], "Bottom");
        }
    }

    #[test]
    fn test_disabled_node_is_skipped() {
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
            let log = Log::default();
            let (graph, ids) = chain(&log, &["A", "B", "C"]);
            graph.set_enabled(ids[1], false).unwrap();

            let controller = TaskGraphController::new(graph, mode).unwrap();
            let diagnostics = controller.execute().unwrap();

            assert_eq!(*log.lock(), vec!["A", "C"]);
            assert_eq!(diagnostics.skipped, vec![ids[1]]);
        }
    }

    #[test]
    fn test_failure_stops_downstream() {
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
            let log = Log::default();
            let mut graph = TaskGraph::new("Failing");
            let a = graph.add_node(logging_node(&log, "A"));
            let bad = graph.add_function("Bad", || anyhow::bail!("boom"));
            let c = graph.add_node(logging_node(&log, "C"));
            graph
                .add_edges(&[(graph.source(), a), (a, bad), (bad, c), (c, graph.sink())])
                .unwrap();

            let controller = TaskGraphController::new(graph, mode).unwrap();
            let err = controller.execute().unwrap_err();

            assert!(matches!(err, ExecError::Task { ref name, .. } if name == "Bad"));
            assert_eq!(*log.lock(), vec!["A"]);
        }
    }

    #[test]
    fn test_panic_becomes_error() {
        let mut graph = TaskGraph::new("Panicking");
        let bad = graph.add_function("Bad", || panic!("kaboom"));
        graph
            .add_edges(&[(graph.source(), bad), (bad, graph.sink())])
            .unwrap();

        let controller = TaskGraphController::new(graph, ExecutionMode::Parallel).unwrap();
        let err = controller.execute().unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_invalid_graph_is_rejected_up_front() {
        let mut graph = TaskGraph::new("Cyclic");
        let a = graph.add_function("A", || Ok(()));
        let b = graph.add_function("B", || Ok(()));
        graph
            .add_edges(&[(graph.source(), a), (a, b), (b, a), (b, graph.sink())])
            .unwrap();

        let err = TaskGraphController::new(graph, ExecutionMode::Parallel).err();
        assert!(matches!(err, Some(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_single_thread_pool_does_not_stall() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut graph = TaskGraph::new("Wide");
        for i in 0..16 {
            let hits = hits.clone();
            let id = graph.add_function(format!("Work{i}"), move || {
                hits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
            graph.add_edge(graph.source(), id).unwrap();
            graph.add_edge(id, graph.sink()).unwrap();
        }

        let controller = TaskGraphController::new(graph, ExecutionMode::Parallel)
            .unwrap()
            .with_threads(1)
            .unwrap();
        controller.execute().unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn test_timed_nodes_are_reported() {
        let mut graph = TaskGraph::new("Timed");
        let timed = graph.add_node(TaskNode::new("Timed", || Ok(())).with_timing(true));
        let untimed = graph.add_function("Untimed", || Ok(()));
        graph
            .add_edges(&[
                (graph.source(), timed),
                (timed, untimed),
                (untimed, graph.sink()),
            ])
            .unwrap();

        let controller = TaskGraphController::new(graph, ExecutionMode::Sequential).unwrap();
        let diagnostics = controller.execute().unwrap();
        assert!(diagnostics.execution_times.contains_key(&timed));
        assert!(!diagnostics.execution_times.contains_key(&untimed));
    }
}
