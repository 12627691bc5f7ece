use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::engine::{NodeId, TaskGraph};

#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// What happened during one execution of a task graph.
///
/// Only nodes created [`with_timing`](crate::engine::TaskNode::with_timing)
/// appear in `execution_times`; `skipped` lists every disabled node.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: HashMap<NodeId, TaskExecution>,
    pub skipped: Vec<NodeId>,
}

impl Diagnostics {
    /// Wall time between the first timed node starting and the last one
    /// finishing.
    pub fn span(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Fold this frame into a running table.
    pub fn accumulate(&self, graph: &TaskGraph, table: &mut TimingTable) {
        for (&id, execution) in &self.execution_times {
            let name = graph.node(id).map(|node| node.name()).unwrap_or("?");
            let entry = table.entries.entry(id).or_insert_with(|| NodeTiming {
                name: name.to_string(),
                ..NodeTiming::default()
            });

            entry.calls += 1;
            entry.total += execution.duration;
            entry.last = execution.duration;
        }
        table.frames += 1;
    }
}

#[derive(Debug, Default, Clone)]
pub struct NodeTiming {
    pub name: String,
    pub calls: u64,
    pub total: Duration,
    pub last: Duration,
}

impl NodeTiming {
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / self.calls as u32
        }
    }
}

/// Timings accumulated over many frames, per node.
#[derive(Debug, Default, Clone)]
pub struct TimingTable {
    entries: BTreeMap<NodeId, NodeTiming>,
    frames: u64,
}

impl TimingTable {
    pub fn get(&self, id: NodeId) -> Option<&NodeTiming> {
        self.entries.get(&id)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.frames = 0;
    }

    /// A plain-text table, slowest nodes first.
    pub fn render(&self) -> String {
        let mut rows: Vec<&NodeTiming> = self.entries.values().collect();
        rows.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

        let width = rows.iter().map(|row| row.name.len()).max().unwrap_or(4).max(4);

        let mut output = String::new();
        let _ = writeln!(
            output,
            "{:<width$}  {:>8}  {:>10}  {:>10}",
            "Node", "Calls", "Total", "Mean"
        );

        for row in rows {
            let _ = writeln!(
                output,
                "{:<width$}  {:>8}  {:>10}  {:>10}",
                row.name,
                row.calls,
                format_duration(row.total),
                format_duration(row.mean()),
            );
        }

        output
    }
}

fn format_duration(duration: Duration) -> String {
    let micros = duration.as_secs_f64() * 1e6;
    if micros < 1000.0 {
        format!("{micros:.0}µs")
    } else {
        format!("{:.2}ms", micros / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskNode;

    #[test]
    fn test_accumulate_and_render() {
        let mut graph = TaskGraph::new("G");
        let slow = graph.add_node(TaskNode::new("Slow", || Ok(())).with_timing(true));
        let fast = graph.add_node(TaskNode::new("Fast", || Ok(())).with_timing(true));

        let start = Instant::now();
        let mut diagnostics = Diagnostics::default();
        diagnostics.execution_times.insert(
            slow,
            TaskExecution {
                start,
                duration: Duration::from_millis(3),
            },
        );
        diagnostics.execution_times.insert(
            fast,
            TaskExecution {
                start,
                duration: Duration::from_micros(20),
            },
        );

        let mut table = TimingTable::default();
        diagnostics.accumulate(&graph, &mut table);
        diagnostics.accumulate(&graph, &mut table);

        assert_eq!(table.frames(), 2);
        let slow_timing = table.get(slow).unwrap();
        assert_eq!(slow_timing.calls, 2);
        assert_eq!(slow_timing.total, Duration::from_millis(6));
        assert_eq!(slow_timing.mean(), Duration::from_millis(3));

        let rendered = table.render();
        let slow_line = rendered.find("Slow").unwrap();
        let fast_line = rendered.find("Fast").unwrap();
        assert!(slow_line < fast_line);
        assert!(rendered.contains("3.00ms"));
        assert!(rendered.contains("20µs"));
        assert_eq!(diagnostics.span(), Duration::from_millis(3));
    }

    #[test]
    fn test_empty_span() {
        assert_eq!(Diagnostics::default().span(), Duration::ZERO);
        assert!(TimingTable::default().is_empty());
    }
}
