use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ids::next_id;

/// The body of a task: a zero-argument callable run once per frame.
pub type TaskFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Identity of a [`TaskNode`], unique across every graph in the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named unit of work in a [`TaskGraph`](super::TaskGraph).
///
/// A node is cheap to clone. Clones share the body and the enabled switch,
/// so a node that was nested into a larger graph can still be toggled
/// through the copy kept by the model that created it.
///
/// Nodes without a body are anchors: they exist only so that edges have
/// something to attach to (every graph owns a `source` and a `sink`).
#[derive(Clone)]
pub struct TaskNode {
    pub(crate) id: NodeId,
    pub(crate) name: Cow<'static, str>,
    pub(crate) body: Option<TaskFn>,
    pub(crate) enabled: Arc<AtomicBool>,
    pub(crate) timed: bool,
}

impl TaskNode {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, body: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: NodeId(next_id()),
            name: name.into(),
            body: Some(Arc::new(body)),
            enabled: Arc::new(AtomicBool::new(true)),
            timed: false,
        }
    }

    /// A node with no body.
    pub fn anchor(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: NodeId(next_id()),
            name: name.into(),
            body: None,
            enabled: Arc::new(AtomicBool::new(true)),
            timed: false,
        }
    }

    /// Record how long this node takes each time it runs.
    pub fn with_timing(mut self, timed: bool) -> Self {
        self.timed = timed;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_anchor(&self) -> bool {
        self.body.is_none()
    }

    pub fn is_timed(&self) -> bool {
        self.timed
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disabled nodes keep their place in the graph; the controller treats
    /// them as finished the moment their predecessors are.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn run(&self) -> anyhow::Result<()> {
        match &self.body {
            Some(body) => body(),
            None => Ok(()),
        }
    }
}

impl Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("anchor", &self.is_anchor())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
