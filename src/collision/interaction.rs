use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::collision::{CollisionData, CollisionDetection, CollisionHandling};
use crate::engine::{GraphEdges, NodeId, TaskGraph, TaskNode};
use crate::error::GraphError;

/// Contact-state transitions of an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionEvent {
    Entered { interaction: String, contacts: usize },
    Exited { interaction: String },
}

/// One colliding pair: a detection pass and up to one response per side,
/// packaged as a sub-graph.
///
/// ```text
/// source → detect → handle A → handle B → sink
/// ```
///
/// Side A runs first and sees the points as detected, before side B moves
/// them.
pub struct CollisionInteraction {
    name: String,
    data: Arc<CollisionData>,
    touching: Arc<AtomicBool>,
    graph: TaskGraph,
    detect: TaskNode,
    handle_a: Option<TaskNode>,
    handle_b: Option<TaskNode>,
    events: Receiver<CollisionEvent>,
}

impl CollisionInteraction {
    pub fn new(
        name: impl Into<String>,
        detection: CollisionDetection,
        handling_a: Option<CollisionHandling>,
        handling_b: Option<CollisionHandling>,
    ) -> Self {
        let name = name.into();
        let data = Arc::new(CollisionData::new());
        let touching = Arc::new(AtomicBool::new(false));
        let (sender, events) = mpsc::channel();

        let detect = detect_node(&name, detection, data.clone(), touching.clone(), sender);
        let handle_a = handling_a.map(|handling| handle_node(&name, "A", handling, data.clone()));
        let handle_b = handling_b.map(|handling| handle_node(&name, "B", handling, data.clone()));

        let mut interaction = Self {
            graph: TaskGraph::new(name.clone()),
            name,
            data,
            touching,
            detect,
            handle_a,
            handle_b,
            events,
        };
        interaction.add_nodes();
        interaction
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collision_data(&self) -> &Arc<CollisionData> {
        &self.data
    }

    pub fn detect_node(&self) -> NodeId {
        self.detect.id()
    }

    pub fn handle_a_node(&self) -> Option<NodeId> {
        self.handle_a.as_ref().map(TaskNode::id)
    }

    pub fn handle_b_node(&self) -> Option<NodeId> {
        self.handle_b.as_ref().map(TaskNode::id)
    }

    /// Events emitted since the last call.
    pub fn drain_events(&self) -> Vec<CollisionEvent> {
        self.events.try_iter().collect()
    }

    /// Forget contacts and pending events. The next contact is reported as
    /// a new one.
    pub fn reset(&self) {
        self.data.clear();
        self.touching.store(false, Ordering::Release);
        self.drain_events();
    }

    /// Start over with an empty graph holding this interaction's nodes and
    /// no edges.
    pub fn rebuild_graph(&mut self) {
        self.graph = TaskGraph::new(self.name.clone());
        self.add_nodes();
    }

    fn add_nodes(&mut self) {
        self.graph.add_node(self.detect.clone());
        for node in self.handle_a.iter().chain(&self.handle_b) {
            self.graph.add_node(node.clone());
        }
    }
}

impl GraphEdges for CollisionInteraction {
    fn task_graph(&self) -> &TaskGraph {
        &self.graph
    }

    fn init_graph_edges(&mut self, source: NodeId, sink: NodeId) -> Result<(), GraphError> {
        let detect = self.detect.id();
        self.graph.add_edge(source, detect)?;

        let mut last = detect;
        for handler in self.handle_a.iter().chain(&self.handle_b) {
            self.graph.add_edge(last, handler.id())?;
            last = handler.id();
        }
        self.graph.add_edge(last, sink)
    }
}

fn detect_node(
    name: &str,
    detection: CollisionDetection,
    data: Arc<CollisionData>,
    touching: Arc<AtomicBool>,
    events: Sender<CollisionEvent>,
) -> TaskNode {
    let interaction = name.to_string();

    TaskNode::new(format!("{name}_CollisionDetection"), move || {
        detection.compute(&data);

        let contacts = data.len();
        let was_touching = touching.swap(contacts > 0, Ordering::AcqRel);
        let event = match (was_touching, contacts > 0) {
            (false, true) => Some(CollisionEvent::Entered {
                interaction: interaction.clone(),
                contacts,
            }),
            (true, false) => Some(CollisionEvent::Exited {
                interaction: interaction.clone(),
            }),
            _ => None,
        };

        if let Some(event) = event {
            tracing::debug!(?event, "contact state changed");
            // A dropped receiver only means nobody is listening.
            let _ = events.send(event);
        }
        Ok(())
    })
    .with_timing(true)
}

fn handle_node(name: &str, side: &str, handling: CollisionHandling, data: Arc<CollisionData>) -> TaskNode {
    TaskNode::new(format!("{name}_CollisionHandling{side}"), move || {
        handling.process(&data);
        Ok(())
    })
    .with_timing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{BodyState, PointSource};
    use crate::engine::{ExecutionMode, TaskGraphController};
    use crate::geometry::{ImplicitGeometry, PointSet};
    use glam::DVec3;
    use parking_lot::RwLock;

    fn plane_and_cloud() -> (Arc<RwLock<ImplicitGeometry>>, Arc<RwLock<PointSet>>) {
        let plane = Arc::new(RwLock::new(ImplicitGeometry::plane(DVec3::ZERO, DVec3::Y)));
        let cloud = Arc::new(RwLock::new(PointSet::new(vec![
            DVec3::new(0.0, -0.1, 0.0),
            DVec3::new(1.0, 0.5, 0.0),
        ])));
        (plane, cloud)
    }

    fn plane_vs_cloud(cloud: Arc<RwLock<PointSet>>, body: Arc<BodyState>) -> CollisionInteraction {
        let (plane, _) = plane_and_cloud();
        let points = PointSource::Points(cloud);
        CollisionInteraction::new(
            "PlaneVsCloud",
            CollisionDetection::for_geometry(plane, points.clone()),
            Some(CollisionHandling::penalty(body, points)),
            None,
        )
    }

    #[test]
    fn test_graph_shape() {
        let (_, cloud) = plane_and_cloud();
        let mut interaction = plane_vs_cloud(cloud, Arc::new(BodyState::new()));
        interaction.init_default_graph_edges().unwrap();

        let graph = interaction.task_graph();
        let detect = interaction.detect_node();
        let handle = interaction.handle_a_node().unwrap();
        assert!(interaction.handle_b_node().is_none());
        assert_eq!(graph.node_count(), 4);
        assert!(graph.contains_edge(graph.source(), detect));
        assert!(graph.contains_edge(detect, handle));
        assert!(graph.contains_edge(handle, graph.sink()));
        assert!(graph.validate().is_ok());
        assert!(graph.node_by_name("PlaneVsCloud_CollisionDetection").is_some());
    }

    #[test]
    fn test_handlers_run_in_order() {
        let (plane, cloud) = plane_and_cloud();
        let points = PointSource::Points(cloud);
        let mut interaction = CollisionInteraction::new(
            "TwoSided",
            CollisionDetection::for_geometry(plane, points.clone()),
            Some(CollisionHandling::penalty(Arc::new(BodyState::new()), points.clone())),
            Some(CollisionHandling::penalty(Arc::new(BodyState::new()), points)),
        );
        interaction.init_default_graph_edges().unwrap();

        let graph = interaction.task_graph();
        let detect = interaction.detect_node();
        let a = interaction.handle_a_node().unwrap();
        let b = interaction.handle_b_node().unwrap();
        assert!(graph.contains_edge(detect, a));
        assert!(graph.contains_edge(a, b));
        assert!(graph.contains_edge(b, graph.sink()));
        assert!(!graph.contains_edge(detect, b));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_detection_only_graph() {
        let (plane, cloud) = plane_and_cloud();
        let mut interaction = CollisionInteraction::new(
            "DetectOnly",
            CollisionDetection::for_geometry(plane, PointSource::Points(cloud)),
            None,
            None,
        );
        interaction.init_default_graph_edges().unwrap();

        let graph = interaction.task_graph();
        assert!(graph.contains_edge(interaction.detect_node(), graph.sink()));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_contact_events() {
        let (_, cloud) = plane_and_cloud();
        let body = Arc::new(BodyState::new());
        let mut interaction = plane_vs_cloud(cloud.clone(), body.clone());
        interaction.init_default_graph_edges().unwrap();
        let controller =
            TaskGraphController::new(interaction.task_graph().clone(), ExecutionMode::Parallel).unwrap();

        controller.execute().unwrap();
        assert_eq!(
            interaction.drain_events(),
            vec![CollisionEvent::Entered {
                interaction: "PlaneVsCloud".into(),
                contacts: 1
            }]
        );
        assert!(body.force().y < 0.0);

        // Still touching: no new event.
        controller.execute().unwrap();
        assert!(interaction.drain_events().is_empty());

        cloud.write().translate(DVec3::new(0.0, 1.0, 0.0));
        controller.execute().unwrap();
        assert_eq!(
            interaction.drain_events(),
            vec![CollisionEvent::Exited {
                interaction: "PlaneVsCloud".into()
            }]
        );
        assert!(interaction.collision_data().is_empty());
    }

    #[test]
    fn test_reset_reports_contact_again() {
        let (_, cloud) = plane_and_cloud();
        let mut interaction = plane_vs_cloud(cloud, Arc::new(BodyState::new()));
        interaction.init_default_graph_edges().unwrap();
        let controller =
            TaskGraphController::new(interaction.task_graph().clone(), ExecutionMode::Sequential).unwrap();

        controller.execute().unwrap();
        assert_eq!(interaction.drain_events().len(), 1);

        interaction.reset();
        assert!(interaction.collision_data().is_empty());

        controller.execute().unwrap();
        assert_eq!(
            interaction.drain_events(),
            vec![CollisionEvent::Entered {
                interaction: "PlaneVsCloud".into(),
                contacts: 1
            }]
        );
    }

    #[test]
    fn test_rebuild_drops_edges() {
        let (plane, cloud) = plane_and_cloud();
        let mut interaction = CollisionInteraction::new(
            "DetectOnly",
            CollisionDetection::for_geometry(plane, PointSource::Points(cloud)),
            None,
            None,
        );
        interaction.init_default_graph_edges().unwrap();
        let detect = interaction.detect_node();

        interaction.rebuild_graph();
        let graph = interaction.task_graph();
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.contains(detect));
    }
}
