//! The composition layer: objects, the interactions between them, and the
//! master graph that runs one frame of the whole scene.
//!
//! Every object contributes its own graph,
//!
//! ```text
//! source → update → [model] → update geometry → sink
//! ```
//!
//! nested between the master graph's anchors. A fluid–obstacle interaction
//! is then spliced in between the fluid model's sink and the fluid's
//! geometry update, and additionally waits for the obstacle's geometry
//! update and holds back the obstacle's sink. Interactions that share a
//! fluid or an obstacle are chained in the order they were added, so every
//! buffer has one writer at a time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::collision::{
    BodyState, CollisionDetection, CollisionEvent, CollisionHandling, CollisionInteraction, PointSource,
    DEFAULT_PENALTY_DAMPING, DEFAULT_PENALTY_STIFFNESS, DEFAULT_SPH_FRICTION,
};
use crate::engine::{ExecutionMode, GraphEdges, NodeId, TaskGraph, TaskGraphController, TaskNode, TimingTable};
use crate::error::{GraphError, SceneError};
use crate::geometry::{ImplicitGeometry, PointSet};
use crate::sph::SphModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub mode: ExecutionMode,
    /// Size of a dedicated worker pool; the global pool when unset.
    pub threads: Option<usize>,
    /// Every fluid must use exactly this particle radius.
    pub particle_radius: Option<f64>,
}

/// Parameters of a fluid–obstacle interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionOptions {
    pub friction: f64,
    /// Apply penalty forces to the obstacle.
    pub penalty: bool,
    pub stiffness: f64,
    pub damping: f64,
}

impl Default for CollisionOptions {
    fn default() -> Self {
        Self {
            friction: DEFAULT_SPH_FRICTION,
            penalty: true,
            stiffness: DEFAULT_PENALTY_STIFFNESS,
            damping: DEFAULT_PENALTY_DAMPING,
        }
    }
}

/// A fluid and the point set mirroring its particle positions.
pub struct SphObject {
    name: String,
    model: SphModel,
    geometry: Arc<RwLock<PointSet>>,
    update: TaskNode,
    update_geometry: TaskNode,
    graph: TaskGraph,
}

impl SphObject {
    pub fn new(name: impl Into<String>, model: SphModel) -> Self {
        let name = name.into();
        let geometry = Arc::new(RwLock::new(PointSet::new(model.positions())));

        let update_geometry = {
            let shared = model.shared().clone();
            let geometry = geometry.clone();
            TaskNode::new(format!("{name}_UpdateGeometry"), move || {
                let state = shared.state();
                geometry.write().set_positions(&state.positions);
                Ok(())
            })
        };

        Self {
            update: TaskNode::anchor(format!("{name}_Update")),
            update_geometry,
            graph: TaskGraph::new(name.clone()),
            name,
            model,
            geometry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &SphModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut SphModel {
        &mut self.model
    }

    pub fn geometry(&self) -> &Arc<RwLock<PointSet>> {
        &self.geometry
    }

    pub fn update_node(&self) -> NodeId {
        self.update.id()
    }

    pub fn update_geometry_node(&self) -> NodeId {
        self.update_geometry.id()
    }

    fn build_graph(&mut self) -> Result<(), GraphError> {
        let mut graph = TaskGraph::new(self.name.clone());
        let update = graph.add_node(self.update.clone());
        let update_geometry = graph.add_node(self.update_geometry.clone());

        self.model.init_default_graph_edges()?;
        graph.nest_graph(self.model.task_graph(), update, update_geometry)?;
        graph.add_edges(&[(graph.source(), update), (update_geometry, graph.sink())])?;

        self.graph = graph;
        Ok(())
    }

    fn reset(&self) {
        self.model.reset_to_initial_state();
        let positions = self.model.positions();
        self.geometry.write().set_positions(&positions);
    }
}

/// A static implicit obstacle that accumulates contact forces.
pub struct CollidingObject {
    name: String,
    geometry: Arc<RwLock<ImplicitGeometry>>,
    body: Arc<BodyState>,
    update: TaskNode,
    update_geometry: TaskNode,
    graph: TaskGraph,
}

impl CollidingObject {
    pub fn new(name: impl Into<String>, geometry: ImplicitGeometry) -> Self {
        let name = name.into();
        let body = Arc::new(BodyState::new());

        let update = {
            let body = body.clone();
            TaskNode::new(format!("{name}_Update"), move || {
                body.reset_force();
                Ok(())
            })
        };

        Self {
            update,
            update_geometry: TaskNode::anchor(format!("{name}_UpdateGeometry")),
            graph: TaskGraph::new(name.clone()),
            geometry: Arc::new(RwLock::new(geometry)),
            body,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &Arc<RwLock<ImplicitGeometry>> {
        &self.geometry
    }

    pub fn body(&self) -> &Arc<BodyState> {
        &self.body
    }

    pub fn update_node(&self) -> NodeId {
        self.update.id()
    }

    pub fn update_geometry_node(&self) -> NodeId {
        self.update_geometry.id()
    }

    fn build_graph(&mut self) -> Result<(), GraphError> {
        let mut graph = TaskGraph::new(self.name.clone());
        let update = graph.add_node(self.update.clone());
        let update_geometry = graph.add_node(self.update_geometry.clone());
        graph.add_edges(&[
            (graph.source(), update),
            (update, update_geometry),
            (update_geometry, graph.sink()),
        ])?;

        self.graph = graph;
        Ok(())
    }

    fn reset(&self) {
        self.body.clear_forces();
    }
}

pub enum SceneObject {
    Fluid(SphObject),
    Colliding(CollidingObject),
}

impl SceneObject {
    pub fn name(&self) -> &str {
        match self {
            Self::Fluid(object) => object.name(),
            Self::Colliding(object) => object.name(),
        }
    }

    pub fn task_graph(&self) -> &TaskGraph {
        match self {
            Self::Fluid(object) => &object.graph,
            Self::Colliding(object) => &object.graph,
        }
    }

    fn build_graph(&mut self) -> Result<(), GraphError> {
        match self {
            Self::Fluid(object) => object.build_graph(),
            Self::Colliding(object) => object.build_graph(),
        }
    }

    fn reset(&self) {
        match self {
            Self::Fluid(object) => object.reset(),
            Self::Colliding(object) => object.reset(),
        }
    }
}

impl From<SphObject> for SceneObject {
    fn from(object: SphObject) -> Self {
        Self::Fluid(object)
    }
}

impl From<CollidingObject> for SceneObject {
    fn from(object: CollidingObject) -> Self {
        Self::Colliding(object)
    }
}

struct SceneInteraction {
    interaction: CollisionInteraction,
    fluid: ObjectId,
    obstacle: ObjectId,
}

pub struct Scene {
    name: String,
    config: SceneConfig,
    objects: Vec<SceneObject>,
    interactions: Vec<SceneInteraction>,
    controller: Option<TaskGraphController>,
    paused: bool,
    timings: TimingTable,
    frame: u64,
    events: Vec<CollisionEvent>,
}

impl Scene {
    pub fn new(name: impl Into<String>, config: SceneConfig) -> Self {
        Self {
            name: name.into(),
            config,
            objects: Vec::new(),
            interactions: Vec::new(),
            controller: None,
            paused: false,
            timings: TimingTable::default(),
            frame: 0,
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Register an object. Names are unique within a scene; a duplicate is
    /// ignored with a warning.
    pub fn add_object(&mut self, object: impl Into<SceneObject>) -> Option<ObjectId> {
        let object = object.into();
        if self.object_by_name(object.name()).is_some() {
            tracing::warn!(
                scene = %self.name,
                object = object.name(),
                "object with this name already exists, ignoring"
            );
            return None;
        }

        tracing::debug!(scene = %self.name, object = object.name(), "object added");
        self.objects.push(object);
        self.controller = None;
        Some(ObjectId(self.objects.len() - 1))
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(id.0)
    }

    pub fn object_by_name(&self, name: &str) -> Option<ObjectId> {
        self.objects
            .iter()
            .position(|object| object.name() == name)
            .map(ObjectId)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &SceneObject)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(index, object)| (ObjectId(index), object))
    }

    pub fn fluid(&self, id: ObjectId) -> Option<&SphObject> {
        match self.objects.get(id.0)? {
            SceneObject::Fluid(object) => Some(object),
            SceneObject::Colliding(_) => None,
        }
    }

    pub fn fluid_mut(&mut self, id: ObjectId) -> Option<&mut SphObject> {
        match self.objects.get_mut(id.0)? {
            SceneObject::Fluid(object) => Some(object),
            SceneObject::Colliding(_) => None,
        }
    }

    pub fn colliding(&self, id: ObjectId) -> Option<&CollidingObject> {
        match self.objects.get(id.0)? {
            SceneObject::Colliding(object) => Some(object),
            SceneObject::Fluid(_) => None,
        }
    }

    /// Couple a fluid with an implicit obstacle: particles are pushed out
    /// of the obstacle and, if enabled, the obstacle receives penalty
    /// forces. Returns the interaction's index.
    pub fn add_sph_collision(
        &mut self,
        fluid: ObjectId,
        obstacle: ObjectId,
        options: CollisionOptions,
    ) -> Result<usize, SceneError> {
        let result = self.create_sph_collision(fluid, obstacle, options);
        if let Err(err) = &result {
            tracing::error!(scene = %self.name, "{err}");
        }
        result
    }

    fn create_sph_collision(
        &mut self,
        fluid_id: ObjectId,
        obstacle_id: ObjectId,
        options: CollisionOptions,
    ) -> Result<usize, SceneError> {
        let fluid_object = self.object(fluid_id).ok_or(SceneError::ObjectNotFound(fluid_id.0))?;
        let obstacle_object = self
            .object(obstacle_id)
            .ok_or(SceneError::ObjectNotFound(obstacle_id.0))?;
        let name = format!("{}_vs_{}", fluid_object.name(), obstacle_object.name());

        let SceneObject::Fluid(fluid) = fluid_object else {
            return Err(SceneError::WrongObjectKind(name, "a fluid on the first side"));
        };
        let SceneObject::Colliding(obstacle) = obstacle_object else {
            return Err(SceneError::WrongObjectKind(name, "a colliding object on the second side"));
        };

        let shared = fluid.model().shared().clone();
        let points = PointSource::Sph(shared.clone());
        let detection = CollisionDetection::for_geometry(obstacle.geometry().clone(), points.clone());

        let penalty = options.penalty.then(|| CollisionHandling::Penalty {
            stiffness: options.stiffness,
            damping: options.damping,
            body: obstacle.body().clone(),
            points,
        });
        let response = CollisionHandling::Sph {
            fluid: shared,
            friction: options.friction,
        };

        tracing::debug!(
            scene = %self.name,
            interaction = %name,
            detection = detection.name(),
            "interaction added"
        );

        let interaction = CollisionInteraction::new(name, detection, penalty, Some(response));
        self.interactions.push(SceneInteraction {
            interaction,
            fluid: fluid_id,
            obstacle: obstacle_id,
        });
        self.controller = None;
        Ok(self.interactions.len() - 1)
    }

    pub fn interaction(&self, index: usize) -> Option<&CollisionInteraction> {
        self.interactions.get(index).map(|entry| &entry.interaction)
    }

    /// Assemble the master graph and make the scene ready to advance.
    /// Can be called again after objects or interactions were added.
    pub fn initialize(&mut self) -> Result<(), SceneError> {
        let result = self.build_controller();
        match &result {
            Ok(()) => tracing::info!(
                scene = %self.name,
                objects = self.objects.len(),
                interactions = self.interactions.len(),
                "scene initialized"
            ),
            Err(err) => tracing::error!(scene = %self.name, "{err}"),
        }
        result
    }

    pub fn is_initialized(&self) -> bool {
        self.controller.is_some()
    }

    fn build_controller(&mut self) -> Result<(), SceneError> {
        self.controller = None;

        if let Some(radius) = self.config.particle_radius {
            for object in &self.objects {
                if let SceneObject::Fluid(fluid) = object {
                    fluid.model().config().require_particle_radius(radius)?;
                }
            }
        }

        let mut graph = TaskGraph::new(self.name.clone());
        let (source, sink) = (graph.source(), graph.sink());

        for object in &mut self.objects {
            object.build_graph()?;
            graph.nest_graph(object.task_graph(), source, sink)?;
        }

        // Interactions touching the same fluid or obstacle run one after
        // another, in the order they were added.
        let mut fluid_anchor: HashMap<ObjectId, NodeId> = HashMap::new();
        let mut obstacle_last: HashMap<ObjectId, NodeId> = HashMap::new();

        for entry in &mut self.interactions {
            let Some(SceneObject::Fluid(fluid)) = self.objects.get(entry.fluid.0) else {
                return Err(SceneError::ObjectNotFound(entry.fluid.0));
            };
            let Some(SceneObject::Colliding(obstacle)) = self.objects.get(entry.obstacle.0) else {
                return Err(SceneError::ObjectNotFound(entry.obstacle.0));
            };

            let interaction = &mut entry.interaction;
            interaction.rebuild_graph();
            interaction.init_default_graph_edges()?;

            let sub = interaction.task_graph();
            let anchor = *fluid_anchor
                .entry(entry.fluid)
                .or_insert_with(|| fluid.model().task_graph().sink());
            graph.nest_graph(sub, anchor, fluid.update_geometry_node())?;
            graph.add_edges(&[
                (obstacle.update_geometry_node(), sub.source()),
                (sub.sink(), obstacle.graph.sink()),
            ])?;
            if let Some(previous) = obstacle_last.insert(entry.obstacle, sub.sink()) {
                graph.add_edge(previous, sub.source())?;
            }
            fluid_anchor.insert(entry.fluid, sub.sink());
        }

        let removed = graph.transitive_reduction()?;
        tracing::debug!(scene = %self.name, removed, "redundant edges dropped");

        let mut controller = TaskGraphController::new(graph, self.config.mode)?;
        if let Some(threads) = self.config.threads {
            controller = controller
                .with_threads(threads)
                .map_err(|err| SceneError::Exec(self.name.clone(), err))?;
        }

        self.controller = Some(controller);
        Ok(())
    }

    /// Run one frame. Does nothing, with a warning, while the scene is
    /// paused or not initialized.
    pub fn advance(&mut self) -> Result<(), SceneError> {
        if self.paused {
            tracing::warn!(scene = %self.name, "scene is paused, not advancing");
            return Ok(());
        }
        let Some(controller) = &self.controller else {
            tracing::warn!(scene = %self.name, "scene is not initialized, not advancing");
            return Ok(());
        };

        let diagnostics = controller
            .execute()
            .map_err(|err| SceneError::Exec(self.name.clone(), err))?;
        diagnostics.accumulate(controller.graph(), &mut self.timings);
        self.frame += 1;

        for entry in &self.interactions {
            self.events.extend(entry.interaction.drain_events());
        }

        tracing::debug!(
            scene = %self.name,
            frame = self.frame,
            span = ?diagnostics.span(),
            "frame done"
        );
        Ok(())
    }

    /// Advance `frames` times behind a progress bar.
    pub fn run(&mut self, frames: u64) -> Result<(), SceneError> {
        let style = crate::utils::progress_style().map_err(SceneError::Other)?;

        let root_span = tracing::info_span!("running_scene", scene = %self.name);
        root_span.pb_set_length(frames);
        root_span.pb_set_style(&style);
        root_span.pb_set_message(&format!("Simulating {}...", self.name));
        let _enter = root_span.enter();

        for _ in 0..frames {
            self.advance()?;
            root_span.pb_inc(1);
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Put every object back into its initial state. The graph is kept.
    pub fn reset(&mut self) {
        for object in &self.objects {
            object.reset();
        }
        for entry in &self.interactions {
            entry.interaction.reset();
        }
        self.timings.clear();
        self.events.clear();
        self.frame = 0;
        tracing::info!(scene = %self.name, "scene reset");
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn timings(&self) -> &TimingTable {
        &self.timings
    }

    /// Collision events since the last call.
    pub fn drain_events(&mut self) -> Vec<CollisionEvent> {
        std::mem::take(&mut self.events)
    }

    /// The master graph, once initialized.
    pub fn graph(&self) -> Option<&TaskGraph> {
        self.controller.as_ref().map(TaskGraphController::graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sph::{SphModelConfig, SphNodes};
    use glam::DVec3;

    fn layer(y: f64) -> Vec<DVec3> {
        let mut points = Vec::new();
        for z in 0..3 {
            for x in 0..3 {
                points.push(DVec3::new(x as f64 * 0.2, y, z as f64 * 0.2));
            }
        }
        points
    }

    fn fluid(name: &str, y: f64) -> SphObject {
        let mut model = SphModel::new(format!("{name}Model"), SphModelConfig::new(0.1)).unwrap();
        model.initialize(layer(y)).unwrap();
        SphObject::new(name, model)
    }

    fn floor() -> CollidingObject {
        CollidingObject::new("Floor", ImplicitGeometry::plane(DVec3::ZERO, DVec3::Y))
    }

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&o| o == id).unwrap()
    }

    #[test]
    fn test_composition_order() {
        let mut scene = Scene::new("Scene", SceneConfig::default());
        let water = scene.add_object(fluid("Water", 0.02)).unwrap();
        let ground = scene.add_object(floor()).unwrap();
        let index = scene
            .add_sph_collision(water, ground, CollisionOptions::default())
            .unwrap();
        scene.initialize().unwrap();

        let graph = scene.graph().unwrap();
        assert!(graph.validate().is_ok());
        let order = graph.topological_order().unwrap();

        let fluid = scene.fluid(water).unwrap();
        let nodes: SphNodes = *fluid.model().nodes();
        let interaction = scene.interaction(index).unwrap();
        let detect = interaction.detect_node();
        let obstacle = scene.colliding(ground).unwrap();

        assert!(position(&order, fluid.update_node()) < position(&order, nodes.find_neighbors));
        assert!(position(&order, nodes.move_particles) < position(&order, detect));
        assert!(position(&order, obstacle.update_geometry_node()) < position(&order, detect));
        for handler in [interaction.handle_a_node(), interaction.handle_b_node()] {
            let handler = handler.unwrap();
            assert!(position(&order, detect) < position(&order, handler));
            assert!(position(&order, handler) < position(&order, fluid.update_geometry_node()));
        }
        assert!(!graph.contains_edge(fluid.model().task_graph().sink(), fluid.update_geometry_node()));
    }

    #[test]
    fn test_writers_of_one_fluid_are_ordered() {
        let mut scene = Scene::new("Scene", SceneConfig::default());
        let water = scene.add_object(fluid("Water", 0.5)).unwrap();
        let ball = scene
            .add_object(CollidingObject::new(
                "Ball",
                ImplicitGeometry::Sphere {
                    center: DVec3::new(0.2, 0.0, 0.2),
                    radius: 0.3,
                },
            ))
            .unwrap();
        let ground = scene.add_object(floor()).unwrap();
        let first = scene.add_sph_collision(water, ball, CollisionOptions::default()).unwrap();
        let second = scene
            .add_sph_collision(water, ground, CollisionOptions::default())
            .unwrap();
        scene.initialize().unwrap();

        let graph = scene.graph().unwrap();
        let first = scene.interaction(first).unwrap();
        let second = scene.interaction(second).unwrap();

        for interaction in [first, second] {
            let penalty = interaction.handle_a_node().unwrap();
            let response = interaction.handle_b_node().unwrap();
            assert!(graph.has_path(interaction.detect_node(), penalty));
            assert!(graph.has_path(penalty, response));
        }

        let response = first.handle_b_node().unwrap();
        assert!(graph.has_path(response, second.detect_node()));
        assert!(graph.has_path(response, second.handle_b_node().unwrap()));
        assert!(!graph.has_path(second.detect_node(), response));

        let update_geometry = scene.fluid(water).unwrap().update_geometry_node();
        assert!(graph.has_path(second.handle_b_node().unwrap(), update_geometry));
    }

    #[test]
    fn test_interactions_on_one_obstacle_are_ordered() {
        let mut scene = Scene::new("Scene", SceneConfig::default());
        let water = scene.add_object(fluid("Water", 0.5)).unwrap();
        let rain = scene.add_object(fluid("Rain", 1.5)).unwrap();
        let ground = scene.add_object(floor()).unwrap();
        let first = scene.add_sph_collision(water, ground, CollisionOptions::default()).unwrap();
        let second = scene.add_sph_collision(rain, ground, CollisionOptions::default()).unwrap();
        scene.initialize().unwrap();

        let graph = scene.graph().unwrap();
        let first = scene.interaction(first).unwrap();
        let second = scene.interaction(second).unwrap();
        assert!(graph.has_path(first.handle_a_node().unwrap(), second.handle_a_node().unwrap()));

        scene.advance().unwrap();
        assert_eq!(scene.frame(), 1);
    }

    #[test]
    fn test_collision_keeps_particles_above_floor() {
        let mut scene = Scene::new("Drop", SceneConfig::default());
        let water = scene.add_object(fluid("Water", 0.005)).unwrap();
        let ground = scene.add_object(floor()).unwrap();
        scene
            .add_sph_collision(water, ground, CollisionOptions::default())
            .unwrap();
        scene.initialize().unwrap();

        let mut pushed = false;
        for _ in 0..80 {
            scene.advance().unwrap();
            let fluid = scene.fluid(water).unwrap();
            assert!(fluid.model().positions().iter().all(|p| p.y >= -1e-12));
            pushed |= scene.colliding(ground).unwrap().body().force().y < 0.0;
        }

        assert!(pushed);
        assert_eq!(scene.frame(), 80);
        assert!(scene.timings().frames() > 0);

        let events = scene.drain_events();
        assert!(matches!(events.first(), Some(CollisionEvent::Entered { interaction, .. }) if interaction == "Water_vs_Floor"));

        // The point set mirrors the particles.
        let fluid = scene.fluid(water).unwrap();
        assert_eq!(fluid.geometry().read().positions(), fluid.model().positions().as_slice());
    }

    #[test]
    fn test_sequential_and_dedicated_pool() {
        for config in [
            SceneConfig {
                mode: ExecutionMode::Sequential,
                ..SceneConfig::default()
            },
            SceneConfig {
                threads: Some(2),
                ..SceneConfig::default()
            },
        ] {
            let mut scene = Scene::new("Scene", config);
            let water = scene.add_object(fluid("Water", 0.5)).unwrap();
            let ground = scene.add_object(floor()).unwrap();
            scene
                .add_sph_collision(water, ground, CollisionOptions::default())
                .unwrap();
            scene.initialize().unwrap();
            scene.advance().unwrap();
            assert_eq!(scene.fluid(water).unwrap().model().step_count(), 1);
        }
    }

    #[test]
    fn test_soft_errors_are_no_ops() {
        let mut scene = Scene::new("Scene", SceneConfig::default());
        assert!(scene.add_object(fluid("Water", 0.5)).is_some());
        assert!(scene.add_object(fluid("Water", 0.5)).is_none());
        assert_eq!(scene.objects().count(), 1);

        // Not initialized yet.
        scene.advance().unwrap();
        assert_eq!(scene.frame(), 0);

        scene.initialize().unwrap();
        scene.pause();
        scene.advance().unwrap();
        assert_eq!(scene.frame(), 0);

        scene.resume();
        scene.advance().unwrap();
        assert_eq!(scene.frame(), 1);
    }

    #[test]
    fn test_empty_scene_initializes() {
        let mut scene = Scene::new("Empty", SceneConfig::default());
        scene.initialize().unwrap();
        scene.advance().unwrap();
        assert_eq!(scene.graph().unwrap().node_count(), 2);
    }

    #[test]
    fn test_interaction_needs_fluid_and_obstacle() {
        let mut scene = Scene::new("Scene", SceneConfig::default());
        let water = scene.add_object(fluid("Water", 0.5)).unwrap();
        let ground = scene.add_object(floor()).unwrap();

        let err = scene
            .add_sph_collision(ground, water, CollisionOptions::default())
            .unwrap_err();
        assert!(matches!(err, SceneError::WrongObjectKind(..)));

        let err = scene
            .add_sph_collision(water, ObjectId(7), CollisionOptions::default())
            .unwrap_err();
        assert!(matches!(err, SceneError::ObjectNotFound(7)));
    }

    #[test]
    fn test_particle_radius_is_enforced() {
        let config = SceneConfig {
            particle_radius: Some(0.05),
            ..SceneConfig::default()
        };
        let mut scene = Scene::new("Strict", config);
        scene.add_object(fluid("Water", 0.5));

        assert!(matches!(scene.initialize(), Err(SceneError::Config(_))));
        assert!(!scene.is_initialized());
    }

    #[test]
    fn test_reset_during_contact_reports_contact_again() {
        let mut scene = Scene::new("Scene", SceneConfig::default());
        let water = scene.add_object(fluid("Water", -0.05)).unwrap();
        let ground = scene.add_object(floor()).unwrap();
        scene
            .add_sph_collision(water, ground, CollisionOptions::default())
            .unwrap();
        scene.initialize().unwrap();

        let entered = |events: &[CollisionEvent]| {
            matches!(events.first(), Some(CollisionEvent::Entered { interaction, .. }) if interaction == "Water_vs_Floor")
        };

        scene.advance().unwrap();
        assert!(entered(&scene.drain_events()));

        scene.reset();
        scene.advance().unwrap();
        assert!(entered(&scene.drain_events()));
    }

    #[test]
    fn test_reinitialize_and_reset() {
        let mut scene = Scene::new("Scene", SceneConfig::default());
        let water = scene.add_object(fluid("Water", 0.5)).unwrap();
        scene.initialize().unwrap();
        scene.advance().unwrap();

        let ground = scene.add_object(floor()).unwrap();
        assert!(!scene.is_initialized());
        scene
            .add_sph_collision(water, ground, CollisionOptions::default())
            .unwrap();
        scene.initialize().unwrap();
        scene.advance().unwrap();
        assert_eq!(scene.fluid(water).unwrap().model().step_count(), 2);

        scene.reset();
        let fluid = scene.fluid(water).unwrap();
        assert_eq!(fluid.model().step_count(), 0);
        assert_eq!(fluid.model().positions(), layer(0.5));
        assert_eq!(fluid.geometry().read().positions(), layer(0.5).as_slice());
        assert_eq!(scene.frame(), 0);
        assert!(scene.timings().is_empty());
    }
}
