//! Smoothed-particle hydrodynamics.
//!
//! An [`SphModel`] owns its particle data in an [`SphShared`] arena and a
//! private [`TaskGraph`] with one node per solver stage:
//!
//! ```text
//! source → find neighbors → density → normalize density → collect density
//!        → { pressure, viscosity, surface tension } → sum accelerations
//!        → timestep → integrate → move particles → sink
//! ```
//!
//! The normalize node is always present and only enabled when the config
//! asks for it, so toggling normalization never changes the graph's shape.

mod config;
mod flow;
mod kernels;
mod stages;
mod state;

use std::io;
use std::sync::Arc;

use glam::DVec3;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::engine::{GraphEdges, NodeId, TaskGraph, TaskNode};
use crate::error::{ConfigError, GraphError};
use crate::neighbor::NeighborSearch;

pub use crate::sph::config::{SphModelConfig, SphParameters};
pub use crate::sph::flow::{FlowBoundary, InletOutlet};
pub use crate::sph::kernels::Kernels;
pub use crate::sph::state::{NeighborInfo, ParticleKind, SphState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeStepping {
    /// Always use the default timestep.
    Fixed,
    /// CFL-bounded timestep, recomputed every step.
    #[default]
    Adaptive,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    pub(crate) stepping: TimeStepping,
    pub(crate) dt: f64,
    pub(crate) default_dt: f64,
    pub(crate) total_time: f64,
    pub(crate) step_count: u64,
    /// Whether the leapfrog half-step velocity has been initialized.
    pub(crate) started: bool,
}

impl Clock {
    fn new(default_dt: f64) -> Self {
        Self {
            stepping: TimeStepping::default(),
            dt: default_dt,
            default_dt,
            total_time: 0.0,
            step_count: 0,
            started: false,
        }
    }

    fn reset(&mut self) {
        *self = Self {
            stepping: self.stepping,
            ..Self::new(self.default_dt)
        };
    }
}

#[derive(Debug, Default)]
pub(crate) struct SurfaceTension {
    pub(crate) accels: Vec<DVec3>,
    pub(crate) normals: Vec<DVec3>,
}

/// Everything the solver stages touch, shared between the model and the
/// bodies of its task nodes.
///
/// The state and each force buffer sit behind their own lock so the three
/// force stages can run concurrently.
pub struct SphShared {
    config: RwLock<SphParameters>,
    pub(crate) state: RwLock<SphState>,
    initial: RwLock<SphState>,
    pub(crate) pressure: RwLock<Vec<DVec3>>,
    pub(crate) viscosity: RwLock<Vec<DVec3>>,
    pub(crate) surface_tension: RwLock<SurfaceTension>,
    pub(crate) fluid_search: Mutex<NeighborSearch>,
    pub(crate) boundary_search: Mutex<NeighborSearch>,
    pub(crate) clock: Mutex<Clock>,
    pub(crate) flow: RwLock<Option<FlowBoundary>>,
}

impl SphShared {
    fn new(config: SphParameters) -> Self {
        let h = config.kernel_radius();
        let method = config.neighbor_search;
        let default_dt = config.max_timestep;

        Self {
            config: RwLock::new(config),
            state: RwLock::new(SphState::default()),
            initial: RwLock::new(SphState::default()),
            pressure: RwLock::default(),
            viscosity: RwLock::default(),
            surface_tension: RwLock::default(),
            fluid_search: Mutex::new(NeighborSearch::new(method, h)),
            boundary_search: Mutex::new(NeighborSearch::new(method, h)),
            clock: Mutex::new(Clock::new(default_dt)),
            flow: RwLock::new(None),
        }
    }

    /// A copy of the finalized parameters.
    pub fn config(&self) -> SphParameters {
        self.config.read().clone()
    }

    pub fn state(&self) -> RwLockReadGuard<'_, SphState> {
        self.state.read()
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, SphState> {
        self.state.write()
    }

    /// Current timestep, as chosen by the last timestep stage.
    pub fn timestep(&self) -> f64 {
        self.clock.lock().dt
    }
}

impl std::fmt::Debug for SphShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SphShared")
            .field("particles", &self.state.read().len())
            .field("clock", &*self.clock.lock())
            .finish_non_exhaustive()
    }
}

/// Ids of the solver's stage nodes.
#[derive(Debug, Clone, Copy)]
pub struct SphNodes {
    pub find_neighbors: NodeId,
    pub compute_density: NodeId,
    pub normalize_density: NodeId,
    pub collect_neighbor_density: NodeId,
    pub compute_pressure: NodeId,
    pub compute_viscosity: NodeId,
    pub compute_surface_tension: NodeId,
    pub sum_accelerations: NodeId,
    pub compute_timestep: NodeId,
    pub integrate: NodeId,
    pub move_particles: NodeId,
}

impl SphNodes {
    fn build(graph: &mut TaskGraph, shared: &Arc<SphShared>) -> Self {
        let prefix = graph.name().to_string();
        let mut stage = |label: &str, body: fn(&SphShared)| {
            let shared = shared.clone();
            let node = TaskNode::new(format!("{prefix}_{label}"), move || {
                body(&shared);
                Ok(())
            });
            graph.add_node(node.with_timing(true))
        };

        Self {
            find_neighbors: stage("FindNeighbors", stages::find_neighbors),
            compute_density: stage("ComputeDensity", stages::compute_density),
            normalize_density: stage("NormalizeDensity", stages::normalize_density),
            collect_neighbor_density: stage(
                "CollectNeighborDensity",
                stages::collect_neighbor_density,
            ),
            compute_pressure: stage("ComputePressureAccel", stages::compute_pressure_acceleration),
            compute_viscosity: stage("ComputeViscosity", stages::compute_viscosity),
            compute_surface_tension: stage(
                "ComputeSurfaceTension",
                stages::compute_surface_tension,
            ),
            sum_accelerations: stage("SumAccels", stages::sum_accelerations),
            compute_timestep: stage("ComputeTimestep", stages::compute_timestep),
            integrate: stage("Integrate", stages::integrate),
            move_particles: stage("MoveParticles", stages::move_particles),
        }
    }
}

/// An SPH fluid: configuration, particle state and the solver sub-graph.
pub struct SphModel {
    shared: Arc<SphShared>,
    graph: TaskGraph,
    nodes: SphNodes,
    initialized: bool,
}

impl SphModel {
    /// Create a model named `name` (the prefix of its node names). The
    /// config is finalized here.
    pub fn new(name: impl Into<String>, config: SphModelConfig) -> Result<Self, ConfigError> {
        let config = config.finalize()?;
        let normalize = config.normalize_density;

        let shared = Arc::new(SphShared::new(config));
        let mut graph = TaskGraph::new(name);
        let nodes = SphNodes::build(&mut graph, &shared);

        let model = Self {
            shared,
            graph,
            nodes,
            initialized: false,
        };
        model.set_stage_enabled(model.nodes.normalize_density, normalize);
        Ok(model)
    }

    /// Replace the config. Derived quantities are recomputed and the
    /// neighbor indexes pick up the new kernel radius; particle data is kept.
    pub fn configure(&mut self, config: SphModelConfig) -> Result<(), ConfigError> {
        let config = config.finalize()?;
        let h = config.kernel_radius();
        let method = config.neighbor_search;
        let normalize = config.normalize_density;

        *self.shared.config.write() = config;
        *self.shared.fluid_search.lock() = NeighborSearch::new(method, h);
        {
            let mut boundary = self.shared.boundary_search.lock();
            let points = boundary.points().to_vec();
            *boundary = NeighborSearch::new(method, h);
            boundary.rebuild(&points);
        }

        self.set_stage_enabled(self.nodes.normalize_density, normalize);
        tracing::debug!(model = self.name(), kernel_radius = h, "model configured");
        Ok(())
    }

    /// Allocate the particle state from initial positions and snapshot it
    /// as the initial state.
    pub fn initialize(&mut self, positions: Vec<DVec3>) -> Result<(), ConfigError> {
        if positions.is_empty() {
            return Err(ConfigError::NoParticles);
        }

        let count = positions.len();
        let mut state = SphState::new(positions);
        state.boundary_positions = self.shared.boundary_search.lock().points().to_vec();

        self.shared.fluid_search.lock().rebuild(&state.positions);
        *self.shared.initial.write() = state.clone();
        *self.shared.state.write() = state;

        *self.shared.pressure.write() = vec![DVec3::ZERO; count];
        *self.shared.viscosity.write() = vec![DVec3::ZERO; count];
        *self.shared.surface_tension.write() = SurfaceTension {
            accels: vec![DVec3::ZERO; count],
            normals: vec![DVec3::ZERO; count],
        };
        self.shared.clock.lock().reset();

        self.initialized = true;
        tracing::info!(model = self.name(), particles = count, "SPH model initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn name(&self) -> &str {
        self.graph.name()
    }

    pub fn config(&self) -> SphParameters {
        self.shared.config()
    }

    pub fn shared(&self) -> &Arc<SphShared> {
        &self.shared
    }

    pub fn nodes(&self) -> &SphNodes {
        &self.nodes
    }

    pub fn state(&self) -> RwLockReadGuard<'_, SphState> {
        self.shared.state()
    }

    pub fn num_particles(&self) -> usize {
        self.shared.state.read().len()
    }

    pub fn positions(&self) -> Vec<DVec3> {
        self.shared.state.read().positions.clone()
    }

    pub fn set_initial_velocities(&self, velocities: &[DVec3]) -> Result<(), ConfigError> {
        let expected = self.num_particles();
        if velocities.len() != expected {
            return Err(ConfigError::VelocityCount {
                expected,
                actual: velocities.len(),
            });
        }

        self.update_state_and_initial(|state| {
            for (i, &v) in velocities.iter().enumerate() {
                state.set_velocity(i, v);
            }
        });
        Ok(())
    }

    pub fn initial_velocities(&self) -> Vec<DVec3> {
        self.shared.initial.read().velocities.clone()
    }

    /// Static boundary particles. They are indexed once here, not every
    /// step.
    pub fn set_boundary_particles(&self, positions: Vec<DVec3>) {
        self.shared.boundary_search.lock().rebuild(&positions);
        self.update_state_and_initial(|state| state.boundary_positions.clone_from(&positions));
        tracing::debug!(model = self.name(), count = positions.len(), "boundary particles set");
    }

    pub fn set_wall_particles(&self, indices: &[usize]) {
        self.set_kinds(indices, ParticleKind::Wall);
    }

    pub fn set_buffer_particles(&self, indices: &[usize]) {
        self.set_kinds(indices, ParticleKind::Buffer);
    }

    fn set_kinds(&self, indices: &[usize], kind: ParticleKind) {
        let count = self.num_particles();
        self.update_state_and_initial(|state| {
            for &i in indices {
                if i < count {
                    state.kinds[i] = kind;
                }
            }
        });

        let skipped = indices.iter().filter(|&&i| i >= count).count();
        if skipped > 0 {
            tracing::warn!(
                model = self.name(),
                skipped,
                particles = count,
                "ignoring out-of-range particle indices"
            );
        }
    }

    pub fn set_flow_boundary(&self, flow: Option<FlowBoundary>) -> Result<(), ConfigError> {
        if let Some(flow) = &flow {
            flow.validate()?;
        }
        *self.shared.flow.write() = flow;
        Ok(())
    }

    pub fn flow_boundary(&self) -> Option<FlowBoundary> {
        self.shared.flow.read().clone()
    }

    pub fn set_time_stepping(&self, stepping: TimeStepping) {
        self.shared.clock.lock().stepping = stepping;
    }

    pub fn time_stepping(&self) -> TimeStepping {
        self.shared.clock.lock().stepping
    }

    /// Timestep used in fixed stepping mode.
    pub fn set_default_timestep(&self, dt: f64) {
        let mut clock = self.shared.clock.lock();
        clock.default_dt = dt;
        if clock.step_count == 0 {
            clock.dt = dt;
        }
    }

    pub fn timestep(&self) -> f64 {
        self.shared.timestep()
    }

    pub fn total_time(&self) -> f64 {
        self.shared.clock.lock().total_time
    }

    pub fn step_count(&self) -> u64 {
        self.shared.clock.lock().step_count
    }

    pub fn reset_to_initial_state(&self) {
        {
            let initial = self.shared.initial.read();
            self.shared.state.write().set_state(&initial);
        }
        for buffer in [&self.shared.pressure, &self.shared.viscosity] {
            buffer.write().fill(DVec3::ZERO);
        }
        {
            let mut tension = self.shared.surface_tension.write();
            tension.accels.fill(DVec3::ZERO);
            tension.normals.fill(DVec3::ZERO);
        }
        self.shared.clock.lock().reset();
        tracing::debug!(model = self.name(), "reset to initial state");
    }

    /// Index of the particle closest to `point`.
    pub fn nearest_particle(&self, point: DVec3) -> Option<usize> {
        self.shared
            .state
            .read()
            .positions
            .iter()
            .map(|p| p.distance_squared(point))
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    }

    /// One line per particle: position, velocity, density, pressure, kind.
    pub fn write_state_csv<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
        let config = self.shared.config();
        let state = self.shared.state.read();

        writeln!(writer, "x,y,z,vx,vy,vz,density,pressure,kind")?;
        for i in 0..state.len() {
            let x = state.positions[i];
            let v = state.velocities[i];
            let density = state.densities[i];
            let kind = match state.kinds[i] {
                ParticleKind::Fluid => "fluid",
                ParticleKind::Buffer => "buffer",
                ParticleKind::Wall => "wall",
            };
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{}",
                x.x,
                x.y,
                x.z,
                v.x,
                v.y,
                v.z,
                density,
                config.pressure(density),
                kind
            )?;
        }
        writer.flush()
    }

    fn set_stage_enabled(&self, id: NodeId, enabled: bool) {
        if let Some(node) = self.graph.node(id) {
            node.set_enabled(enabled);
        }
    }

    fn update_state_and_initial(&self, f: impl Fn(&mut SphState)) {
        f(&mut self.shared.state.write());
        f(&mut self.shared.initial.write());
    }
}

impl GraphEdges for SphModel {
    fn task_graph(&self) -> &TaskGraph {
        &self.graph
    }

    fn init_graph_edges(&mut self, source: NodeId, sink: NodeId) -> Result<(), GraphError> {
        let n = self.nodes;
        self.graph.add_edges(&[
            (source, n.find_neighbors),
            (n.find_neighbors, n.compute_density),
            (n.compute_density, n.normalize_density),
            (n.normalize_density, n.collect_neighbor_density),
            (n.collect_neighbor_density, n.compute_pressure),
            (n.collect_neighbor_density, n.compute_viscosity),
            (n.collect_neighbor_density, n.compute_surface_tension),
            (n.compute_pressure, n.sum_accelerations),
            (n.compute_viscosity, n.sum_accelerations),
            (n.compute_surface_tension, n.sum_accelerations),
            (n.sum_accelerations, n.compute_timestep),
            (n.compute_timestep, n.integrate),
            (n.integrate, n.move_particles),
            (n.move_particles, sink),
        ])
    }
}
