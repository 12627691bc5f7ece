use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Role of a particle in the simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleKind {
    #[default]
    Fluid,
    /// Recycled particle waiting in the inlet buffer zone. Its velocity and
    /// density are prescribed.
    Buffer,
    /// Fixed particle; contributes to its neighbors, never moves.
    Wall,
}

/// Cached data about one neighbor of a particle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NeighborInfo {
    /// `x_i - x_j`.
    pub xij: DVec3,
    pub distance: f64,
    /// Density of the neighbor, filled by the collect stage. Boundary
    /// neighbors carry the rest density.
    pub density: f64,
}

/// Per-particle simulation data.
///
/// Every per-particle vector has exactly [`len`](Self::len) elements. The
/// neighbor lists and [`NeighborInfo`] caches are only valid between the
/// find-neighbors stage and the next position update. For particle `i`,
/// `neighbor_info[i]` holds its fluid neighbors first, in the order of
/// `fluid_neighbors[i]`, followed by its boundary neighbors.
#[derive(Debug, Clone, Default)]
pub struct SphState {
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
    pub half_step_velocities: Vec<DVec3>,
    pub full_step_velocities: Vec<DVec3>,
    pub densities: Vec<f64>,
    pub normals: Vec<DVec3>,
    pub accelerations: Vec<DVec3>,
    pub diffuse_velocities: Vec<DVec3>,
    pub kinds: Vec<ParticleKind>,

    pub boundary_positions: Vec<DVec3>,

    pub fluid_neighbors: Vec<Vec<usize>>,
    pub boundary_neighbors: Vec<Vec<usize>>,
    pub neighbor_info: Vec<Vec<NeighborInfo>>,
}

impl SphState {
    pub fn new(positions: Vec<DVec3>) -> Self {
        let n = positions.len();
        Self {
            positions,
            velocities: vec![DVec3::ZERO; n],
            half_step_velocities: vec![DVec3::ZERO; n],
            full_step_velocities: vec![DVec3::ZERO; n],
            densities: vec![1.0; n],
            normals: vec![DVec3::ZERO; n],
            accelerations: vec![DVec3::ZERO; n],
            diffuse_velocities: vec![DVec3::ZERO; n],
            kinds: vec![ParticleKind::Fluid; n],
            boundary_positions: Vec::new(),
            fluid_neighbors: vec![Vec::new(); n],
            boundary_neighbors: vec![Vec::new(); n],
            neighbor_info: vec![Vec::new(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Overwrite this state with a deep copy of `other`, reusing the
    /// existing allocations.
    pub fn set_state(&mut self, other: &SphState) {
        self.clone_from(other);
    }

    /// Set all three velocity buffers of particle `i` at once.
    pub fn set_velocity(&mut self, i: usize, velocity: DVec3) {
        self.velocities[i] = velocity;
        self.half_step_velocities[i] = velocity;
        self.full_step_velocities[i] = velocity;
    }

    pub fn max_speed(&self) -> f64 {
        self.velocities
            .iter()
            .zip(&self.kinds)
            .filter(|(_, kind)| **kind != ParticleKind::Wall)
            .map(|(v, _)| v.length_squared())
            .fold(0.0, f64::max)
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = SphState::new(vec![DVec3::ZERO; 3]);

        assert_eq!(state.len(), 3);
        assert_eq!(state.densities, vec![1.0; 3]);
        assert_eq!(state.accelerations, vec![DVec3::ZERO; 3]);
        assert_eq!(state.diffuse_velocities, vec![DVec3::ZERO; 3]);
        assert_eq!(state.kinds, vec![ParticleKind::Fluid; 3]);
        assert_eq!(state.neighbor_info.len(), 3);
    }

    #[test]
    fn test_set_state_is_deep() {
        let initial = SphState::new(vec![DVec3::ONE; 2]);
        let mut current = initial.clone();
        current.positions[0] = DVec3::ZERO;
        current.densities[1] = 42.0;

        current.set_state(&initial);
        assert_eq!(current.positions, initial.positions);
        assert_eq!(current.densities, initial.densities);
    }

    #[test]
    fn test_max_speed_ignores_walls() {
        let mut state = SphState::new(vec![DVec3::ZERO; 2]);
        state.set_velocity(0, DVec3::new(3.0, 4.0, 0.0));
        state.set_velocity(1, DVec3::splat(100.0));
        state.kinds[1] = ParticleKind::Wall;

        assert!((state.max_speed() - 5.0).abs() < 1e-12);
    }
}
