use std::sync::Arc;

use glam::DVec3;
use parking_lot::Mutex;

use crate::collision::{CollisionData, CollisionElement, PointSource};
use crate::sph::SphShared;

/// Minimal dynamic state of a colliding body: the force accumulated this
/// frame and the body's velocity.
#[derive(Debug, Default)]
pub struct BodyState {
    force: Mutex<DVec3>,
    last_force: Mutex<DVec3>,
    velocity: Mutex<DVec3>,
}

impl BodyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force(&self) -> DVec3 {
        *self.force.lock()
    }

    pub fn add_force(&self, force: DVec3) {
        *self.force.lock() += force;
    }

    /// Force accumulated over the previous frame.
    pub fn last_force(&self) -> DVec3 {
        *self.last_force.lock()
    }

    /// Start a new frame: the current force becomes the last one.
    pub fn reset_force(&self) {
        let force = std::mem::take(&mut *self.force.lock());
        *self.last_force.lock() = force;
    }

    /// Drop both the current and the last force.
    pub fn clear_forces(&self) {
        *self.force.lock() = DVec3::ZERO;
        *self.last_force.lock() = DVec3::ZERO;
    }

    pub fn velocity(&self) -> DVec3 {
        *self.velocity.lock()
    }

    pub fn set_velocity(&self, velocity: DVec3) {
        *self.velocity.lock() = velocity;
    }
}

pub const DEFAULT_PENALTY_STIFFNESS: f64 = 5.0e5;
pub const DEFAULT_PENALTY_DAMPING: f64 = 0.5;
pub const DEFAULT_SPH_FRICTION: f64 = 0.1;

/// Responses applied to one side of an interaction.
#[derive(Debug, Clone)]
pub enum CollisionHandling {
    /// Spring-damper force on the implicit side: every contact contributes
    /// `(k d - c v_n) n`, where `v_n` is the relative normal velocity.
    Penalty {
        stiffness: f64,
        damping: f64,
        body: Arc<BodyState>,
        points: PointSource,
    },
    /// Position and velocity correction of the fluid particles.
    Sph {
        fluid: Arc<SphShared>,
        friction: f64,
    },
}

impl CollisionHandling {
    pub fn penalty(body: Arc<BodyState>, points: PointSource) -> Self {
        Self::Penalty {
            stiffness: DEFAULT_PENALTY_STIFFNESS,
            damping: DEFAULT_PENALTY_DAMPING,
            body,
            points,
        }
    }

    pub fn sph(fluid: Arc<SphShared>) -> Self {
        Self::Sph {
            fluid,
            friction: DEFAULT_SPH_FRICTION,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Penalty { .. } => "PenaltyCH",
            Self::Sph { .. } => "SPHCollisionHandling",
        }
    }

    pub fn process(&self, data: &CollisionData) {
        let elements = data.snapshot();
        if elements.is_empty() {
            return;
        }

        match self {
            Self::Penalty {
                stiffness,
                damping,
                body,
                points,
            } => {
                let force = penalty_force(&elements, *stiffness, *damping, body.velocity(), points);
                body.add_force(force);
            }
            Self::Sph { fluid, friction } => resolve_particles(&elements, fluid, *friction),
        }
    }
}

fn penalty_force(
    elements: &[CollisionElement],
    stiffness: f64,
    damping: f64,
    body_velocity: DVec3,
    points: &PointSource,
) -> DVec3 {
    let velocities = points.velocities();
    elements
        .iter()
        .map(|element| {
            let point_velocity = velocities.get(element.index).copied().unwrap_or_default();
            let normal_velocity = (body_velocity - point_velocity).dot(element.direction);
            (stiffness * element.depth - damping * normal_velocity) * element.direction
        })
        .sum()
}

fn resolve_particles(elements: &[CollisionElement], fluid: &SphShared, friction: f64) {
    let mut state = fluid.state_mut();
    let count = state.len();

    for element in elements.iter().filter(|e| e.index < count) {
        let i = element.index;
        let normal = -element.direction;
        state.positions[i] += normal * element.depth;

        let mut velocity = state.velocities[i];
        let approach = velocity.dot(normal);
        if approach < 0.0 {
            velocity -= approach * normal;
        }

        let normal_part = velocity.dot(normal) * normal;
        let tangent = velocity - normal_part;
        state.set_velocity(i, normal_part + tangent * (1.0 - friction));
    }
}
