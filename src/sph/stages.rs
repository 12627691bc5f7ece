//! The per-step stages of the solver. Each function is the body of one task
//! node; parallelism inside a stage is a rayon loop over particles.
//!
//! The force stages only read the state and each write their own buffer, so
//! they can run side by side. The clock lock is never held across another
//! lock.

use glam::DVec3;
use rayon::prelude::*;

use crate::sph::{Kernels, NeighborInfo, ParticleKind, SphShared, SphState, TimeStepping};

/// Relative-distance regularizer in the viscosity term, as a fraction of
/// `h²`.
const VISCOSITY_EPSILON: f64 = 0.01;

/// `2 (d + 2)` for three dimensions.
const VISCOSITY_FACTOR: f64 = 10.0;

pub(crate) fn find_neighbors(shared: &SphShared) {
    let config = shared.config();
    let h = config.kernel_radius();
    let rest_density = config.rest_density;

    let mut guard = shared.state.write();
    let SphState {
        positions,
        fluid_neighbors,
        boundary_neighbors,
        neighbor_info,
        ..
    } = &mut *guard;

    let mut fluid_search = shared.fluid_search.lock();
    fluid_search.rebuild(positions);
    let fluid_search = &*fluid_search;

    let boundary_search = shared.boundary_search.lock();
    let boundary_search = &*boundary_search;
    let boundary_points = boundary_search.points();

    let positions = &*positions;

    fluid_neighbors
        .par_iter_mut()
        .zip(boundary_neighbors.par_iter_mut())
        .zip(neighbor_info.par_iter_mut())
        .enumerate()
        .for_each(|(i, ((fluid, boundary), info))| {
            let xi = positions[i];

            fluid.clear();
            fluid_search.neighbors_into(xi, h, fluid);
            fluid.sort_unstable();

            boundary.clear();
            boundary_search.neighbors_into(xi, h, boundary);
            boundary.sort_unstable();

            info.clear();
            info.extend(fluid.iter().map(|&j| neighbor(xi - positions[j], 0.0)));
            info.extend(
                boundary
                    .iter()
                    .map(|&b| neighbor(xi - boundary_points[b], rest_density)),
            );
        });
}

fn neighbor(xij: DVec3, density: f64) -> NeighborInfo {
    NeighborInfo {
        xij,
        distance: xij.length(),
        density,
    }
}

pub(crate) fn compute_density(shared: &SphShared) {
    let config = shared.config();
    let kernels = Kernels::new(config.kernel_radius());
    let mass = config.particle_mass();
    let with_boundary = config.density_with_boundary;

    let mut guard = shared.state.write();
    let SphState {
        densities,
        fluid_neighbors,
        neighbor_info,
        ..
    } = &mut *guard;

    densities
        .par_iter_mut()
        .zip(fluid_neighbors.par_iter())
        .zip(neighbor_info.par_iter())
        .for_each(|((density, fluid), info)| {
            let count = if with_boundary { info.len() } else { fluid.len() };
            let sum: f64 = info.iter().take(count).map(|nb| kernels.poly6(nb.xij)).sum();
            *density = mass * sum.max(kernels.poly6_at_zero());
        });
}

/// Shepard normalization: divide each density by the kernel-weighted
/// volume sum of its neighborhood.
pub(crate) fn normalize_density(shared: &SphShared) {
    let config = shared.config();
    let kernels = Kernels::new(config.kernel_radius());
    let mass = config.particle_mass();
    let boundary_volume = mass * config.rest_density_inv();
    let with_boundary = config.density_with_boundary;

    let mut guard = shared.state.write();
    let state = &mut *guard;

    let normalized: Vec<f64> = (0..state.len())
        .into_par_iter()
        .map(|i| {
            let fluid = &state.fluid_neighbors[i];
            let info = &state.neighbor_info[i];

            let mut volume = 0.0;
            for (nb, &j) in info.iter().zip(fluid) {
                volume += mass / state.densities[j] * kernels.poly6(nb.xij);
            }
            if with_boundary {
                for nb in info.iter().skip(fluid.len()) {
                    volume += boundary_volume * kernels.poly6(nb.xij);
                }
            }

            if volume > 0.0 {
                state.densities[i] / volume
            } else {
                state.densities[i]
            }
        })
        .collect();

    state.densities = normalized;
}

/// Apply prescribed densities, then copy the final densities into every
/// particle's neighbor cache.
pub(crate) fn collect_neighbor_density(shared: &SphShared) {
    let rest_density = shared.config().rest_density;
    let flow = shared.flow.read();

    let mut guard = shared.state.write();
    let SphState {
        positions,
        kinds,
        densities,
        fluid_neighbors,
        neighbor_info,
        ..
    } = &mut *guard;

    if let Some(flow) = flow.as_ref() {
        densities
            .par_iter_mut()
            .zip(positions.par_iter())
            .zip(kinds.par_iter())
            .for_each(|((density, &x), &kind)| {
                if let Some(prescribed) = flow.prescribed_density(x, kind) {
                    *density = prescribed;
                }
            });
    }

    let densities = &*densities;
    neighbor_info
        .par_iter_mut()
        .zip(fluid_neighbors.par_iter())
        .for_each(|(info, fluid)| {
            let count = fluid.len();
            for (nb, &j) in info.iter_mut().zip(fluid) {
                nb.density = densities[j];
            }
            for nb in info.iter_mut().skip(count) {
                nb.density = rest_density;
            }
        });
}

pub(crate) fn compute_pressure_acceleration(shared: &SphShared) {
    let config = shared.config();
    let kernels = Kernels::new(config.kernel_radius());
    let mass = config.particle_mass();

    let pressure_term = |density: f64| {
        if density > 0.0 {
            config.pressure(density) / (density * density)
        } else {
            0.0
        }
    };

    let state = shared.state.read();
    let mut accels = shared.pressure.write();
    accels.resize(state.len(), DVec3::ZERO);

    accels.par_iter_mut().enumerate().for_each(|(i, accel)| {
        let fluid = &state.fluid_neighbors[i];
        let info = &state.neighbor_info[i];
        let pi = pressure_term(state.densities[i]);

        let mut sum = DVec3::ZERO;
        for (nb, &j) in info.iter().zip(fluid) {
            if j == i {
                continue;
            }
            sum -= kernels.spiky_gradient(nb.xij) * (mass * (pi + pressure_term(nb.density)));
        }

        // Boundary particles mirror the pressure and density of `i`.
        for nb in info.iter().skip(fluid.len()) {
            sum -= kernels.spiky_gradient(nb.xij) * (mass * 2.0 * pi);
        }

        *accel = sum;
    });
}

pub(crate) fn compute_viscosity(shared: &SphShared) {
    let config = shared.config();
    let h = config.kernel_radius();
    let kernels = Kernels::new(h);
    let mass = config.particle_mass();
    let epsilon = VISCOSITY_EPSILON * h * h;
    let boundary_volume = mass * config.rest_density_inv();

    let state = shared.state.read();
    let mut accels = shared.viscosity.write();
    accels.resize(state.len(), DVec3::ZERO);

    accels.par_iter_mut().enumerate().for_each(|(i, accel)| {
        let fluid = &state.fluid_neighbors[i];
        let info = &state.neighbor_info[i];
        let vi = state.velocities[i];

        let mut sum = DVec3::ZERO;
        for (nb, &j) in info.iter().zip(fluid) {
            if j == i || nb.density <= 0.0 {
                continue;
            }
            let vij = vi - state.velocities[j];
            let weight = mass / nb.density * vij.dot(nb.xij) / (nb.distance * nb.distance + epsilon);
            sum += kernels.spiky_gradient(nb.xij) * (config.dynamic_viscosity * weight);
        }

        // Boundary particles are at rest.
        for nb in info.iter().skip(fluid.len()) {
            let weight = boundary_volume * vi.dot(nb.xij) / (nb.distance * nb.distance + epsilon);
            sum += kernels.spiky_gradient(nb.xij) * (config.boundary_viscosity * weight);
        }

        *accel = sum * VISCOSITY_FACTOR;
    });
}

/// Akinci et al. 2013: cohesion and curvature between fluid particles,
/// adhesion towards boundary particles.
pub(crate) fn compute_surface_tension(shared: &SphShared) {
    let config = shared.config();
    let h = config.kernel_radius();
    let kernels = Kernels::new(h);
    let mass = config.particle_mass();
    let gamma = config.surface_tension_stiffness;
    let beta = config.boundary_friction;
    let rest_density = config.rest_density;

    let state = shared.state.read();
    let mut buffers = shared.surface_tension.write();
    let buffers = &mut *buffers;

    buffers.normals.resize(state.len(), DVec3::ZERO);
    buffers.normals.par_iter_mut().enumerate().for_each(|(i, normal)| {
        let fluid = &state.fluid_neighbors[i];
        let info = &state.neighbor_info[i];

        let mut sum = DVec3::ZERO;
        for (nb, &j) in info.iter().zip(fluid) {
            if j == i || nb.density <= 0.0 {
                continue;
            }
            sum += kernels.spiky_gradient(nb.xij) * (mass / nb.density);
        }
        *normal = sum * h;
    });

    let normals = &buffers.normals;
    buffers.accels.resize(state.len(), DVec3::ZERO);
    buffers.accels.par_iter_mut().enumerate().for_each(|(i, accel)| {
        let fluid = &state.fluid_neighbors[i];
        let info = &state.neighbor_info[i];
        let rho_i = state.densities[i];
        let ni = normals[i];

        let mut sum = DVec3::ZERO;
        for (nb, &j) in info.iter().zip(fluid) {
            if j == i || nb.distance <= f64::EPSILON || rho_i + nb.density <= 0.0 {
                continue;
            }
            let correction = 2.0 * rest_density / (rho_i + nb.density);
            let direction = nb.xij / nb.distance;
            let cohesion = direction * (-gamma * mass * kernels.cohesion(nb.distance));
            let curvature = (ni - normals[j]) * -gamma;
            sum += (cohesion + curvature) * correction;
        }

        for nb in info.iter().skip(fluid.len()) {
            if nb.distance <= f64::EPSILON {
                continue;
            }
            let direction = nb.xij / nb.distance;
            sum -= direction * (beta * mass * kernels.adhesion(nb.distance));
        }

        *accel = sum;
    });
}

pub(crate) fn sum_accelerations(shared: &SphShared) {
    let gravity = shared.config().gravity;

    let mut guard = shared.state.write();
    let state = &mut *guard;

    let pressure = shared.pressure.read();
    let viscosity = shared.viscosity.read();
    let surface_tension = shared.surface_tension.read();
    let (pressure, viscosity, tension): (&[DVec3], &[DVec3], &[DVec3]) =
        (&pressure, &viscosity, &surface_tension.accels);

    let at = |buffer: &[DVec3], i: usize| buffer.get(i).copied().unwrap_or_default();

    let kinds = &state.kinds;
    state
        .accelerations
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, accel)| {
            *accel = match kinds[i] {
                ParticleKind::Wall => DVec3::ZERO,
                _ => {
                    gravity + at(pressure, i) + at(viscosity, i) + at(tension, i)
                }
            };
        });

    if surface_tension.normals.len() == state.normals.len() {
        state.normals.copy_from_slice(&surface_tension.normals);
    }
}

pub(crate) fn compute_timestep(shared: &SphShared) {
    let stepping = shared.clock.lock().stepping;

    let dt = match stepping {
        TimeStepping::Fixed => shared.clock.lock().default_dt,
        TimeStepping::Adaptive => {
            let max_speed = shared.state.read().max_speed();
            shared.config().cfl_timestep(max_speed)
        }
    };

    shared.clock.lock().dt = dt;
}

/// Leapfrog kick. The half-step velocity carries the integration; the
/// full-step velocity is the one collision response and the next step see.
pub(crate) fn integrate(shared: &SphShared) {
    let (dt, first) = {
        let clock = shared.clock.lock();
        (clock.dt, !clock.started)
    };
    let flow = shared.flow.read();
    let flow = flow.as_ref();

    let mut guard = shared.state.write();
    let SphState {
        positions,
        kinds,
        accelerations,
        velocities,
        half_step_velocities,
        full_step_velocities,
        ..
    } = &mut *guard;
    let (positions, kinds, accelerations) = (&*positions, &*kinds, &*accelerations);

    velocities
        .par_iter_mut()
        .zip(half_step_velocities.par_iter_mut())
        .zip(full_step_velocities.par_iter_mut())
        .enumerate()
        .for_each(|(i, ((v, half), full))| {
            let kind = kinds[i];
            if kind == ParticleKind::Wall {
                *v = DVec3::ZERO;
                *half = DVec3::ZERO;
                *full = DVec3::ZERO;
                return;
            }

            if let Some(prescribed) = flow.and_then(|f| f.prescribed_velocity(positions[i], kind)) {
                *v = prescribed;
                *half = prescribed;
                *full = prescribed;
                return;
            }

            let a = accelerations[i];
            if first {
                *half = *v + a * (0.5 * dt);
            } else {
                *half += a * dt;
            }
            *full = *half + a * (0.5 * dt);
            *v = *full;
        });
}

/// Drift, then the flow boundary policy.
pub(crate) fn move_particles(shared: &SphShared) {
    let dt = shared.clock.lock().dt;
    let flow = shared.flow.read();
    let flow = flow.as_ref();

    {
        let mut guard = shared.state.write();
        let SphState {
            positions,
            kinds,
            half_step_velocities,
            ..
        } = &mut *guard;

        positions
            .par_iter_mut()
            .zip(kinds.par_iter_mut())
            .zip(half_step_velocities.par_iter())
            .for_each(|((x, kind), v)| {
                if *kind == ParticleKind::Wall {
                    return;
                }
                *x += *v * dt;
                if let Some(flow) = flow {
                    flow.apply(x, kind);
                }
            });
    }

    let mut clock = shared.clock.lock();
    clock.total_time += dt;
    clock.step_count += 1;
    clock.started = true;
}
