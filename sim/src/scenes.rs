use glam::{DVec3, UVec3};
use mizuchi::sph::{FlowBoundary, InletOutlet, TimeStepping};
use mizuchi::{
    CollidingObject, CollisionOptions, ImplicitGeometry, Scene, SignedDistanceField, SphModel, SphModelConfig,
    SphObject,
};

use crate::SimConfig;

/// Particles on a regular lattice filling the box `[min, min + extent)`.
pub fn block(min: DVec3, extent: DVec3, spacing: f64) -> Vec<DVec3> {
    let counts = (extent / spacing).floor().as_uvec3();
    let mut points = Vec::with_capacity((counts.x * counts.y * counts.z) as usize);
    for z in 0..counts.z {
        for y in 0..counts.y {
            for x in 0..counts.x {
                points.push(min + UVec3::new(x, y, z).as_dvec3() * spacing);
            }
        }
    }
    points
}

fn fluid(name: &str, config: &SimConfig, positions: Vec<DVec3>) -> anyhow::Result<SphObject> {
    let mut model = SphModel::new(format!("{name}Model"), config.fluid.clone())?;
    model.initialize(positions)?;
    Ok(SphObject::new(name, model))
}

fn spacing(config: &SphModelConfig) -> f64 {
    2.0 * config.particle_radius
}

fn floor() -> CollidingObject {
    CollidingObject::new("Floor", ImplicitGeometry::plane(DVec3::ZERO, DVec3::Y))
}

/// Couple `fluid` with every obstacle in `obstacles`.
fn collide(scene: &mut Scene, fluid: SphObject, obstacles: Vec<CollidingObject>, options: &CollisionOptions) -> anyhow::Result<()> {
    let fluid = scene
        .add_object(fluid)
        .ok_or_else(|| anyhow::anyhow!("duplicate fluid"))?;

    for obstacle in obstacles {
        let name = obstacle.name().to_string();
        let obstacle = scene
            .add_object(obstacle)
            .ok_or_else(|| anyhow::anyhow!("duplicate obstacle '{name}'"))?;
        scene.add_sph_collision(fluid, obstacle, options.clone())?;
    }
    Ok(())
}

/// A block of water dropped onto a sphere resting on the floor.
pub fn sphere(config: &SimConfig) -> anyhow::Result<Scene> {
    let d = spacing(&config.fluid);
    let water = fluid(
        "Water",
        config,
        block(DVec3::new(-0.6, 1.0, -0.6), DVec3::splat(1.2), d),
    )?;
    let ball = CollidingObject::new(
        "Sphere",
        ImplicitGeometry::Sphere {
            center: DVec3::new(0.0, 0.4, 0.0),
            radius: 0.4,
        },
    );

    let mut scene = Scene::new("SphereDrop", config.scene.clone());
    collide(&mut scene, water, vec![ball, floor()], &config.collision)?;
    Ok(scene)
}

/// Water poured onto a box.
pub fn cuboid(config: &SimConfig) -> anyhow::Result<Scene> {
    let d = spacing(&config.fluid);
    let water = fluid(
        "Water",
        config,
        block(DVec3::new(-0.4, 0.8, -0.4), DVec3::new(0.8, 1.0, 0.8), d),
    )?;
    let cuboid = CollidingObject::new(
        "Box",
        ImplicitGeometry::Cuboid {
            center: DVec3::new(0.0, 0.25, 0.0),
            half_extents: DVec3::new(0.5, 0.25, 0.5),
        },
    );

    let mut scene = Scene::new("BoxDrop", config.scene.clone());
    collide(&mut scene, water, vec![cuboid, floor()], &config.collision)?;
    Ok(scene)
}

/// Water poured into a bowl given as a sampled distance field.
pub fn sdf(config: &SimConfig) -> anyhow::Result<Scene> {
    let d = spacing(&config.fluid);
    let water = fluid(
        "Water",
        config,
        block(DVec3::new(-0.4, 0.6, -0.4), DVec3::splat(0.8), d),
    )?;

    // Thick shell: inside the outer sphere, outside the inner one, below y = 0.6.
    let field = SignedDistanceField::from_fn(DVec3::splat(-1.5), DVec3::splat(0.05), UVec3::splat(61), |p| {
        let r = p.length();
        let shell = (r - 1.2).max(1.0 - r);
        shell.max(p.y - 0.6)
    })?;
    let bowl = CollidingObject::new("Bowl", ImplicitGeometry::SignedDistanceField(field));

    let mut scene = Scene::new("Bowl", config.scene.clone());
    collide(&mut scene, water, vec![bowl], &config.collision)?;
    Ok(scene)
}

/// Flow through a square channel with a recycling inlet and outlet.
pub fn pipe(config: &SimConfig) -> anyhow::Result<Scene> {
    let d = spacing(&config.fluid);
    let (length, half_width) = (4.0, 0.4);

    let mut model_config = config.fluid.clone();
    model_config.gravity = DVec3::ZERO;

    let positions = block(
        DVec3::new(0.0, -half_width + 0.5 * d, -half_width + 0.5 * d),
        DVec3::new(length, 2.0 * half_width, 2.0 * half_width),
        d,
    );
    let inlet_x = 4.0 * d;
    let buffer: Vec<usize> = positions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.x < inlet_x)
        .map(|(i, _)| i)
        .collect();

    let mut model = SphModel::new("PipeModel", model_config)?;
    model.initialize(positions)?;
    model.set_time_stepping(TimeStepping::Adaptive);
    model.set_buffer_particles(&buffer);
    model.set_boundary_particles(channel_walls(length, half_width, d));
    model.set_flow_boundary(Some(FlowBoundary::InletOutlet(InletOutlet {
        buffer_x: 0.0,
        inlet_x,
        outlet_region_x: length - 4.0 * d,
        outlet_x: length,
        inlet_center: DVec3::ZERO,
        inlet_radius: half_width,
        inlet_velocity: DVec3::new(1.0, 0.0, 0.0),
        inlet_density: config.fluid.rest_density,
        outlet_density: config.fluid.rest_density,
    })))?;

    let mut scene = Scene::new("Pipe", config.scene.clone());
    scene
        .add_object(SphObject::new("Water", model))
        .ok_or_else(|| anyhow::anyhow!("duplicate fluid"))?;
    Ok(scene)
}

/// Two layers of boundary particles around the channel.
fn channel_walls(length: f64, half_width: f64, d: f64) -> Vec<DVec3> {
    let mut walls = Vec::new();
    let steps = (length / d).ceil() as i32;
    let across = (2.0 * half_width / d).round() as i32 + 4;

    for layer in 0..2 {
        let offset = half_width + (layer as f64 + 0.5) * d;
        for i in -2..steps + 2 {
            let x = i as f64 * d;
            for j in 0..across {
                let t = -half_width - 1.5 * d + j as f64 * d;
                walls.extend([
                    DVec3::new(x, offset, t),
                    DVec3::new(x, -offset, t),
                    DVec3::new(x, t, offset),
                    DVec3::new(x, t, -offset),
                ]);
            }
        }
    }
    walls
}
