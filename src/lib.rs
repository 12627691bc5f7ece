#![forbid(unsafe_code)]
//! A per-frame task-graph scheduler with an SPH fluid solver and an
//! implicit-geometry collision pipeline plugged into it.
//!
//! Models and interactions build their own [`TaskGraph`]s and expose them
//! through [`GraphEdges::init_graph_edges`]. A [`Scene`] nests those graphs
//! into one master graph and hands it to a [`TaskGraphController`], which
//! runs it once per frame on a rayon pool.
//!
//! ```no_run
//! use glam::DVec3;
//! use mizuchi::{CollidingObject, CollisionOptions, ImplicitGeometry, Scene, SceneConfig};
//! use mizuchi::{SphModel, SphModelConfig, SphObject};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut model = SphModel::new("Water", SphModelConfig::new(0.1))?;
//! model.initialize(vec![DVec3::new(0.0, 0.5, 0.0), DVec3::new(0.2, 0.5, 0.0)])?;
//!
//! let mut scene = Scene::new("Drop", SceneConfig::default());
//! let water = scene.add_object(SphObject::new("Water", model)).unwrap();
//! let floor = scene
//!     .add_object(CollidingObject::new("Floor", ImplicitGeometry::plane(DVec3::ZERO, DVec3::Y)))
//!     .unwrap();
//! scene.add_sph_collision(water, floor, CollisionOptions::default())?;
//!
//! scene.initialize()?;
//! scene.run(100)?;
//! println!("{}", scene.timings().render());
//! # Ok(())
//! # }
//! ```

pub mod collision;
pub mod engine;
mod error;
pub mod geometry;
mod ids;
pub mod neighbor;
pub mod scene;
pub mod sph;
mod utils;

pub use crate::collision::{CollisionEvent, CollisionInteraction};
pub use crate::engine::{ExecutionMode, GraphEdges, NodeId, TaskGraph, TaskGraphController, TaskNode};
pub use crate::error::*;
pub use crate::geometry::{ImplicitGeometry, PointSet, SignedDistanceField};
pub use crate::ids::UniqueIdService;
pub use crate::neighbor::{NeighborSearch, NeighborSearchMethod};
pub use crate::scene::{CollidingObject, CollisionOptions, ObjectId, Scene, SceneConfig, SceneObject, SphObject};
pub use crate::sph::{SphModel, SphModelConfig, SphParameters, TimeStepping};

/// Install a global subscriber: `RUST_LOG`-style filtering (default
/// `info`), formatted output and progress bars for long runs.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}
