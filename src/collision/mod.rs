//! Collision detection and response.
//!
//! A [`CollisionInteraction`] pairs a [`CollisionDetection`] pass that fills
//! a shared [`CollisionData`] with [`CollisionHandling`] responses that read
//! it. The interaction exposes this as a small task graph so the scene can
//! splice it between the models it couples.

mod data;
mod detection;
mod handling;
mod interaction;

pub use crate::collision::data::{CollisionData, CollisionElement};
pub use crate::collision::detection::{CollisionDetection, PointSource};
pub use crate::collision::handling::{
    BodyState, CollisionHandling, DEFAULT_PENALTY_DAMPING, DEFAULT_PENALTY_STIFFNESS, DEFAULT_SPH_FRICTION,
};
pub use crate::collision::interaction::{CollisionEvent, CollisionInteraction};
