use thiserror::Error;

/// Errors raised while constructing or validating a task graph.
///
/// All of these are configuration errors: a graph that produces one of them
/// cannot be executed, so they surface when the graph is built or validated,
/// never in the middle of a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node {0} is not part of graph '{1}'")]
    MissingNode(u64, String),

    #[error("Node '{0}' is already part of graph '{1}'")]
    DuplicateNode(String, String),

    #[error("Cycle detected in graph '{graph}' at node '{node}'")]
    Cycle { graph: String, node: String },

    #[error("Node '{node}' in graph '{graph}' does not lie on a path from source to sink")]
    DanglingNode { graph: String, node: String },
}

/// Errors raised while executing a frame.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Task '{name}':\n{source}")]
    Task {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to build worker pool:\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Invalid or inconsistent model parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Particle radius must be positive, got {0}")]
    ParticleRadius(f64),

    #[error("Particle radius for this scene must be {expected}, got {actual}")]
    ParticleRadiusMismatch { expected: f64, actual: f64 },

    #[error("Parameter '{0}' must be positive, got {1}")]
    NotPositive(&'static str, f64),

    #[error("Minimum timestep {min} exceeds maximum timestep {max}")]
    TimestepBounds { min: f64, max: f64 },

    #[error("Expected {expected} initial velocities, got {actual}")]
    VelocityCount { expected: usize, actual: usize },

    #[error("Model has no particles")]
    NoParticles,

    #[error("Flow boundary is inconsistent: {0}")]
    FlowBoundary(&'static str),

    #[error("Invalid signed distance field: {0}")]
    FieldShape(&'static str),
}

/// Errors raised by the composition layer.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Error while advancing scene '{0}':\n{1}")]
    Exec(String, ExecError),

    #[error("Object {0} not found in scene")]
    ObjectNotFound(usize),

    #[error("Interaction '{0}' requires {1}")]
    WrongObjectKind(String, &'static str),

    #[error(transparent)]
    Other(anyhow::Error),
}
