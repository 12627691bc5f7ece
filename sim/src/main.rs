mod scenes;

use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use mizuchi::{CollisionEvent, CollisionOptions, SceneConfig, SphModelConfig};
use serde::Deserialize;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Preset {
    /// Water dropped onto a sphere.
    Sphere,
    /// Water dropped onto a box.
    Box,
    /// Water poured into a bowl given as a distance field.
    Sdf,
    /// Channel flow with a recycling inlet and outlet.
    Pipe,
}

#[derive(Parser, Debug, Clone)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "sphere")]
    scene: Preset,

    /// Number of frames to simulate.
    #[clap(short, long, default_value_t = 200)]
    frames: u64,

    /// JSON file overriding the scene, fluid and collision settings.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Write the final particle state of the first fluid as CSV.
    #[clap(long)]
    csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub scene: SceneConfig,
    pub fluid: SphModelConfig,
    pub collision: CollisionOptions,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };

    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    mizuchi::init_logging()?;
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut scene = match args.scene {
        Preset::Sphere => scenes::sphere(&config)?,
        Preset::Box => scenes::cuboid(&config)?,
        Preset::Sdf => scenes::sdf(&config)?,
        Preset::Pipe => scenes::pipe(&config)?,
    };

    scene.initialize()?;
    scene.run(args.frames)?;

    for event in scene.drain_events() {
        match event {
            CollisionEvent::Entered { interaction, contacts } => {
                tracing::info!(%interaction, contacts, "contact started")
            }
            CollisionEvent::Exited { interaction } => tracing::info!(%interaction, "contact ended"),
        }
    }

    println!("{}", scene.timings().render());

    if let Some(path) = args.csv {
        let fluid = scene
            .objects()
            .find_map(|(id, _)| scene.fluid(id))
            .context("Scene has no fluid")?;
        let file = fs::File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        fluid.model().write_state_csv(BufWriter::new(file))?;
        tracing::info!(path = %path.display(), "state written");
    }

    Ok(())
}
