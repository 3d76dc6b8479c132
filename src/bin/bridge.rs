//! pose-retarget-bridge binary
//!
//! Connects to the tracker channel, runs the retarget pipeline and logs the
//! resulting bone writes. Useful for checking a tracker without a host rig.
//!
//! ## Configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults.
//! 2. TOML file given by `--config` / `POSE_CONFIG`, with `[pipeline]` and
//!    `[retarget]` tables.
//! 3. Environment, `POSE_<TABLE>__<KEY>`, e.g. `POSE_PIPELINE__TICK_INTERVAL_MS=8`.
//! 4. The CLI flags below.
//!
//! | Flag                  | Overrides                      |
//! |-----------------------|--------------------------------|
//! | `--pipe-name`         | `pipeline.pipe_name`           |
//! | `--tick-interval-ms`  | `pipeline.tick_interval_ms`    |
//! | `--scale`             | `retarget.scale`               |
//! | `--hands-only`        | `retarget.mode = "hands_only"` |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pose_retarget::{
    BoneFrame, FrameDecoder, NamedPipe, Pipeline, PipelineConfig, RetargetConfig, RetargetMode,
    Retargeter, SkeletonHost,
};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "pose-retarget-bridge", about = "Tracker pose retarget bridge", version)]
struct Args {
    /// TOML settings file
    #[arg(long, env = "POSE_CONFIG")]
    config: Option<PathBuf>,

    /// Tracker channel name
    #[arg(long)]
    pipe_name: Option<String>,

    /// Consumer tick interval (ms)
    #[arg(long)]
    tick_interval_ms: Option<u64>,

    /// Skeleton units per tracking meter
    #[arg(long)]
    scale: Option<f32>,

    /// Leave the head to an external tracker
    #[arg(long)]
    hands_only: bool,

    /// Seconds between stats lines
    #[arg(long, env = "POSE_STATS_INTERVAL_SECS", default_value_t = 5)]
    stats_interval_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    pipeline: PipelineConfig,
    #[serde(default)]
    retarget: RetargetConfig,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(name) = &self.pipe_name {
            settings.pipeline.pipe_name = name.clone();
        }
        if let Some(ms) = self.tick_interval_ms {
            settings.pipeline.tick_interval_ms = ms;
        }
        if let Some(scale) = self.scale {
            settings.retarget.scale = scale;
        }
        if self.hands_only {
            settings.retarget.mode = RetargetMode::HandsOnly;
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("POSE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .context("reading settings")?
        .try_deserialize()
        .context("parsing settings")
}

// ---------------------------------------------------------------------------
// Logging host
// ---------------------------------------------------------------------------

/// Stand-in rig that accepts every bone and logs commits at trace level.
#[derive(Debug, Default)]
struct LoggingHost {
    bones: Vec<String>,
    commits: u64,
}

impl SkeletonHost for LoggingHost {
    type Handle = usize;

    fn find_bone(&mut self, name: &str) -> Option<usize> {
        log::debug!("binding bone '{}'", name);
        self.bones.push(name.to_string());
        Some(self.bones.len() - 1)
    }

    fn commit_bone_transform(&mut self, handle: usize, frame: &BoneFrame) {
        self.commits += 1;
        let name = self.bones.get(handle).map(String::as_str).unwrap_or("?");
        log::trace!(
            "{}: pos=({:.1}, {:.1}, {:.1}) rot=({:.3}, {:.3}, {:.3}, {:.3})",
            name,
            frame.position.x,
            frame.position.y,
            frame.position.z,
            frame.rotation.w,
            frame.rotation.x,
            frame.rotation.y,
            frame.rotation.z,
        );
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pose_retarget=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings(args.config.as_ref())?;
    args.apply(&mut settings);
    settings.pipeline.validate()?;

    log::info!(
        "Starting pose-retarget-bridge (pipe='{}', tick={}ms, scale={}, mode={:?})",
        settings.pipeline.pipe_name,
        settings.pipeline.tick_interval_ms,
        settings.retarget.scale,
        settings.retarget.mode,
    );

    let decoder = FrameDecoder::new(
        NamedPipe::new(settings.pipeline.pipe_name.clone()),
        &settings.pipeline,
    );
    let retargeter = Retargeter::new(settings.retarget)?;
    let pipeline = Pipeline::spawn(settings.pipeline, decoder, retargeter, LoggingHost::default())?;

    let mut stats_timer = tokio::time::interval(Duration::from_secs(args.stats_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = stats_timer.tick() => {
                match serde_json::to_string(&pipeline.stats()) {
                    Ok(json) => log::info!("stats {}", json),
                    Err(e) => log::warn!("Failed to serialise stats: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("pose-retarget-bridge shutting down (SIGINT)");
                break;
            }
        }
    }

    // Joining waits out the consumer's current tick.
    let outcome = tokio::task::spawn_blocking(move || pipeline.shutdown()).await??;
    log::info!(
        "Final: {} frames, {} productive ticks, {} host commits",
        outcome.stats.frames_decoded,
        outcome.retargeter.tick_count(),
        outcome.host.commits,
    );
    Ok(())
}
