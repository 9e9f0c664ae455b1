//! camrig CLI entry point.
//!
//! ```bash
//! # Validate a rig configuration and list declared controls
//! camrig check --config rig.toml
//!
//! # Arm the rig and wait for a remote trigger
//! camrig run --config rig.toml
//!
//! # Arm, enable saving and trigger immediately, record for 30 s
//! camrig run --config rig.toml --trigger --duration 30
//! ```
//!
//! This binary is the composition root: driver factories are registered
//! here, explicitly. Vendor SDK drivers plug in as additional factory
//! registrations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cam_core::config::{RigConfig, SyncChannelConfig};
use cam_core::source::SourceRegistry;
use cam_core::sync::LineSampler;
use cam_driver_mock::{SimCameraFactory, SimLineSampler, SimMode};
use cam_server::orchestrator::Orchestrator;
use cam_server::remote;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "camrig")]
#[command(about = "Multi-camera acquisition rig", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm the rig, serve remote control and record until stopped
    Run {
        /// Path to the rig configuration file
        #[arg(long, default_value = "rig.toml")]
        config: PathBuf,

        /// Enable saving and trigger immediately instead of waiting for a
        /// remote trigger
        #[arg(long)]
        trigger: bool,

        /// Exit after this many seconds (default: run until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Validate a configuration file and list cameras and their controls
    Check {
        #[arg(long, default_value = "rig.toml")]
        config: PathBuf,
    },
}

/// Composition root: every available driver factory, registered once.
fn default_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(SimCameraFactory));
    registry
}

fn build_sampler(cfg: &SyncChannelConfig) -> Box<dyn LineSampler> {
    Box::new(
        SimLineSampler::builder(&cfg.id)
            .sample_rate_hz(cfg.sample_rate_hz)
            .channels(cfg.channels.clone())
            .mode(SimMode::Realistic)
            .build(),
    )
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            trigger,
            duration,
        } => run(config, trigger, duration).await,
        Commands::Check { config } => check(config),
    }
}

async fn run(config: PathBuf, trigger: bool, duration: Option<u64>) -> Result<()> {
    let cfg = RigConfig::load(&config)
        .with_context(|| format!("failed to load configuration from {config:?}"))?;
    init_tracing(&cfg.application.log_level);

    let registry = default_registry();
    let sampler = cfg.sync.as_ref().map(build_sampler);
    let orchestrator = Arc::new(Orchestrator::start(&cfg, &registry, sampler)?);

    orchestrator.wait_ready(Duration::from_secs(10)).await?;
    tracing::info!("all cameras ready");

    if cfg.remote.enabled {
        let listener = tokio::net::TcpListener::bind(&cfg.remote.bind_addr)
            .await
            .with_context(|| format!("failed to bind remote endpoint {}", cfg.remote.bind_addr))?;
        tracing::info!(addr = %cfg.remote.bind_addr, "remote control listening");
        let remote_orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if let Err(e) = remote::serve(listener, remote_orchestrator).await {
                tracing::error!(error = %e, "remote endpoint failed");
            }
        });
    }

    if trigger {
        orchestrator.set_saving_all(true).await;
        orchestrator.trigger_all().await;
    }

    match duration {
        Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            tracing::info!("shutdown requested");
        }
    }

    orchestrator.close().await?;
    Ok(())
}

fn check(config: PathBuf) -> Result<()> {
    let cfg = RigConfig::load(&config)
        .with_context(|| format!("failed to load configuration from {config:?}"))?;
    let registry = default_registry();

    println!("configuration: {}", config.display());
    println!("data dir: {}", cfg.storage.data_dir.display());
    println!("experiment: {}", cfg.storage.experiment);

    for camera in &cfg.cameras {
        registry
            .validate(&camera.driver, &camera.config)
            .with_context(|| format!("camera '{}'", camera.id))?;
        let source = registry.build(&camera.driver, &camera.id, camera.config.clone())?;
        println!(
            "camera '{}': driver={} trigger={:?} frames_per_file={} format={}{}",
            camera.id,
            camera.driver,
            camera.trigger,
            camera.frames_per_file,
            camera.format,
            if camera.enabled { "" } else { " (disabled)" },
        );
        for spec in source.control_specs() {
            let bounds = match (spec.min, spec.max) {
                (Some(min), Some(max)) => format!(" [{min}, {max}]"),
                _ => String::new(),
            };
            println!("  control {} ({}){}", spec.name, spec.kind, bounds);
        }
    }
    if let Some(sync) = &cfg.sync {
        println!(
            "sync '{}': {} Hz, channels {:?}{}",
            sync.id,
            sync.sample_rate_hz,
            sync.channels,
            if sync.enabled { "" } else { " (disabled)" },
        );
    }
    println!("ok");
    Ok(())
}
