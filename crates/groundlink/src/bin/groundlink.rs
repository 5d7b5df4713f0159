//! # groundlink
//!
//! Ground-station daemon: scores the video downlink from radio statistics
//! and sends control datagrams to the air-side controller.
//!
//! ## Usage
//!
//! ```bash
//! # Default config path, info logging
//! groundlink
//!
//! # Custom config, per-message debug output
//! groundlink --config /etc/groundlink.toml --verbose
//! ```
//!
//! The config file is created with defaults if it does not exist.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use groundlink::config;
use groundlink::emitter::UdpEmitter;
use groundlink::ingest::{FixedBackoff, Ingester};

/// FPV ground-station link scorer.
#[derive(Parser, Debug)]
#[command(name = "groundlink", about = "FPV ground-station link scorer")]
struct Cli {
    /// Log every scored message and send failures.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Path to the TOML parameter file.
    #[arg(short, long, default_value = "groundlink.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Logging ─────────────────────────────────────────────────
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    // ── Parameters ──────────────────────────────────────────────
    let params = config::load_or_init(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let params = Arc::new(params);

    tracing::info!(
        config = %cli.config.display(),
        stats_source = %params.stats_source,
        udp_target = %params.udp_target,
        allow_idr = params.keyframe.allow_idr,
        allow_penalty = params.refinement.allow_penalty,
        allow_fec_increase = params.refinement.allow_fec_increase,
        "groundlink starting"
    );

    // ── Output ──────────────────────────────────────────────────
    let emitter = UdpEmitter::new(&params.udp_target)
        .with_context(|| format!("setting up control target {}", params.udp_target))?;

    // ── Ingest loop ─────────────────────────────────────────────
    let mut ingester = Ingester::new(params, emitter, FixedBackoff::default());

    let shutdown = ingester.shutdown_handle();
    ctrlc::set_handler(move || {
        tracing::info!("shutting down...");
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("installing signal handler")?;

    ingester.run();

    tracing::info!("groundlink stopped");
    Ok(())
}
