//! Runs the join and reduction stages of the movie analytics pipeline in one process.
//!
//! Reads the movies, reviews and credits of one client from JSON files, streams them through the
//! sharded joiners and prints the answers to queries 3 and 4.

use std::path::PathBuf;

use clap::Parser;
use reel_telemetry::metrics::init_metrics;
use reel_telemetry::tracing::init_tracing;
use tracing::info;

use crate::config::load_worker_config;
use crate::core::{ClientInput, run_local_topology};

mod config;
mod core;

#[derive(Parser, Debug)]
#[command(name = "reel-worker", about = "Runs the reel join and reduction stages locally")]
struct Args {
    /// JSON array of movies.
    #[arg(long)]
    movies: PathBuf,

    /// JSON array of reviews.
    #[arg(long)]
    reviews: PathBuf,

    /// JSON array of credits.
    #[arg(long)]
    credits: PathBuf,

    /// Client id attached to every batch, random when omitted.
    #[arg(long)]
    client_id: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_worker_config()?;

    init_tracing(env!("CARGO_BIN_NAME"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        // The exporter spawns its listener on the current runtime.
        if let Some(port) = config.metrics_port {
            init_metrics(port, env!("CARGO_BIN_NAME"))?;
            info!(port, "metrics endpoint started");
        }
        reel::metrics::register_metrics();

        let input = ClientInput::read(&args.movies, &args.reviews, &args.credits, args.client_id)?;
        run_local_topology(config, input).await
    })
}
