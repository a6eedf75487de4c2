pub mod utils;

pub mod auth;
pub mod cli;
pub mod client;
pub mod clock;
mod commands;
pub mod config;
pub mod cycle;
pub mod db;
pub mod local;
pub mod protocol;
pub mod server;
pub mod tasks;
pub mod timer;

use anyhow::Context;
use clap::Parser;

pub fn run() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    // Initialize logging (reads RUST_LOG and THE_LOOP_DEBUG)
    utils::logging::init(args.verbose);

    log::debug!("The Loop {} starting up", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(commands::dispatch(args))
}
