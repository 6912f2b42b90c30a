//! Manylla CLI
//!
//! Enable, join and inspect encrypted sync from a terminal.

use clap::Parser;
use tracing::info;

use manylla_cli::cli::{Cli, Command};
use manylla_cli::context::Context;
use manylla_cli::{share_cmd, sync_cmd};
use manylla_core::tracing_init::init_tracing;

const DEFAULT_LOG_FILTER: &str = "manylla_sync=info,manylla_cli=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctx = Context::load(&cli)?;

    let filter = ctx
        .config
        .log_level
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    init_tracing(&filter, cli.log_json, std::io::stderr);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting manylla CLI");

    match cli.command {
        Command::Enable { snapshot } => sync_cmd::enable(&ctx, snapshot.as_deref()).await,
        Command::Join { input, out } => sync_cmd::join(&ctx, &input, out.as_deref()).await,
        Command::Push { file } => sync_cmd::push(&ctx, &file).await,
        Command::Pull { out } => sync_cmd::pull(&ctx, out.as_deref()).await,
        Command::Status => sync_cmd::status(&ctx).await,
        Command::Invite => sync_cmd::invite(&ctx).await,
        Command::Share(args) => share_cmd::share(&ctx, args).await,
        Command::OpenShare { url, data } => share_cmd::open(&url, &data, &mut std::io::stdout()),
        Command::Watch { interval, out } => sync_cmd::watch(&ctx, interval, out).await,
        Command::Disable { yes } => sync_cmd::disable(&ctx, yes).await,
    }
}
