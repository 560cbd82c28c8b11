#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

mod command;

use clap::{Parser, Subcommand};
use command::{
    CommandStrategy, InitStrategy, PublishStrategy, RenderStrategy, RunInput, RunStrategy,
    VersionStrategy,
};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "npubdir")]
#[command(about = "Telegram directory of Nostr public keys", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/npubdir/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot
    Run {
        /// Bot token (overrides config)
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Initialize configuration
    Init,
    /// Show version
    Version,
    /// Print the directory chunks as they would be pinned
    Render,
    /// Publish the consented profiles to the remote store once
    Publish,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Run { token } => RunStrategy.execute(RunInput { config, token }).await,
        Commands::Init => InitStrategy.execute(config).await,
        Commands::Version => VersionStrategy.execute(()).await,
        Commands::Render => RenderStrategy.execute(config).await,
        Commands::Publish => PublishStrategy.execute(config).await,
    }
}
