//! Static strategy pattern for CLI commands.
//!
//! Each subcommand is a separate strategy type with its own input type, so
//! dispatch is resolved at compile time.

use npubdir_config::Config;
use npubdir_core::retry::retry_with_backoff;
use npubdir_core::{ChatRef, ChatScope, RemoteSyncer, ThreadRef};
use npubdir_providers::GitHubContentsStore;
use npubdir_store::DirectoryDb;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

mod init;
mod publish;
mod render;
mod run;
mod version;

pub use init::InitStrategy;
pub use publish::PublishStrategy;
pub use render::RenderStrategy;
pub use run::{RunInput, RunStrategy};
pub use version::VersionStrategy;

/// Core trait defining the contract for all command strategies.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(
        "Loaded config for chat {} (publish {})",
        config.telegram.chat_id,
        if config.publish.enabled { "enabled" } else { "disabled" }
    );
    Ok(config)
}

/// Open the database, retrying with the configured backoff.
async fn open_store(config: &Config) -> anyhow::Result<Arc<DirectoryDb>> {
    let url = config.database.url.as_str();
    let db = retry_with_backoff(
        "Connect to database",
        &config.retry,
        |_: &anyhow::Error| true,
        || DirectoryDb::connect(url),
    )
    .await?;
    Ok(Arc::new(db))
}

fn remote_syncer(config: &Config) -> anyhow::Result<RemoteSyncer> {
    let publish = &config.publish;
    if !publish.enabled {
        info!("Remote publication disabled");
        return Ok(RemoteSyncer::disabled());
    }
    let store = GitHubContentsStore::new(
        publish.token.clone(),
        publish.repo.clone(),
        publish.path.clone(),
        publish.branch.clone(),
    )?;
    Ok(RemoteSyncer::new(
        Arc::new(store),
        publish.retry_policy(&config.retry),
    ))
}

const fn scope(config: &Config) -> ChatScope {
    ChatScope {
        chat: ChatRef(config.telegram.chat_id),
        thread: match config.telegram.thread_id {
            Some(id) => Some(ThreadRef(id)),
            None => None,
        },
    }
}
