use npubdir_core::{ProfileStore, PublishOutcome};
use std::path::PathBuf;
use tracing::info;

use super::{load_config, open_store, remote_syncer};

/// Strategy for a one-shot publication of the consented profiles.
#[derive(Debug, Clone, Copy)]
pub struct PublishStrategy;

impl super::CommandStrategy for PublishStrategy {
    /// Optional config path.
    type Input = Option<PathBuf>;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = load_config(input.as_deref())?;
        let syncer = remote_syncer(&config)?;
        if !syncer.is_enabled() {
            anyhow::bail!("Publication is not enabled in config. Set \"publish.enabled\": true");
        }

        let store = open_store(&config).await?;
        let profiles = store.list_all().await?;

        match syncer.publish(&profiles).await? {
            PublishOutcome::Published { version, attempts } => {
                info!("Published {} (attempts: {attempts})", version.0);
                println!("✅ Published {} to {}", config.publish.path, config.publish.repo);
            }
            PublishOutcome::Unchanged => println!("Remote file already up to date"),
            PublishOutcome::Disabled => println!("Publication disabled"),
        }
        Ok(())
    }
}
