use npubdir_core::{DirectoryRenderer, ProfileStore};
use std::path::PathBuf;

use super::{load_config, open_store};

/// Strategy for printing the directory chunks without touching the chat.
#[derive(Debug, Clone, Copy)]
pub struct RenderStrategy;

impl super::CommandStrategy for RenderStrategy {
    /// Optional config path.
    type Input = Option<PathBuf>;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = load_config(input.as_deref())?;
        let store = open_store(&config).await?;

        let profiles = store.list_all().await?;
        let chunks = DirectoryRenderer::new(config.directory.clone()).render(&profiles);

        for (index, chunk) in chunks.iter().enumerate() {
            println!(
                "── message {}/{} ({} bytes) ──",
                index + 1,
                chunks.len(),
                chunk.len()
            );
            println!("{chunk}");
            println!();
        }
        Ok(())
    }
}
