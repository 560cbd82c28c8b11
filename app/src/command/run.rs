use npubdir_core::{Directory, DirectoryRenderer, PinSyncer};
use npubdir_telegram::{TelegramBot, TeloxideTransport};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tracing::info;

use super::{CommandStrategy, load_config, open_store, remote_syncer, scope};

/// Input for the run command.
pub struct RunInput {
    /// Optional config path
    pub config: Option<PathBuf>,
    /// Optional bot token (overrides config)
    pub token: Option<String>,
}

/// Strategy for running the Telegram bot.
pub struct RunStrategy;

impl CommandStrategy for RunStrategy {
    type Input = RunInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = load_config(input.config.as_deref())?;

        let token = if let Some(t) = input.token {
            t
        } else if !config.telegram.token.is_empty() {
            config.telegram.token.clone()
        } else {
            anyhow::bail!("Telegram bot token not configured. Set \"telegram.token\" in config");
        };

        info!("Starting Telegram bot...");

        let store = open_store(&config).await?;
        let bot = Bot::new(token);
        let pins = PinSyncer::new(
            Arc::new(TeloxideTransport::new(bot.clone())),
            store.clone(),
            config.retry,
        );
        let directory = Directory::new(
            store,
            DirectoryRenderer::new(config.directory.clone()),
            pins,
            remote_syncer(&config)?,
        );

        let bot = TelegramBot::new(bot, Arc::new(directory), scope(&config));

        info!("Telegram bot is running. Press Ctrl+C to stop.");
        bot.run().await?;

        Ok(())
    }
}
