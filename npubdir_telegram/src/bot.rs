use crate::{Command, Result};
use npubdir_core::{ChatScope, Directory};
use std::{sync::Arc, time::Duration};
use teloxide::prelude::*;
use teloxide::types::Message;
use tokio::time::sleep;
use tracing::{info, warn};

/// Telegram front end of the directory.
#[derive(Clone)]
pub struct TelegramBot {
    /// Teloxide bot instance
    pub bot: Bot,
    /// Profiles, pin chain and publication
    pub directory: Arc<Directory>,
    /// The chat (and forum topic) the directory belongs to
    pub scope: ChatScope,
    /// Our `@username`, learned at startup, for `/command@bot` filtering
    pub(crate) username: String,
}

impl TelegramBot {
    #[must_use]
    pub const fn new(bot: Bot, directory: Arc<Directory>, scope: ChatScope) -> Self {
        Self {
            bot,
            directory,
            scope,
            username: String::new(),
        }
    }

    /// Whether `msg` was posted where the directory lives.
    #[must_use]
    pub fn in_scope(&self, msg: &Message) -> bool {
        if msg.chat.id.0 != self.scope.chat.0 {
            return false;
        }
        self.scope
            .thread
            .is_none_or(|thread| msg.thread_id.is_some_and(|t| t.0.0 == thread.0))
    }

    /// Test connection to Telegram API with linear backoff retry.
    /// Starts at 2s, increases by 2s each attempt, max 10s delay.
    /// Retries indefinitely until connection succeeds.
    async fn test_connection(&self) -> String {
        const INITIAL_DELAY_SECS: u64 = 2;
        const MAX_DELAY_SECS: u64 = 10;

        let mut attempt = 1u64;
        loop {
            match self.bot.get_me().await {
                Ok(me) => {
                    let username = me.user.username.clone().unwrap_or_default();
                    info!("Connected to Telegram API: @{} (id: {})", username, me.user.id);
                    return username;
                }
                Err(e) => {
                    let delay_secs = (INITIAL_DELAY_SECS * attempt).min(MAX_DELAY_SECS);
                    warn!("Connection attempt {attempt} failed: {e}. Retrying in {delay_secs}s...");

                    if attempt == 1 {
                        warn!("This may be due to:");
                        warn!("  - Network connectivity issues");
                        warn!("  - Firewall blocking api.telegram.org");
                        warn!("  - Invalid bot token");
                    }

                    sleep(Duration::from_secs(delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the bot until Ctrl-C.
    pub async fn run(mut self) -> Result<()> {
        use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
        use teloxide::dptree;
        use teloxide::types::{CallbackQuery, Update};

        self.username = self.test_connection().await;

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!("Could not register bot commands: {e}");
        }

        // Pick up whatever an interrupted run left behind.
        info!("Synchronizing directory for chat {}", self.scope.chat.0);
        self.directory.sync(self.scope).await;

        let bot = self.bot.clone();

        let schema = dptree::entry()
            .branch(Update::filter_message().endpoint({
                let this = self.clone();
                move |msg: Message| {
                    let this = this.clone();
                    async move { crate::handler::handle_message(this, msg).await }
                }
            }))
            .branch(Update::filter_callback_query().endpoint({
                let this = self.clone();
                move |q: CallbackQuery| {
                    let this = this.clone();
                    async move { crate::handler::handle_callback(this, q).await }
                }
            }));

        Dispatcher::builder(bot, schema)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Bot stopped");
        Ok(())
    }
}
