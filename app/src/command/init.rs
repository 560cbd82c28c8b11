use npubdir_config::Config;
use std::path::PathBuf;

/// Strategy for initializing the configuration.
///
/// Creates the configuration file at the `--config` path, or at
/// `~/npubdir/config.json` when none is given.
#[derive(Debug, Clone, Copy)]
pub struct InitStrategy;

impl super::CommandStrategy for InitStrategy {
    type Input = Option<PathBuf>;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let path = match input {
            Some(path) => {
                Config::create_config_at(&path)?;
                path
            }
            None => Config::create_config()?,
        };

        println!("✅ Created config file at: {}", path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Set telegram.token and telegram.chat_id (and thread_id for a forum topic)");
        println!("   2. Optionally enable publish and fill in the GitHub token and repo");
        println!("   3. Run 'npubdir run' to start the bot (pass the same --config if you gave one)");
        println!();
        println!("🔧 Secrets can also come from NPUBDIR_TELEGRAM_TOKEN and NPUBDIR_GITHUB_TOKEN");
        println!();
        Ok(())
    }
}
