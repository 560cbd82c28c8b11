mod schema;

pub use schema::{Config, DatabaseConfig, PublishConfig, TelegramConfig};
