//! `SQLite` persistence for profiles and pin chains.
//!
//! [`DirectoryDb`] implements both [`npubdir_core::ProfileStore`] and
//! [`npubdir_core::PinChainRepo`] on one connection pool. Writes go through a
//! single writer lock; reads are not serialized.

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

mod convert;
mod pins;
mod profiles;

use npubdir_entities::{pin_chain_entries, profiles as profile_rows};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema};
use tokio::sync::Mutex;
use tracing::info;

fn is_table_already_exists_error(err: &DbErr) -> bool {
    err.to_string().contains("table") && err.to_string().contains("already exists")
}

pub struct DirectoryDb {
    db: DatabaseConnection,
    writer: Mutex<()>,
}

impl DirectoryDb {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to database: {}", database_url);
        let db = Database::connect(database_url).await?;

        Self::create_table(&db, profile_rows::Entity).await?;
        Self::create_table(&db, pin_chain_entries::Entity).await?;

        info!("DirectoryDb initialized");
        Ok(Self {
            db,
            writer: Mutex::new(()),
        })
    }

    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> anyhow::Result<()> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        let stmt = schema.create_table_from_entity(entity);
        match db.execute_unprepared(&backend.build(&stmt).to_string()).await {
            Ok(_) => Ok(()),
            Err(e) if is_table_already_exists_error(&e) => {
                info!("Table {} already exists, skipping creation", entity.table_name());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
