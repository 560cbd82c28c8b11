use async_trait::async_trait;
use npubdir_core::{ChatRef, Error, MessageRef, PinChainEntry, PinChainRepo, Result};
use npubdir_entities::pin_chain_entries::{self, Column};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::debug;

use crate::DirectoryDb;
use crate::convert::{entry_from_model, sequence_index_to_db};

fn rows_to_entries(rows: Vec<pin_chain_entries::Model>) -> Result<Vec<PinChainEntry>> {
    rows.into_iter().map(entry_from_model).collect()
}

#[async_trait]
impl PinChainRepo for DirectoryDb {
    async fn current_chain(&self, chat: ChatRef) -> Result<Vec<PinChainEntry>> {
        let rows = pin_chain_entries::Entity::find()
            .filter(Column::ChatId.eq(chat.0))
            .filter(Column::IsCurrent.eq(true))
            .order_by_asc(Column::SequenceIndex)
            .all(&self.db)
            .await
            .map_err(Error::storage)?;
        rows_to_entries(rows)
    }

    async fn next_generation(&self, chat: ChatRef) -> Result<i64> {
        let latest = pin_chain_entries::Entity::find()
            .filter(Column::ChatId.eq(chat.0))
            .order_by_desc(Column::Generation)
            .one(&self.db)
            .await
            .map_err(Error::storage)?;
        Ok(latest.map_or(1, |row| row.generation + 1))
    }

    async fn stage_entry(&self, entry: &PinChainEntry) -> Result<()> {
        let _writer = self.writer.lock().await;
        pin_chain_entries::ActiveModel {
            chat_id: Set(entry.chat.0),
            message_id: Set(entry.message.0),
            sequence_index: Set(sequence_index_to_db(entry.sequence_index)?),
            generation: Set(entry.generation),
            is_current: Set(false),
            content_hash: Set(entry.content_hash.clone()),
            retired: Set(false),
            created_at: Set(entry.created_at),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn record_content(&self, chat: ChatRef, message: MessageRef, hash: &str) -> Result<()> {
        let _writer = self.writer.lock().await;
        pin_chain_entries::Entity::update_many()
            .col_expr(Column::ContentHash, Expr::value(hash))
            .filter(Column::ChatId.eq(chat.0))
            .filter(Column::MessageId.eq(message.0))
            .filter(Column::IsCurrent.eq(true))
            .exec(&self.db)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn commit_generation(
        &self,
        chat: ChatRef,
        generation: i64,
        entries: &[PinChainEntry],
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        let txn = self.db.begin().await.map_err(Error::storage)?;
        let carried: Vec<i32> = entries.iter().map(|e| e.message.0).collect();

        // Rows whose message lives on in the new generation are done with.
        pin_chain_entries::Entity::update_many()
            .col_expr(Column::IsCurrent, Expr::value(false))
            .col_expr(Column::Retired, Expr::value(true))
            .filter(Column::ChatId.eq(chat.0))
            .filter(Column::IsCurrent.eq(true))
            .filter(Column::MessageId.is_in(carried))
            .exec(&txn)
            .await
            .map_err(Error::storage)?;
        // The rest become stale and are left for the sweep.
        pin_chain_entries::Entity::update_many()
            .col_expr(Column::IsCurrent, Expr::value(false))
            .filter(Column::ChatId.eq(chat.0))
            .filter(Column::IsCurrent.eq(true))
            .exec(&txn)
            .await
            .map_err(Error::storage)?;

        for entry in entries {
            let sequence_index = sequence_index_to_db(entry.sequence_index)?;
            let promoted = pin_chain_entries::Entity::update_many()
                .col_expr(Column::IsCurrent, Expr::value(true))
                .col_expr(Column::SequenceIndex, Expr::value(sequence_index))
                .col_expr(Column::ContentHash, Expr::value(entry.content_hash.clone()))
                .filter(Column::ChatId.eq(chat.0))
                .filter(Column::Generation.eq(generation))
                .filter(Column::MessageId.eq(entry.message.0))
                .exec(&txn)
                .await
                .map_err(Error::storage)?;
            if promoted.rows_affected > 0 {
                continue;
            }

            pin_chain_entries::ActiveModel {
                chat_id: Set(chat.0),
                message_id: Set(entry.message.0),
                sequence_index: Set(sequence_index),
                generation: Set(generation),
                is_current: Set(true),
                content_hash: Set(entry.content_hash.clone()),
                retired: Set(false),
                created_at: Set(entry.created_at),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(Error::storage)?;
        }

        txn.commit().await.map_err(Error::storage)?;
        debug!(
            "Chat {} now at generation {generation} ({} rows)",
            chat.0,
            entries.len()
        );
        Ok(())
    }

    async fn unretired_stale(&self, chat: ChatRef) -> Result<Vec<PinChainEntry>> {
        let rows = pin_chain_entries::Entity::find()
            .filter(Column::ChatId.eq(chat.0))
            .filter(Column::IsCurrent.eq(false))
            .filter(Column::Retired.eq(false))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(Error::storage)?;
        rows_to_entries(rows)
    }

    async fn retire(&self, chat: ChatRef, message: MessageRef) -> Result<()> {
        let _writer = self.writer.lock().await;
        pin_chain_entries::Entity::update_many()
            .col_expr(Column::Retired, Expr::value(true))
            .filter(Column::ChatId.eq(chat.0))
            .filter(Column::MessageId.eq(message.0))
            .filter(Column::IsCurrent.eq(false))
            .exec(&self.db)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }
}
