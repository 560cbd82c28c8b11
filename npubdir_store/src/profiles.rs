use async_trait::async_trait;
use chrono::{DateTime, Utc};
use npubdir_core::{ConsentState, Error, Npub, OwnerRef, Profile, ProfileStore, Result, Upserted};
use npubdir_entities::profiles;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use tracing::debug;

use crate::DirectoryDb;
use crate::convert::{owner_id_to_db, profile_from_model};

impl DirectoryDb {
    async fn find_profile(&self, identifier: &Npub) -> Result<Option<profiles::Model>> {
        profiles::Entity::find_by_id(identifier.as_str().to_owned())
            .one(&self.db)
            .await
            .map_err(Error::storage)
    }

    /// Apply `change` to an existing row. Caller holds the writer lock.
    async fn update_profile(
        &self,
        identifier: &Npub,
        change: impl FnOnce(&mut profiles::ActiveModel),
    ) -> Result<Profile> {
        if self.find_profile(identifier).await?.is_none() {
            return Err(Error::NotFound(identifier.to_string()));
        }
        let mut model = profiles::ActiveModel {
            identifier: Set(identifier.as_str().to_owned()),
            ..Default::default()
        };
        change(&mut model);
        let updated = model.update(&self.db).await.map_err(Error::storage)?;
        profile_from_model(updated)
    }
}

#[async_trait]
impl ProfileStore for DirectoryDb {
    async fn upsert(
        &self,
        identifier: &Npub,
        owner: &OwnerRef,
        now: DateTime<Utc>,
    ) -> Result<Upserted> {
        let _writer = self.writer.lock().await;
        let owner_id = owner_id_to_db(owner.user_id)?;

        if self.find_profile(identifier).await?.is_some() {
            let updated = profiles::ActiveModel {
                identifier: Set(identifier.as_str().to_owned()),
                owner_id: Set(owner_id),
                owner_name: Set(owner.name.clone()),
                owner_username: Set(owner.username.clone()),
                updated_at: Set(now),
                ..Default::default()
            }
            .update(&self.db)
            .await
            .map_err(Error::storage)?;

            debug!("Refreshed owner of {}", identifier.short(20));
            return Ok(Upserted {
                profile: profile_from_model(updated)?,
                created: false,
            });
        }

        let inserted = profiles::ActiveModel {
            identifier: Set(identifier.as_str().to_owned()),
            owner_id: Set(owner_id),
            owner_name: Set(owner.name.clone()),
            owner_username: Set(owner.username.clone()),
            custom_name: Set(None),
            consent: Set(ConsentState::Undecided.as_str().to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .map_err(Error::storage)?;

        Ok(Upserted {
            profile: profile_from_model(inserted)?,
            created: true,
        })
    }

    async fn get(&self, identifier: &Npub) -> Result<Option<Profile>> {
        self.find_profile(identifier)
            .await?
            .map(profile_from_model)
            .transpose()
    }

    async fn find_by_owner(&self, user_id: u64) -> Result<Vec<Profile>> {
        let rows = profiles::Entity::find()
            .filter(profiles::Column::OwnerId.eq(owner_id_to_db(user_id)?))
            .order_by_asc(profiles::Column::CreatedAt)
            .order_by_asc(profiles::Column::Identifier)
            .all(&self.db)
            .await
            .map_err(Error::storage)?;
        rows.into_iter().map(profile_from_model).collect()
    }

    async fn set_consent(
        &self,
        identifier: &Npub,
        consent: ConsentState,
        now: DateTime<Utc>,
    ) -> Result<Profile> {
        let _writer = self.writer.lock().await;
        self.update_profile(identifier, |model| {
            model.consent = Set(consent.as_str().to_owned());
            model.updated_at = Set(now);
        })
        .await
    }

    async fn set_custom_name(
        &self,
        identifier: &Npub,
        custom_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Profile> {
        let _writer = self.writer.lock().await;
        self.update_profile(identifier, |model| {
            model.custom_name = Set(custom_name);
            model.updated_at = Set(now);
        })
        .await
    }

    async fn remove(&self, identifier: &Npub) -> Result<Profile> {
        let _writer = self.writer.lock().await;
        let existing = self
            .find_profile(identifier)
            .await?
            .ok_or_else(|| Error::NotFound(identifier.to_string()))?;

        profiles::Entity::delete_by_id(identifier.as_str().to_owned())
            .exec(&self.db)
            .await
            .map_err(Error::storage)?;

        debug!("Deleted profile {}", identifier.short(20));
        profile_from_model(existing)
    }

    async fn list_all(&self) -> Result<Vec<Profile>> {
        let rows = profiles::Entity::find()
            .order_by_asc(profiles::Column::CreatedAt)
            .order_by_asc(profiles::Column::Identifier)
            .all(&self.db)
            .await
            .map_err(Error::storage)?;
        rows.into_iter().map(profile_from_model).collect()
    }

    async fn count(&self) -> Result<u64> {
        profiles::Entity::find()
            .count(&self.db)
            .await
            .map_err(Error::storage)
    }
}
