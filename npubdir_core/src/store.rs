use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::extract::Npub;
use crate::profile::{ConsentState, OwnerRef, Profile};

/// Result of recording a sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub profile: Profile,
    /// `true` when this sighting created the profile.
    pub created: bool,
}

/// Durable table of profiles keyed by identifier.
///
/// Every mutation is committed before it returns. Implementations serialize
/// writes (a single writer at a time) while reads run freely. Mutations on a
/// missing identifier fail with [`crate::Error::NotFound`].
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Create the profile as `Undecided`, or refresh the owner of an
    /// existing one. `created_at`, consent and custom name are never
    /// touched by a re-sighting.
    async fn upsert(&self, identifier: &Npub, owner: &OwnerRef, now: DateTime<Utc>)
    -> Result<Upserted>;

    async fn get(&self, identifier: &Npub) -> Result<Option<Profile>>;

    /// Profiles whose latest sighting came from `user_id`, in directory order.
    async fn find_by_owner(&self, user_id: u64) -> Result<Vec<Profile>>;

    async fn set_consent(
        &self,
        identifier: &Npub,
        consent: ConsentState,
        now: DateTime<Utc>,
    ) -> Result<Profile>;

    async fn set_custom_name(
        &self,
        identifier: &Npub,
        custom_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Profile>;

    /// Delete the profile outright, returning what was removed.
    async fn remove(&self, identifier: &Npub) -> Result<Profile>;

    /// All profiles ordered by `created_at`, ties broken by identifier.
    async fn list_all(&self) -> Result<Vec<Profile>>;

    async fn count(&self) -> Result<u64>;
}
