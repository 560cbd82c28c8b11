//! The directory context handed to every handler.
//!
//! Holds the profile store, the pin syncer (with its per-chat lock table),
//! the remote syncer and the renderer. Handlers never reach for global
//! state; they call operations on this object.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::consent::{self, ConsentAction, ConsentChange};
use crate::extract::{Npub, extract_identifiers};
use crate::pin::{ChatScope, PinSyncer, ReconcileReport};
use crate::profile::{OwnerRef, Profile};
use crate::remote::{PublishOutcome, RemoteSyncer};
use crate::render::DirectoryRenderer;
use crate::store::{ProfileStore, Upserted};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub total: u64,
    pub published: u64,
}

impl DirectoryStats {
    #[must_use]
    pub const fn chat_only(&self) -> u64 {
        self.total.saturating_sub(self.published)
    }
}

pub struct Directory {
    profiles: Arc<dyn ProfileStore>,
    renderer: DirectoryRenderer,
    pins: PinSyncer,
    remote: RemoteSyncer,
}

impl Directory {
    #[must_use]
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        renderer: DirectoryRenderer,
        pins: PinSyncer,
        remote: RemoteSyncer,
    ) -> Self {
        Self {
            profiles,
            renderer,
            pins,
            remote,
        }
    }

    #[must_use]
    pub fn profiles(&self) -> &dyn ProfileStore {
        self.profiles.as_ref()
    }

    #[must_use]
    pub const fn renderer(&self) -> &DirectoryRenderer {
        &self.renderer
    }

    /// Record every identifier found in `text` as seen from `owner`.
    ///
    /// Returns one entry per distinct identifier, in order of appearance.
    pub async fn record_sightings(
        &self,
        text: &str,
        owner: &OwnerRef,
        at: DateTime<Utc>,
    ) -> Result<Vec<Upserted>> {
        let mut recorded = Vec::new();
        for identifier in extract_identifiers(text) {
            let upserted = self.profiles.upsert(&identifier, owner, at).await?;
            if upserted.created {
                info!("New profile {} from user {}", identifier.short(20), owner.user_id);
            }
            recorded.push(upserted);
        }
        Ok(recorded)
    }

    /// Apply an owner's consent answer.
    pub async fn apply_consent(
        &self,
        identifier: &Npub,
        action: ConsentAction,
        now: DateTime<Utc>,
    ) -> Result<ConsentChange> {
        let profile = self.require(identifier).await?;
        let change = consent::transition(profile.consent, action).ok_or_else(|| {
            Error::NotFound(format!("no consent transition for {identifier}"))
        })?;
        if change.changed() {
            self.profiles.set_consent(identifier, change.to, now).await?;
            info!(
                "Consent for {} changed: {} -> {}",
                identifier.short(20),
                change.from,
                change.to
            );
        }
        Ok(change)
    }

    pub async fn remove(&self, identifier: &Npub) -> Result<Profile> {
        let removed = self.profiles.remove(identifier).await?;
        info!("Removed profile {}", identifier.short(20));
        Ok(removed)
    }

    /// Set or clear (`None`) the admin display name.
    pub async fn rename(
        &self,
        identifier: &Npub,
        custom_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Profile> {
        let custom_name = custom_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self.profiles
            .set_custom_name(identifier, custom_name, now)
            .await
    }

    pub async fn profiles_of(&self, user_id: u64) -> Result<Vec<Profile>> {
        self.profiles.find_by_owner(user_id).await
    }

    /// Find a profile by `@handle` or identifier prefix.
    pub async fn find(&self, query: &str) -> Result<Option<Profile>> {
        if let Some(identifier) = Npub::parse(query) {
            return self.profiles.get(&identifier).await;
        }
        Ok(self
            .profiles
            .list_all()
            .await?
            .into_iter()
            .find(|p| p.matches_query(query)))
    }

    pub async fn stats(&self) -> Result<DirectoryStats> {
        let all = self.profiles.list_all().await?;
        Ok(DirectoryStats {
            total: all.len() as u64,
            published: all.iter().filter(|p| p.is_published()).count() as u64,
        })
    }

    /// Render the whole directory as it stands now.
    pub async fn render(&self) -> Result<Vec<String>> {
        let profiles = self.profiles.list_all().await?;
        Ok(self.renderer.render(&profiles))
    }

    /// Bring the pinned chain of `scope` up to date. The profile list is read
    /// once this chat's turn comes, not when the request is made.
    pub async fn refresh_pins(&self, scope: ChatScope) -> Result<ReconcileReport> {
        self.pins
            .reconcile_with(scope, || async { self.render().await })
            .await
    }

    /// Publish the consented subset to the remote store.
    pub async fn publish(&self) -> Result<PublishOutcome> {
        if !self.remote.is_enabled() {
            return Ok(PublishOutcome::Disabled);
        }
        let profiles = self.profiles.list_all().await?;
        self.remote.publish(&profiles).await
    }

    /// Refresh the pins of `scope` and republish, after any mutation.
    ///
    /// Every profile change moves the header timestamp, so consent answers
    /// come through here too. Failures are logged, not returned: both
    /// protocols resume from persisted state on the next trigger.
    pub async fn sync(&self, scope: ChatScope) {
        match self.refresh_pins(scope).await {
            Ok(report) if !report.is_complete() => warn!(
                "Pinned directory only partially updated in chat {}: {:?}",
                scope.chat.0, report.failed_indices
            ),
            Ok(_) => {}
            Err(e) => warn!("Failed to refresh pinned directory: {e}"),
        }
        if let Err(e) = self.publish().await {
            warn!("Failed to publish directory: {e}");
        }
    }

    async fn require(&self, identifier: &Npub) -> Result<Profile> {
        self.profiles
            .get(identifier)
            .await?
            .ok_or_else(|| Error::NotFound(identifier.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::{ChatRef, PinChainRepo};
    use crate::profile::ConsentState;
    use crate::remote::PublishedProfile;
    use crate::retry::RetryPolicy;
    use crate::testing::{FakeRemote, FakeTransport, MemoryPinChainRepo, MemoryProfileStore};
    use chrono::TimeZone;

    const SCOPE: ChatScope = ChatScope {
        chat: ChatRef(-42),
        thread: None,
    };

    struct Harness {
        directory: Directory,
        transport: Arc<FakeTransport>,
        pins: Arc<MemoryPinChainRepo>,
        remote: Arc<FakeRemote>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(FakeTransport::default());
        let pins = Arc::new(MemoryPinChainRepo::default());
        let remote = Arc::new(FakeRemote::default());
        let directory = Directory::new(
            Arc::new(MemoryProfileStore::default()),
            DirectoryRenderer::default(),
            PinSyncer::new(transport.clone(), pins.clone(), RetryPolicy::immediate(2)),
            RemoteSyncer::new(remote.clone(), RetryPolicy::immediate(2)),
        );
        Harness {
            directory,
            transport,
            pins,
            remote,
        }
    }

    fn owner(user_id: u64, name: &str) -> OwnerRef {
        OwnerRef {
            user_id,
            name: name.to_string(),
            username: Some(name.to_lowercase()),
        }
    }

    fn npub(c: char) -> String {
        format!("npub1{}", c.to_string().repeat(58))
    }

    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn identifier(c: char) -> Npub {
        Npub::parse(&npub(c)).expect("test identifier should be valid")
    }

    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn published(remote: &FakeRemote) -> Vec<PublishedProfile> {
        remote.content().map_or_else(Vec::new, |c| {
            serde_json::from_str(&c).expect("published JSON should parse")
        })
    }

    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn pinned_texts(h: &Harness) -> Vec<String> {
        h.pins
            .current_chain(SCOPE.chat)
            .await
            .expect("chain should load")
            .iter()
            .map(|e| {
                h.transport
                    .text_of(e.message)
                    .expect("pinned message should exist")
            })
            .collect()
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn sightings_create_then_refresh_owner() {
        let h = harness();
        let text = format!("mine: {} and {}", npub('q'), npub('p'));
        let first = h
            .directory
            .record_sightings(&text, &owner(1, "Alice"), Utc::now())
            .await
            .expect("first sighting should be recorded");
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|u| u.created));

        let again = h
            .directory
            .record_sightings(&npub('q'), &owner(2, "Bob"), Utc::now())
            .await
            .expect("repeated sighting should be recorded");
        assert_eq!(again.len(), 1);
        assert!(!again[0].created);
        assert_eq!(again[0].profile.owner.user_id, 2);
        assert_eq!(again[0].profile.created_at, first[0].profile.created_at);
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn text_without_identifiers_records_nothing() {
        let h = harness();
        let recorded = h
            .directory
            .record_sightings("npub1corto", &owner(1, "Alice"), Utc::now())
            .await
            .expect("sighting should be processed");
        assert!(recorded.is_empty());
        assert_eq!(h.directory.stats().await.expect("stats").total, 0);
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn grant_then_deny_excludes_from_publication() {
        let h = harness();
        let id = identifier('q');
        h.directory
            .record_sightings(id.as_str(), &owner(1, "Alice"), Utc::now())
            .await
            .expect("sighting should be recorded");

        h.directory
            .apply_consent(&id, ConsentAction::Grant, Utc::now())
            .await
            .expect("grant should apply");
        h.directory.publish().await.expect("publish should succeed");
        assert_eq!(published(&h.remote).len(), 1);

        let change = h
            .directory
            .apply_consent(&id, ConsentAction::Deny, Utc::now())
            .await
            .expect("deny should apply");
        assert_eq!(change.to, ConsentState::Denied);
        h.directory.publish().await.expect("publish should succeed");
        assert!(published(&h.remote).is_empty());
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn consent_change_refreshes_pinned_header() {
        let h = harness();
        let id = identifier('q');
        let seen = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date");
        h.directory
            .record_sightings(id.as_str(), &owner(1, "Alice"), seen)
            .await
            .expect("sighting should be recorded");
        h.directory.sync(SCOPE).await;

        h.directory
            .apply_consent(&id, ConsentAction::Grant, seen + chrono::Duration::days(1))
            .await
            .expect("grant should apply");
        h.directory.sync(SCOPE).await;

        let fresh = h.directory.render().await.expect("render should succeed");
        assert_eq!(pinned_texts(&h).await, fresh);
        assert_eq!(published(&h.remote).len(), 1);
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn removal_cascades_and_later_actions_fail() {
        let h = harness();
        let id = identifier('q');
        h.directory
            .record_sightings(id.as_str(), &owner(1, "Alice"), Utc::now())
            .await
            .expect("sighting should be recorded");
        h.directory
            .apply_consent(&id, ConsentAction::Grant, Utc::now())
            .await
            .expect("grant should apply");
        h.directory.sync(SCOPE).await;
        assert_eq!(published(&h.remote).len(), 1);

        h.directory.remove(&id).await.expect("remove should succeed");
        h.directory.sync(SCOPE).await;

        let chunks = h.directory.render().await.expect("render should succeed");
        assert!(chunks.iter().all(|c| !c.contains(id.as_str())));
        assert!(published(&h.remote).is_empty());

        let pinned = pinned_texts(&h).await;
        assert!(!pinned[0].contains(id.as_str()));

        let after = h
            .directory
            .apply_consent(&id, ConsentAction::Grant, Utc::now())
            .await;
        assert!(matches!(after, Err(Error::NotFound(_))));
        assert!(matches!(h.directory.remove(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn repeated_sync_is_idempotent() {
        let h = harness();
        h.directory
            .record_sightings(&npub('q'), &owner(1, "Alice"), Utc::now())
            .await
            .expect("sighting should be recorded");
        h.directory.sync(SCOPE).await;
        let before = h.transport.counts();
        let remote_before = h.remote.counts();

        h.directory.sync(SCOPE).await;
        assert_eq!(h.transport.counts(), before);
        // one more read, no write
        assert_eq!(h.remote.counts(), (remote_before.0 + 1, remote_before.1));
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn rename_and_find() {
        let h = harness();
        let id = identifier('q');
        h.directory
            .record_sightings(id.as_str(), &owner(1, "Alice"), Utc::now())
            .await
            .expect("sighting should be recorded");

        let found = h.directory.find("@alice").await.expect("lookup by handle");
        assert_eq!(found.map(|p| p.identifier), Some(id.clone()));
        let by_prefix = h.directory.find("npub1qqqq").await.expect("lookup by prefix");
        assert!(by_prefix.is_some());
        let unknown = h.directory.find("@nobody").await.expect("lookup of unknown handle");
        assert!(unknown.is_none());

        let renamed = h
            .directory
            .rename(&id, Some("  Satoshi ".to_string()), Utc::now())
            .await
            .expect("rename should succeed");
        assert_eq!(renamed.display_name(), "Satoshi");
        let reset = h
            .directory
            .rename(&id, Some("   ".to_string()), Utc::now())
            .await
            .expect("reset should succeed");
        assert!(reset.custom_name.is_none());
    }

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn stats_split_published_and_chat_only() {
        let h = harness();
        let text = format!("{} {} {}", npub('q'), npub('p'), npub('z'));
        h.directory
            .record_sightings(&text, &owner(1, "Alice"), Utc::now())
            .await
            .expect("sightings should be recorded");
        h.directory
            .apply_consent(&identifier('p'), ConsentAction::Grant, Utc::now())
            .await
            .expect("grant should apply");

        let stats = h.directory.stats().await.expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.chat_only(), 2);
        let mine = h.directory.profiles_of(1).await.expect("profiles of owner");
        assert_eq!(mine.len(), 3);
    }
}
