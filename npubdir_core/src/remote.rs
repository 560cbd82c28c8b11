//! Publication of the consented directory to a remote file store.
//!
//! The remote file is rewritten with a compare-and-write cycle: read the
//! content and its version token, skip the write if nothing changed, else
//! write conditioned on the token. A version conflict restarts the whole
//! cycle from a fresh read.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::profile::Profile;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::{Error, Result};

/// Opaque optimistic-concurrency token issued by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub String);

/// Current remote state; both fields are `None` when the file does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: Option<String>,
    pub version: Option<VersionToken>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote version changed since it was read")]
    VersionConflict,

    #[error("remote store rejected credentials: {0}")]
    Unauthorized(String),

    #[error("remote store request failed: {0}")]
    Transport(String),

    #[error("remote store returned malformed data: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self) -> std::result::Result<RemoteFile, RemoteError>;

    /// Write `content` only if the remote is still at `expected`
    /// (`None` = the file must not exist yet).
    async fn put(
        &self,
        content: &str,
        expected: Option<&VersionToken>,
    ) -> std::result::Result<VersionToken, RemoteError>;
}

/// One element of the published JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedProfile {
    pub identifier: String,
    pub name: String,
    pub username: Option<String>,
}

impl From<&Profile> for PublishedProfile {
    fn from(profile: &Profile) -> Self {
        Self {
            identifier: profile.identifier.to_string(),
            name: profile.public_name(),
            username: profile.owner.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Publication is switched off in configuration.
    Disabled,
    /// The remote already holds the desired content.
    Unchanged,
    Published {
        version: VersionToken,
        attempts: u32,
    },
}

pub struct RemoteSyncer {
    store: Option<Arc<dyn RemoteStore>>,
    retry: RetryPolicy,
    lock: Mutex<()>,
}

impl RemoteSyncer {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, retry: RetryPolicy) -> Self {
        Self {
            store: Some(store),
            retry,
            lock: Mutex::new(()),
        }
    }

    /// A syncer whose every `publish` is a no-op success.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            store: None,
            retry: RetryPolicy::no_retry(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Render the published JSON for `profiles` (only granted ones, in the
    /// given order).
    pub fn render_json(profiles: &[Profile]) -> Result<String> {
        let published: Vec<PublishedProfile> = profiles
            .iter()
            .filter(|p| p.is_published())
            .map(PublishedProfile::from)
            .collect();
        let mut json = serde_json::to_string_pretty(&published)?;
        json.push('\n');
        Ok(json)
    }

    /// Publish the consented subset of `profiles`.
    ///
    /// Failures leave local state untouched; the next triggering event
    /// starts over from a fresh read.
    pub async fn publish(&self, profiles: &[Profile]) -> Result<PublishOutcome> {
        let Some(store) = &self.store else {
            debug!("Remote publication disabled, skipping");
            return Ok(PublishOutcome::Disabled);
        };
        let _guard = self.lock.lock().await;

        let desired = Self::render_json(profiles)?;
        let desired_value: serde_json::Value = serde_json::from_str(&desired)?;
        let attempts = AtomicU32::new(0);

        let written = retry_with_backoff("Publish", &self.retry, |_| true, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            Self::compare_and_write(store.as_ref(), &desired, &desired_value)
        })
        .await;

        let attempts = attempts.into_inner();
        match written {
            Ok(Some(version)) => {
                info!("Published directory JSON (version {}, attempt {attempts})", version.0);
                Ok(PublishOutcome::Published { version, attempts })
            }
            Ok(None) => {
                debug!("Remote directory JSON already up to date");
                Ok(PublishOutcome::Unchanged)
            }
            Err(e) => {
                warn!("Giving up on publication after {attempts} attempts: {e}");
                Err(Error::Remote(e))
            }
        }
    }

    /// One read-compare-write cycle. `Ok(None)` when no write was needed.
    async fn compare_and_write(
        store: &dyn RemoteStore,
        desired: &str,
        desired_value: &serde_json::Value,
    ) -> std::result::Result<Option<VersionToken>, RemoteError> {
        let current = store.fetch().await?;
        let same = current
            .content
            .as_deref()
            .and_then(|c| serde_json::from_str::<serde_json::Value>(c).ok())
            .is_some_and(|v| &v == desired_value);
        if same {
            return Ok(None);
        }
        store.put(desired, current.version.as_ref()).await.map(Some)
    }
}
