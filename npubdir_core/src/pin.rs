//! Pinned-message chain reconciliation.
//!
//! The rendered directory lives in the chat as a chain of pinned messages.
//! Every chain is an arena-style generation: rows share a `generation`
//! number and carry their `sequence_index`. A reconciliation edits the
//! messages it can reuse, sends and pins new ones for growth, and only when
//! every slot of the new layout succeeded flips the new generation to
//! current in one step. Messages that fell out of the current chain (from
//! shrinkage or from an earlier run that could not complete) are swept:
//! unpinned, deleted and marked retired.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Result;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::util::content_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef(pub i32);

/// Where the directory chain is posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatScope {
    pub chat: ChatRef,
    pub thread: Option<ThreadRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinChainEntry {
    pub chat: ChatRef,
    pub message: MessageRef,
    pub sequence_index: u32,
    pub generation: i64,
    pub is_current: bool,
    /// Hash of the text the message is known to hold.
    pub content_hash: Option<String>,
    /// The engine is done with this row: its message was removed, or it was
    /// carried into a newer generation.
    pub retired: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The message already holds exactly this text.
    #[error("message is not modified")]
    NotModified,

    /// The message no longer exists (deleted by someone else).
    #[error("message not found")]
    NotFound,

    #[error("{0}")]
    Failed(String),
}

impl TransportError {
    const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// The chat operations the directory needs.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        scope: ChatScope,
        text: &str,
    ) -> std::result::Result<MessageRef, TransportError>;

    async fn edit_message(
        &self,
        chat: ChatRef,
        message: MessageRef,
        text: &str,
    ) -> std::result::Result<(), TransportError>;

    async fn pin_message(
        &self,
        chat: ChatRef,
        message: MessageRef,
    ) -> std::result::Result<(), TransportError>;

    async fn unpin_message(
        &self,
        chat: ChatRef,
        message: MessageRef,
    ) -> std::result::Result<(), TransportError>;

    async fn delete_message(
        &self,
        chat: ChatRef,
        message: MessageRef,
    ) -> std::result::Result<(), TransportError>;
}

/// Persistence for pin-chain rows. Only [`PinSyncer`] writes through it.
#[async_trait]
pub trait PinChainRepo: Send + Sync {
    /// Rows of the current generation, ordered by `sequence_index`.
    async fn current_chain(&self, chat: ChatRef) -> Result<Vec<PinChainEntry>>;

    /// One past the highest generation ever used for `chat` (1 when none).
    async fn next_generation(&self, chat: ChatRef) -> Result<i64>;

    /// Record a freshly sent message as a non-current row of a pending
    /// generation, so it can be cleaned up if the run never commits.
    async fn stage_entry(&self, entry: &PinChainEntry) -> Result<()>;

    /// Update the stored content hash of the current row for `message`.
    async fn record_content(&self, chat: ChatRef, message: MessageRef, hash: &str) -> Result<()>;

    /// Atomically make `entries` (all of `generation`) the current chain:
    /// the previous current rows become non-current, those whose message is
    /// carried over are also retired, and staged rows are promoted.
    async fn commit_generation(
        &self,
        chat: ChatRef,
        generation: i64,
        entries: &[PinChainEntry],
    ) -> Result<()>;

    /// Non-current rows the engine has not finished with yet.
    async fn unretired_stale(&self, chat: ChatRef) -> Result<Vec<PinChainEntry>>;

    /// Mark every non-current row pointing at `message` as retired.
    async fn retire(&self, chat: ChatRef, message: MessageRef) -> Result<()>;
}

/// What one reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Generation committed by this run; `None` when nothing needed to change
    /// or when the run could not complete.
    pub committed_generation: Option<i64>,
    pub edited: usize,
    pub created: usize,
    pub removed: usize,
    /// Slots whose transport operations kept failing.
    pub failed_indices: Vec<usize>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_indices.is_empty()
    }
}

/// Per-chat FIFO locks. Tokio's mutex queues waiters in arrival order, so
/// requests for one chat run one at a time in the order they were accepted.
#[derive(Default)]
struct ChatLocks {
    locks: StdMutex<HashMap<ChatRef, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    fn lock_for(&self, chat: ChatRef) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(chat).or_default())
    }
}

pub struct PinSyncer {
    transport: Arc<dyn ChatTransport>,
    repo: Arc<dyn PinChainRepo>,
    retry: RetryPolicy,
    locks: ChatLocks,
}

impl PinSyncer {
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        repo: Arc<dyn PinChainRepo>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            repo,
            retry,
            locks: ChatLocks::default(),
        }
    }

    /// Reconcile the chain of `scope` against `chunks`.
    pub async fn reconcile(&self, scope: ChatScope, chunks: Vec<String>) -> Result<ReconcileReport> {
        self.reconcile_with(scope, || async move { Ok(chunks) }).await
    }

    /// Reconcile against chunks produced only once this chat's lock is held,
    /// so a queued request sees the state at the time it runs rather than
    /// the time it was made.
    pub async fn reconcile_with<F, Fut>(&self, scope: ChatScope, produce: F) -> Result<ReconcileReport>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<String>>> + Send,
    {
        let lock = self.locks.lock_for(scope.chat);
        let _guard = lock.lock().await;
        let chunks = produce().await?;
        self.reconcile_locked(scope, &chunks).await
    }

    async fn reconcile_locked(&self, scope: ChatScope, chunks: &[String]) -> Result<ReconcileReport> {
        let chat = scope.chat;
        let old = self.repo.current_chain(chat).await?;
        let generation = self.repo.next_generation(chat).await?;
        let now = Utc::now();

        debug!(
            "Reconciling chat {}: {} current messages, {} chunks",
            chat.0,
            old.len(),
            chunks.len()
        );

        let mut report = ReconcileReport::default();
        let mut entries = Vec::with_capacity(chunks.len());

        for (index, text) in chunks.iter().enumerate() {
            let hash = content_hash(text);
            let sequence_index = u32::try_from(index).unwrap_or(u32::MAX);

            if let Some(existing) = old.get(index) {
                if existing.content_hash.as_deref() == Some(hash.as_str()) {
                    entries.push(PinChainEntry {
                        generation,
                        sequence_index,
                        created_at: now,
                        ..existing.clone()
                    });
                    continue;
                }
                match self.edit(chat, existing.message, text).await {
                    Ok(()) => {
                        self.repo.record_content(chat, existing.message, &hash).await?;
                        report.edited += 1;
                        entries.push(PinChainEntry {
                            generation,
                            sequence_index,
                            content_hash: Some(hash),
                            created_at: now,
                            ..existing.clone()
                        });
                        continue;
                    }
                    Err(TransportError::NotFound) => {
                        warn!(
                            "Pinned message {} in chat {} is gone, replacing it",
                            existing.message.0, chat.0
                        );
                    }
                    Err(e) => {
                        warn!("Could not edit slot {index} in chat {}: {e}", chat.0);
                        report.failed_indices.push(index);
                        continue;
                    }
                }
            }

            match self.send_and_pin(scope, generation, sequence_index, text, hash, now).await? {
                Some(entry) => {
                    report.created += 1;
                    entries.push(entry);
                }
                None => report.failed_indices.push(index),
            }
        }

        let shrunk = old.len() > chunks.len();
        let changed = report.edited > 0 || report.created > 0 || shrunk;

        if !report.is_complete() {
            warn!(
                "Chat {} reconciliation incomplete (failed slots {:?}); keeping previous chain",
                chat.0, report.failed_indices
            );
        } else if changed {
            self.repo.commit_generation(chat, generation, &entries).await?;
            report.committed_generation = Some(generation);
            info!(
                "Committed pin chain generation {generation} for chat {} ({} messages)",
                chat.0,
                entries.len()
            );
        }

        report.removed = self.sweep(chat).await?;
        Ok(report)
    }

    /// Send a new chunk, stage it, then pin it. `None` when the slot failed.
    async fn send_and_pin(
        &self,
        scope: ChatScope,
        generation: i64,
        sequence_index: u32,
        text: &str,
        hash: String,
        now: DateTime<Utc>,
    ) -> Result<Option<PinChainEntry>> {
        let sent = retry_with_backoff(
            "Send directory message",
            &self.retry,
            TransportError::is_retryable,
            || self.transport.send_message(scope, text),
        )
        .await;
        let message = match sent {
            Ok(message) => message,
            Err(e) => {
                warn!("Could not send slot {sequence_index} in chat {}: {e}", scope.chat.0);
                return Ok(None);
            }
        };

        let entry = PinChainEntry {
            chat: scope.chat,
            message,
            sequence_index,
            generation,
            is_current: false,
            content_hash: Some(hash),
            retired: false,
            created_at: now,
        };
        self.repo.stage_entry(&entry).await?;

        let pinned = retry_with_backoff(
            "Pin directory message",
            &self.retry,
            TransportError::is_retryable,
            || self.transport.pin_message(scope.chat, message),
        )
        .await;
        match pinned {
            Ok(()) => Ok(Some(entry)),
            Err(e) => {
                warn!("Could not pin message {} in chat {}: {e}", message.0, scope.chat.0);
                Ok(None)
            }
        }
    }

    async fn edit(
        &self,
        chat: ChatRef,
        message: MessageRef,
        text: &str,
    ) -> std::result::Result<(), TransportError> {
        let edited = retry_with_backoff(
            "Edit directory message",
            &self.retry,
            TransportError::is_retryable,
            || self.transport.edit_message(chat, message, text),
        )
        .await;
        match edited {
            Err(TransportError::NotModified) => Ok(()),
            other => other,
        }
    }

    /// Unpin and delete every message that is no longer part of the current
    /// chain, retiring its rows. Returns how many messages were removed.
    async fn sweep(&self, chat: ChatRef) -> Result<usize> {
        let live: HashSet<MessageRef> = self
            .repo
            .current_chain(chat)
            .await?
            .into_iter()
            .map(|e| e.message)
            .collect();
        let stale: HashSet<MessageRef> = self
            .repo
            .unretired_stale(chat)
            .await?
            .into_iter()
            .map(|e| e.message)
            .collect();

        let mut removed = 0;
        for message in stale {
            if live.contains(&message) {
                self.repo.retire(chat, message).await?;
                continue;
            }
            if self.remove_message(chat, message).await {
                self.repo.retire(chat, message).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {removed} obsolete directory messages from chat {}", chat.0);
        }
        Ok(removed)
    }

    async fn remove_message(&self, chat: ChatRef, message: MessageRef) -> bool {
        let unpinned = retry_with_backoff(
            "Unpin directory message",
            &self.retry,
            TransportError::is_retryable,
            || self.transport.unpin_message(chat, message),
        )
        .await;
        if let Err(e) = unpinned.or_else(absent_is_done) {
            warn!("Could not unpin message {} in chat {}: {e}", message.0, chat.0);
            return false;
        }

        let deleted = retry_with_backoff(
            "Delete directory message",
            &self.retry,
            TransportError::is_retryable,
            || self.transport.delete_message(chat, message),
        )
        .await;
        if let Err(e) = deleted.or_else(absent_is_done) {
            warn!("Could not delete message {} in chat {}: {e}", message.0, chat.0);
            return false;
        }
        true
    }
}

fn absent_is_done(e: TransportError) -> std::result::Result<(), TransportError> {
    match e {
        TransportError::NotFound | TransportError::NotModified => Ok(()),
        other => Err(other),
    }
}
