//! In-memory doubles for the store, pin repository, chat transport and
//! remote store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use crate::extract::Npub;
use crate::pin::{
    ChatRef, ChatScope, ChatTransport, MessageRef, PinChainEntry, PinChainRepo, ThreadRef,
    TransportError,
};
use crate::profile::{ConsentState, OwnerRef, Profile};
use crate::remote::{RemoteError, RemoteFile, RemoteStore, VersionToken};
use crate::store::{ProfileStore, Upserted};
use crate::{Error, Result};

fn guard<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryProfileStore {
    rows: Mutex<HashMap<Npub, Profile>>,
}

impl MemoryProfileStore {
    fn update(&self, identifier: &Npub, f: impl FnOnce(&mut Profile)) -> Result<Profile> {
        let mut rows = guard(&self.rows);
        let profile = rows
            .get_mut(identifier)
            .ok_or_else(|| Error::NotFound(identifier.to_string()))?;
        f(profile);
        Ok(profile.clone())
    }

    fn ordered(&self) -> Vec<Profile> {
        let mut all: Vec<Profile> = guard(&self.rows).values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        all
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn upsert(
        &self,
        identifier: &Npub,
        owner: &OwnerRef,
        now: DateTime<Utc>,
    ) -> Result<Upserted> {
        let mut rows = guard(&self.rows);
        if let Some(existing) = rows.get_mut(identifier) {
            existing.owner = owner.clone();
            existing.updated_at = now;
            return Ok(Upserted {
                profile: existing.clone(),
                created: false,
            });
        }
        let profile = Profile::new(identifier.clone(), owner.clone(), now);
        rows.insert(identifier.clone(), profile.clone());
        Ok(Upserted {
            profile,
            created: true,
        })
    }

    async fn get(&self, identifier: &Npub) -> Result<Option<Profile>> {
        Ok(guard(&self.rows).get(identifier).cloned())
    }

    async fn find_by_owner(&self, user_id: u64) -> Result<Vec<Profile>> {
        Ok(self
            .ordered()
            .into_iter()
            .filter(|p| p.owner.user_id == user_id)
            .collect())
    }

    async fn set_consent(
        &self,
        identifier: &Npub,
        consent: ConsentState,
        now: DateTime<Utc>,
    ) -> Result<Profile> {
        self.update(identifier, |p| {
            p.consent = consent;
            p.updated_at = now;
        })
    }

    async fn set_custom_name(
        &self,
        identifier: &Npub,
        custom_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Profile> {
        self.update(identifier, |p| {
            p.custom_name = custom_name;
            p.updated_at = now;
        })
    }

    async fn remove(&self, identifier: &Npub) -> Result<Profile> {
        guard(&self.rows)
            .remove(identifier)
            .ok_or_else(|| Error::NotFound(identifier.to_string()))
    }

    async fn list_all(&self) -> Result<Vec<Profile>> {
        Ok(self.ordered())
    }

    async fn count(&self) -> Result<u64> {
        Ok(guard(&self.rows).len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryPinChainRepo {
    rows: Mutex<Vec<PinChainEntry>>,
}

impl MemoryPinChainRepo {
    pub fn all_rows(&self) -> Vec<PinChainEntry> {
        guard(&self.rows).clone()
    }
}

#[async_trait]
impl PinChainRepo for MemoryPinChainRepo {
    async fn current_chain(&self, chat: ChatRef) -> Result<Vec<PinChainEntry>> {
        let mut chain: Vec<_> = guard(&self.rows)
            .iter()
            .filter(|e| e.chat == chat && e.is_current)
            .cloned()
            .collect();
        chain.sort_by_key(|e| e.sequence_index);
        Ok(chain)
    }

    async fn next_generation(&self, chat: ChatRef) -> Result<i64> {
        Ok(guard(&self.rows)
            .iter()
            .filter(|e| e.chat == chat)
            .map(|e| e.generation)
            .max()
            .unwrap_or(0)
            + 1)
    }

    async fn stage_entry(&self, entry: &PinChainEntry) -> Result<()> {
        guard(&self.rows).push(PinChainEntry {
            is_current: false,
            ..entry.clone()
        });
        Ok(())
    }

    async fn record_content(&self, chat: ChatRef, message: MessageRef, hash: &str) -> Result<()> {
        for e in guard(&self.rows).iter_mut() {
            if e.chat == chat && e.message == message && e.is_current {
                e.content_hash = Some(hash.to_string());
            }
        }
        Ok(())
    }

    async fn commit_generation(
        &self,
        chat: ChatRef,
        generation: i64,
        entries: &[PinChainEntry],
    ) -> Result<()> {
        let mut rows = guard(&self.rows);
        for e in rows.iter_mut().filter(|e| e.chat == chat && e.is_current) {
            e.is_current = false;
            e.retired = entries.iter().any(|n| n.message == e.message);
        }
        for entry in entries {
            let staged = rows.iter_mut().find(|e| {
                e.chat == chat && e.generation == generation && e.message == entry.message
            });
            match staged {
                Some(row) => {
                    row.is_current = true;
                    row.sequence_index = entry.sequence_index;
                    row.content_hash.clone_from(&entry.content_hash);
                }
                None => rows.push(PinChainEntry {
                    chat,
                    generation,
                    is_current: true,
                    retired: false,
                    ..entry.clone()
                }),
            }
        }
        Ok(())
    }

    async fn unretired_stale(&self, chat: ChatRef) -> Result<Vec<PinChainEntry>> {
        Ok(guard(&self.rows)
            .iter()
            .filter(|e| e.chat == chat && !e.is_current && !e.retired)
            .cloned()
            .collect())
    }

    async fn retire(&self, chat: ChatRef, message: MessageRef) -> Result<()> {
        for e in guard(&self.rows).iter_mut() {
            if e.chat == chat && e.message == message && !e.is_current {
                e.retired = true;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCounts {
    pub sends: usize,
    pub edits: usize,
    pub pins: usize,
    pub unpins: usize,
    pub deletes: usize,
}

/// Chat transport that keeps messages in a map.
#[derive(Default)]
pub struct FakeTransport {
    next_id: AtomicI32,
    messages: Mutex<HashMap<MessageRef, String>>,
    threads: Mutex<Vec<Option<ThreadRef>>>,
    counts: Mutex<TransportCounts>,
    fail_pins: AtomicBool,
    failing_edits: AtomicUsize,
}

impl FakeTransport {
    pub fn counts(&self) -> TransportCounts {
        *guard(&self.counts)
    }

    pub fn text_of(&self, message: MessageRef) -> Option<String> {
        guard(&self.messages).get(&message).cloned()
    }

    pub fn sent_threads(&self) -> Vec<Option<ThreadRef>> {
        guard(&self.threads).clone()
    }

    pub fn fail_pins(&self, fail: bool) {
        self.fail_pins.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_edits(&self, n: usize) {
        self.failing_edits.store(n, Ordering::SeqCst);
    }

    /// Simulate someone deleting a message behind the bot's back.
    pub fn forget(&self, message: MessageRef) {
        guard(&self.messages).remove(&message);
    }

    fn exists(&self, message: MessageRef) -> std::result::Result<(), TransportError> {
        if guard(&self.messages).contains_key(&message) {
            Ok(())
        } else {
            Err(TransportError::NotFound)
        }
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send_message(
        &self,
        scope: ChatScope,
        text: &str,
    ) -> std::result::Result<MessageRef, TransportError> {
        guard(&self.counts).sends += 1;
        let id = MessageRef(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        guard(&self.messages).insert(id, text.to_string());
        guard(&self.threads).push(scope.thread);
        Ok(id)
    }

    async fn edit_message(
        &self,
        _chat: ChatRef,
        message: MessageRef,
        text: &str,
    ) -> std::result::Result<(), TransportError> {
        guard(&self.counts).edits += 1;
        let failing = self.failing_edits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_edits.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Failed("flaky network".to_string()));
        }
        let mut messages = guard(&self.messages);
        match messages.get_mut(&message) {
            Some(current) if current == text => Err(TransportError::NotModified),
            Some(current) => {
                *current = text.to_string();
                Ok(())
            }
            None => Err(TransportError::NotFound),
        }
    }

    async fn pin_message(
        &self,
        _chat: ChatRef,
        message: MessageRef,
    ) -> std::result::Result<(), TransportError> {
        guard(&self.counts).pins += 1;
        if self.fail_pins.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("not enough rights".to_string()));
        }
        self.exists(message)
    }

    async fn unpin_message(
        &self,
        _chat: ChatRef,
        message: MessageRef,
    ) -> std::result::Result<(), TransportError> {
        guard(&self.counts).unpins += 1;
        self.exists(message)
    }

    async fn delete_message(
        &self,
        _chat: ChatRef,
        message: MessageRef,
    ) -> std::result::Result<(), TransportError> {
        guard(&self.counts).deletes += 1;
        guard(&self.messages)
            .remove(&message)
            .map(|_| ())
            .ok_or(TransportError::NotFound)
    }
}

/// Remote file store with a counter-based version token.
#[derive(Default)]
pub struct FakeRemote {
    file: Mutex<Option<(String, u64)>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    conflicts: AtomicUsize,
}

impl FakeRemote {
    /// `(reads, writes)` performed so far.
    pub fn counts(&self) -> (usize, usize) {
        (
            self.reads.load(Ordering::SeqCst),
            self.writes.load(Ordering::SeqCst),
        )
    }

    pub fn content(&self) -> Option<String> {
        guard(&self.file).as_ref().map(|(c, _)| c.clone())
    }

    /// Reject the next `n` writes as if another writer got in first.
    pub fn conflict_next_puts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn fetch(&self) -> std::result::Result<RemoteFile, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(guard(&self.file)
            .as_ref()
            .map_or_else(RemoteFile::default, |(content, version)| RemoteFile {
                content: Some(content.clone()),
                version: Some(VersionToken(version.to_string())),
            }))
    }

    async fn put(
        &self,
        content: &str,
        expected: Option<&VersionToken>,
    ) -> std::result::Result<VersionToken, RemoteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let pending = self.conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(RemoteError::VersionConflict);
        }
        let mut file = guard(&self.file);
        let current = file.as_ref().map(|(_, v)| VersionToken(v.to_string()));
        if current.as_ref() != expected {
            return Err(RemoteError::VersionConflict);
        }
        let next = file.as_ref().map_or(1, |(_, v)| v + 1);
        *file = Some((content.to_string(), next));
        Ok(VersionToken(next.to_string()))
    }
}
