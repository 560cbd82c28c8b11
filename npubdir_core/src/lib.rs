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

use thiserror::Error;

pub mod consent;
pub mod directory;
pub mod extract;
pub mod pin;
pub mod profile;
pub mod remote;
pub mod render;
pub mod retry;
pub mod store;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use consent::{ConsentAction, ConsentChange};
pub use directory::{Directory, DirectoryStats};
pub use extract::{Npub, extract_identifiers};
pub use pin::{
    ChatRef, ChatScope, ChatTransport, MessageRef, PinChainEntry, PinChainRepo, PinSyncer,
    ReconcileReport, ThreadRef, TransportError,
};
pub use profile::{ConsentState, OwnerRef, Profile};
pub use remote::{
    PublishOutcome, PublishedProfile, RemoteError, RemoteFile, RemoteStore, RemoteSyncer,
    VersionToken,
};
pub use render::{DirectoryRenderer, RenderConfig};
pub use retry::RetryPolicy;
pub use store::{ProfileStore, Upserted};
pub use util::content_hash;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No profile registered for identifier: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Chat transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap any storage backend failure.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }
}
