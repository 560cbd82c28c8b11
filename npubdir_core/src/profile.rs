use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::Npub;

/// Shown when a profile has no usable name at all.
pub const ANONYMOUS: &str = "Anonymous";

/// Per-profile flag controlling inclusion in the published directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsentState {
    #[default]
    Undecided,
    Granted,
    Denied,
}

impl ConsentState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    #[must_use]
    pub fn from_str_lowercase(s: &str) -> Option<Self> {
        match s {
            "undecided" => Some(Self::Undecided),
            "granted" => Some(Self::Granted),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConsentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The chat user who last posted an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub user_id: u64,
    pub name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub identifier: Npub,
    pub owner: OwnerRef,
    /// Admin-assigned name that overrides everything the chat reports.
    pub custom_name: Option<String>,
    pub consent: ConsentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    #[must_use]
    pub fn new(identifier: Npub, owner: OwnerRef, now: DateTime<Utc>) -> Self {
        Self {
            identifier,
            owner,
            custom_name: None,
            consent: ConsentState::Undecided,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name used in the chat directory: custom name, `@handle`, chat name.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(custom) = non_empty(self.custom_name.as_deref()) {
            return custom.to_string();
        }
        if let Some(username) = non_empty(self.owner.username.as_deref()) {
            return format!("@{username}");
        }
        non_empty(Some(&self.owner.name)).unwrap_or(ANONYMOUS).to_string()
    }

    /// Name used in the published JSON, without the `@` decoration.
    #[must_use]
    pub fn public_name(&self) -> String {
        non_empty(self.custom_name.as_deref())
            .or_else(|| non_empty(Some(&self.owner.name)))
            .or_else(|| non_empty(self.owner.username.as_deref()))
            .unwrap_or(ANONYMOUS)
            .to_string()
    }

    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self.consent, ConsentState::Granted)
    }

    /// Compare a user-supplied lookup (`@handle` or identifier prefix).
    #[must_use]
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim();
        if let Some(handle) = query.strip_prefix('@') {
            return self
                .owner
                .username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(handle));
        }
        !query.is_empty() && self.identifier.as_str().starts_with(&query.to_lowercase())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
