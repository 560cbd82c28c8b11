//! Identifier extraction from free text.
//!
//! An identifier is the literal prefix `npub1` followed by exactly 58
//! characters of the bech32 data alphabet. Anything else (too short, too
//! long, characters outside the alphabet) is simply not a match.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Literal prefix every identifier starts with.
pub const NPUB_PREFIX: &str = "npub1";

/// Number of data characters after the prefix.
pub const NPUB_BODY_LEN: usize = 58;

/// bech32 data alphabet (no `1`, `b`, `i`, `o`).
const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

static NPUB_PATTERN: OnceLock<regex::Regex> = OnceLock::new();

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn npub_pattern() -> &'static regex::Regex {
    NPUB_PATTERN.get_or_init(|| {
        regex::Regex::new(&format!(
            r"(?i)\b{NPUB_PREFIX}[{BECH32_CHARSET}]{{{NPUB_BODY_LEN}}}\b"
        ))
        .expect("Static regex pattern is guaranteed to be valid")
    })
}

/// A syntactically valid, lowercase identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Npub(String);

impl Npub {
    /// Validate a whole string as an identifier.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let m = npub_pattern().find(value)?;
        (m.start() == 0 && m.end() == value.len()).then(|| Self(value.to_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form used in chat replies and entry lines.
    #[must_use]
    pub fn short(&self, len: usize) -> String {
        let head: String = self.0.chars().take(len).collect();
        format!("{head}…")
    }
}

impl fmt::Display for Npub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Npub {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a valid npub: {value}"))
    }
}

impl From<Npub> for String {
    fn from(value: Npub) -> Self {
        value.0
    }
}

/// Extract every identifier from `text`.
///
/// Matches are lowercased and deduplicated, in order of first appearance.
#[must_use]
pub fn extract_identifiers(text: &str) -> Vec<Npub> {
    let mut seen = HashSet::new();
    npub_pattern()
        .find_iter(text)
        .map(|m| Npub(m.as_str().to_lowercase()))
        .filter(|npub| seen.insert(npub.clone()))
        .collect()
}
