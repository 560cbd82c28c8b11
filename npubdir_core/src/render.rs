//! Directory rendering.
//!
//! The full profile list is turned into an ordered chain of chunks, each of
//! which fits in one chat message. Chunk 1 opens with a header (title,
//! profile count, last-updated marker); every later chunk opens with a
//! `(part X of N)` marker. Entries are never split: an entry that does not
//! fit in the remaining space starts a new chunk. An entry that does not fit
//! next to its chunk's header or marker, that is one larger than the limit
//! minus that prefix, gets a chunk to itself; such a chunk is the only kind
//! that may exceed the limit.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::profile::Profile;
use crate::util::escape_html;

/// Characters of the identifier shown as link text.
const SHORT_ID_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Directory title shown in the first chunk's header.
    pub title: String,
    /// Maximum size of one chunk, in bytes.
    pub limit_bytes: usize,
    /// Base URL the identifier is appended to for deep links.
    pub deep_link_base: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            title: "Nostr directory".to_string(),
            limit_bytes: 4000,
            deep_link_base: "https://njump.me/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryRenderer {
    config: RenderConfig,
}

impl DirectoryRenderer {
    #[must_use]
    pub const fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render `profiles` (already in directory order) into message chunks.
    ///
    /// Deterministic for a given ordering and limit: the only time-dependent
    /// part of the output is the newest `updated_at` among the profiles.
    #[must_use]
    pub fn render(&self, profiles: &[Profile]) -> Vec<String> {
        let header = self.header(profiles);
        if profiles.is_empty() {
            return vec![format!(
                "{header}<i>No profiles yet.</i>\nSend your <code>npub1…</code> to appear here."
            )];
        }

        let entries: Vec<String> = profiles
            .iter()
            .enumerate()
            .map(|(i, p)| self.entry_line(i + 1, p))
            .collect();

        // Every chunk holds at least one entry, so the chunk count can never
        // exceed the entry count; reserving the marker at that width keeps
        // every later chunk within the limit whatever the final total is.
        let reserve = part_marker(entries.len(), entries.len()).len();
        let ranges = pack_entries(header.len(), reserve, &entries, self.config.limit_bytes);
        let total = ranges.len();

        ranges
            .into_iter()
            .enumerate()
            .map(|(i, range)| {
                let body = entries[range].join("\n");
                if i == 0 {
                    format!("{header}{body}")
                } else {
                    format!("{}{body}", part_marker(i + 1, total))
                }
            })
            .collect()
    }

    /// One self-contained directory line.
    #[must_use]
    pub fn entry_line(&self, position: usize, profile: &Profile) -> String {
        format!(
            "{position}. {} — <a href=\"{}{}\">{}</a>",
            escape_html(&profile.display_name()),
            self.config.deep_link_base,
            profile.identifier,
            profile.identifier.short(SHORT_ID_LEN),
        )
    }

    fn header(&self, profiles: &[Profile]) -> String {
        let updated = profiles
            .iter()
            .map(|p| p.updated_at)
            .max()
            .map_or_else(|| "never".to_string(), |t| {
                format!("{} UTC", t.format("%d/%m/%Y %H:%M"))
            });
        format!(
            "🟣 <b>{}</b>\n📊 {} profiles · updated {updated}\n\n",
            escape_html(&self.config.title),
            profiles.len(),
        )
    }
}

/// Continuation marker that opens every chunk after the first.
#[must_use]
pub fn part_marker(part: usize, total: usize) -> String {
    format!("<i>(part {part} of {total})</i>\n\n")
}

/// Group entry lines into chunks.
///
/// `first_prefix` is the byte size of the header that opens chunk 1 and
/// `next_prefix` the size reserved for the marker opening every later
/// chunk. Entries inside a chunk are joined by a single newline. Returns
/// the index range of each chunk; every range is non-empty.
///
/// A chunk goes over `limit` only when it holds a single entry that is
/// larger than `limit` minus the chunk's prefix.
#[must_use]
pub fn pack_entries(
    first_prefix: usize,
    next_prefix: usize,
    entries: &[String],
    limit: usize,
) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut size = first_prefix;

    for (i, entry) in entries.iter().enumerate() {
        if i == start {
            size += entry.len();
            continue;
        }
        let added = entry.len() + 1;
        if size + added > limit {
            ranges.push(start..i);
            start = i;
            size = next_prefix + entry.len();
        } else {
            size += added;
        }
    }
    if start < entries.len() {
        ranges.push(start..entries.len());
    }
    ranges
}
