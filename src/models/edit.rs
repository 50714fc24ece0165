//! Edit events decoded from the recent-changes feed.

use serde::{Deserialize, Serialize};

/// One change notice from the feed.
///
/// Every field defaults so that records of other change types (log entries,
/// page creations) still decode and can be filtered out afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditEvent {
    /// Change type; only `"edit"` is watched
    #[serde(default, rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub meta: EventMeta,

    /// Article title
    #[serde(default)]
    pub title: String,

    /// Edit summary
    #[serde(default)]
    pub comment: String,

    /// Unix timestamp in seconds
    #[serde(default)]
    pub timestamp: i64,

    /// Editor name or IP; never published
    #[serde(default)]
    pub user: String,

    /// Set when the edit was made by an automated account
    #[serde(default)]
    pub bot: bool,

    #[serde(default)]
    pub revision: Revision,

    #[serde(default)]
    pub length: Length,

    /// Wiki identifier, e.g. "dewiki"
    #[serde(default)]
    pub wiki: String,
}

/// Source locator of the changed page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMeta {
    #[serde(default)]
    pub uri: String,
}

/// Old and new revision ids; zero when unset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Revision {
    #[serde(default)]
    pub old: u64,
    #[serde(default)]
    pub new: u64,
}

/// Old and new article length in bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Length {
    #[serde(default)]
    pub old: u64,
    #[serde(default)]
    pub new: u64,
}

impl EditEvent {
    /// Absolute change in article size; deletions count like additions.
    pub fn size_delta(&self) -> u64 {
        self.length.new.abs_diff(self.length.old)
    }

    /// Cheap checks applied to every feed record before any lookup.
    pub fn passes_prefilter(&self, watched_wiki: &str) -> bool {
        self.kind == "edit" && self.wiki == watched_wiki && !self.bot && !self.title.is_empty()
    }
}
