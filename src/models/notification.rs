//! Diff references, notification drafts and per-subject thread memory.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical URL of the diff-only rendering of one edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffReference(String);

impl DiffReference {
    pub(crate) fn new(url: String) -> Self {
        Self(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiffReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a published post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostId(pub String);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaId(pub String);

/// Last notification sent about one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadState {
    pub last_post_id: PostId,
    pub last_post_time: DateTime<Utc>,
}

/// Where a new notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadPlacement {
    /// Starts a new thread
    Root,
    /// Continues the thread of a recent notification
    ReplyTo(PostId),
}

impl ThreadPlacement {
    pub fn reply_to(&self) -> Option<&PostId> {
        match self {
            Self::Root => None,
            Self::ReplyTo(id) => Some(id),
        }
    }
}

/// A fully composed notification waiting to be published.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    /// Thread key (article title)
    pub subject_key: String,
    pub text: String,
    pub image: Vec<u8>,
    pub placement: ThreadPlacement,
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub id: PostId,
    /// Public link, when the publisher reports one
    pub url: Option<String>,
}
