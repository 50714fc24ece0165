//! Edit admission.
//!
//! Decides, before any rendering, whether an edit can be shown as a diff and
//! whether it changed enough to be worth a look.

use std::fmt;

use crate::models::{ClassifierConfig, DiffReference, EditEvent, Subject};
use crate::utils::{diff_url, page_slug};

/// Why an edit was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Missing revision ids or no recoverable title
    DiffReferenceUnavailable,
    /// Size change below the admission threshold
    ChangeTooSmall { delta: u64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiffReferenceUnavailable => write!(f, "diff reference unavailable"),
            Self::ChangeTooSmall { delta } => write!(f, "change too small ({delta} bytes)"),
        }
    }
}

/// Pure admission rules for relevant edits.
#[derive(Debug, Clone)]
pub struct EditClassifier {
    wiki_host: String,
    admission_threshold: u64,
}

impl EditClassifier {
    pub fn new(wiki_host: impl Into<String>, config: &ClassifierConfig) -> Self {
        Self {
            wiki_host: wiki_host.into(),
            admission_threshold: config.admission_threshold,
        }
    }

    /// Build the canonical diff reference of an edit.
    pub fn diff_reference(&self, event: &EditEvent) -> Option<DiffReference> {
        if event.revision.old == 0 || event.revision.new == 0 {
            return None;
        }
        let slug = page_slug(&event.meta.uri, &event.title)?;
        diff_url(&self.wiki_host, &slug, event.revision.old, event.revision.new)
            .map(DiffReference::new)
    }

    /// Admit an edit of a watched subject, or say why not.
    ///
    /// The subject is only consulted to keep the decision tied to a lookup
    /// that already succeeded; admission itself depends on the event alone.
    pub fn admit(
        &self,
        event: &EditEvent,
        _subject: &Subject,
    ) -> std::result::Result<DiffReference, Rejection> {
        let diff = self
            .diff_reference(event)
            .ok_or(Rejection::DiffReferenceUnavailable)?;

        let delta = event.size_delta();
        if delta < self.admission_threshold {
            return Err(Rejection::ChangeTooSmall { delta });
        }

        Ok(diff)
    }
}
