//! Service layer for the watcher.
//!
//! This module contains the business logic for:
//! - Subject directory loading (`SubjectIndex`, `WikidataSource`, `FileSource`)
//! - Feed consumption with reconnect backoff (`StreamConsumer`)
//! - Edit admission (`EditClassifier`)
//! - Interest check and diff capture (`Capturer`)
//! - Notification text and threading (`Composer`)
//! - Outbound posting (`Publisher`)

mod capture;
mod classifier;
mod composer;
pub mod publisher;
pub mod renderer;
mod stream;
mod subjects;

pub use capture::{CaptureOutcome, Capturer, InterestPredicate, MarkupFilter};
pub use classifier::{EditClassifier, Rejection};
pub use composer::{Composer, NameUnavailable, ThreadTracker, display_name, hashtag};
pub use publisher::{DryRunPublisher, MastodonPublisher, Publisher, publish};
pub use renderer::{CdpRenderer, PageRenderer, RenderSession};
pub use stream::{Backoff, ConnectionState, RelevanceFilter, StreamConsumer};
pub use subjects::{
    FileSource, POLITICIAN_QUERY, SubjectIndex, SubjectSource, WikidataSource, load_index,
};
