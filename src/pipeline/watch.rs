// src/pipeline/watch.rs

//! The sequential processing loop.
//!
//! Edits are handled one at a time in arrival order: lookup, admission,
//! capture, composition, publish. Any per-edit failure skips the edit and
//! the loop moves on.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::{Config, EditEvent, PublishedPost, ThreadPlacement};
use crate::services::publisher::{self, Publisher};
use crate::services::{
    CaptureOutcome, Capturer, CdpRenderer, Composer, EditClassifier, FileSource, MarkupFilter,
    NameUnavailable, Rejection, RelevanceFilter, StreamConsumer, SubjectIndex, SubjectSource,
    WikidataSource, load_index,
};
use crate::utils::http::{create_client, create_stream_client};

/// Connect and command budget for the DevTools HTTP endpoint.
const DEVTOOLS_HTTP_TIMEOUT_SECS: u64 = 30;

/// Why an edit produced no post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Title is not in the subject index
    NotWatched,
    Rejected(Rejection),
    NotInteresting,
    CaptureFailed(String),
    NameUnavailable(NameUnavailable),
    PublishFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotWatched => write!(f, "not watched"),
            Self::Rejected(r) => write!(f, "{r}"),
            Self::NotInteresting => write!(f, "not interesting"),
            Self::CaptureFailed(e) => write!(f, "capture failed: {e}"),
            Self::NameUnavailable(e) => write!(f, "{e}"),
            Self::PublishFailed(e) => write!(f, "publish failed: {e}"),
        }
    }
}

/// Result of processing one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Published {
        subject_key: String,
        placement: ThreadPlacement,
        post: PublishedPost,
    },
    Skipped(SkipReason),
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub received: usize,
    pub published: usize,
    pub skipped: usize,
}

/// Owns every per-edit stage and the thread memory.
pub struct Watcher {
    subjects: Arc<SubjectIndex>,
    classifier: EditClassifier,
    capturer: Capturer,
    composer: Composer,
    publisher: Box<dyn Publisher>,
}

impl Watcher {
    pub fn new(
        subjects: Arc<SubjectIndex>,
        classifier: EditClassifier,
        capturer: Capturer,
        composer: Composer,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        Self {
            subjects,
            classifier,
            capturer,
            composer,
            publisher,
        }
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// Process one edit end to end.
    pub async fn process(&mut self, event: &EditEvent, now: DateTime<Utc>) -> EditOutcome {
        let Some(subject) = self.subjects.get(&event.title) else {
            return EditOutcome::Skipped(SkipReason::NotWatched);
        };

        let diff = match self.classifier.admit(event, subject) {
            Ok(diff) => diff,
            Err(rejection) => return EditOutcome::Skipped(SkipReason::Rejected(rejection)),
        };
        log::info!("[Edit] {} ({} bytes): {}", event.title, event.size_delta(), diff);

        let image = match self.capturer.capture(&diff).await {
            Ok(CaptureOutcome::Captured(image)) => image,
            Ok(CaptureOutcome::NotInteresting) => {
                return EditOutcome::Skipped(SkipReason::NotInteresting);
            }
            Err(e) => return EditOutcome::Skipped(SkipReason::CaptureFailed(e.to_string())),
        };

        let draft = match self.composer.compose(subject, &diff, image, now) {
            Ok(draft) => draft,
            Err(e) => return EditOutcome::Skipped(SkipReason::NameUnavailable(e)),
        };

        let post = match publisher::publish(self.publisher.as_ref(), &draft).await {
            Ok(post) => post,
            Err(e) => return EditOutcome::Skipped(SkipReason::PublishFailed(e.to_string())),
        };

        self.composer.record_published(&draft, post.id.clone(), now);
        EditOutcome::Published {
            subject_key: draft.subject_key,
            placement: draft.placement,
            post,
        }
    }

    /// Process edits until the channel closes.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<EditEvent>) -> WatchStats {
        let mut stats = WatchStats::default();

        while let Some(event) = rx.recv().await {
            stats.received += 1;
            match self.process(&event, Utc::now()).await {
                EditOutcome::Published {
                    subject_key,
                    placement,
                    post,
                } => {
                    stats.published += 1;
                    match placement {
                        ThreadPlacement::Root => {
                            log::info!("[Post] {} -> {}", subject_key, post.id)
                        }
                        ThreadPlacement::ReplyTo(parent) => {
                            log::info!("[Post] {} -> {} (reply to {})", subject_key, post.id, parent)
                        }
                    }
                }
                EditOutcome::Skipped(reason) => {
                    stats.skipped += 1;
                    match &reason {
                        SkipReason::CaptureFailed(_) | SkipReason::PublishFailed(_) => {
                            log::error!("[Error] {}: {}", event.title, reason)
                        }
                        _ => log::info!("[Skip] {}: {}", event.title, reason),
                    }
                }
            }
        }

        log::warn!(
            "[Watch] Feed channel closed after {} edits ({} posted, {} skipped)",
            stats.received,
            stats.published,
            stats.skipped
        );
        stats
    }
}

/// Load the subject index from the configured source.
pub async fn load_subjects(config: &Config) -> Result<SubjectIndex> {
    let source: Box<dyn SubjectSource> = match &config.subjects.file {
        Some(path) => Box::new(FileSource::new(path)),
        None => {
            let client = create_client(&config.stream.user_agent, config.subjects.timeout_secs)?;
            Box::new(WikidataSource::new(client, &config.subjects.sparql_endpoint))
        }
    };
    load_index(source.as_ref()).await
}

/// Wire every stage from configuration and run until the feed task ends.
///
/// Startup failures (subjects, publisher credentials, renderer endpoint)
/// are returned before the feed is opened.
pub async fn run_watcher(config: &Config, dry_run: Option<PathBuf>) -> Result<WatchStats> {
    let subjects = Arc::new(load_subjects(config).await?);
    log::info!("[Watch] Watching {} subjects on {}", subjects.len(), config.wiki.name);

    let publisher = publisher::from_config(&config.publisher, &config.stream.user_agent, dry_run)?;
    let account = publisher.verify().await?;
    log::info!("[Publish] Logged in as @{}", account);

    let renderer = CdpRenderer::new(
        create_client(&config.stream.user_agent, DEVTOOLS_HTTP_TIMEOUT_SECS)?,
        &config.capture.devtools_url,
    )?;
    let capturer = Capturer::new(
        Arc::new(renderer),
        Arc::new(MarkupFilter::new(config.capture.min_fragment_chars)),
        config.capture.clone(),
    );

    let mut watcher = Watcher::new(
        Arc::clone(&subjects),
        EditClassifier::new(&config.wiki.host, &config.classifier),
        capturer,
        Composer::new(&config.notify),
        publisher,
    );

    let index = Arc::clone(&subjects);
    let filter: RelevanceFilter = Arc::new(move |event: &EditEvent| index.contains(&event.title));
    let consumer = StreamConsumer::new(
        create_stream_client(&config.stream.user_agent)?,
        &config.stream,
        &config.wiki.name,
    );
    let (rx, handle) = consumer.spawn(config.stream.channel_capacity, filter);

    let stats = watcher.run(rx).await;
    if let Err(e) = handle.await {
        log::error!("[Watch] Feed task ended abnormally: {}", e);
    }
    Ok(stats)
}
