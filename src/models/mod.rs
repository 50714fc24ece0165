// src/models/mod.rs

//! Domain models for the watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod edit;
mod notification;
mod subject;

// Re-export all public types
pub use config::{
    ACCESS_TOKEN_ENV, CaptureConfig, ClassifierConfig, Config, NotifyConfig, PublisherConfig,
    StreamConfig, SubjectsConfig, WikiConfig,
};
pub use edit::{EditEvent, EventMeta, Length, Revision};
pub use notification::{
    DiffReference, MediaId, NotificationDraft, PostId, PublishedPost, ThreadPlacement,
    ThreadState,
};
pub use subject::{Subject, SubjectRecord};
