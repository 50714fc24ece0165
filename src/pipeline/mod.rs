//! Pipeline entry points for the watcher.
//!
//! - `run_watcher`: Wire all stages from configuration and follow the feed
//! - `Watcher`: The sequential per-edit loop

pub mod watch;

pub use watch::{
    EditOutcome, SkipReason, WatchStats, Watcher, load_subjects, run_watcher,
};
