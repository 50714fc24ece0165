// src/lib.rs

//! poliwatch Library
//!
//! Follows a wiki's recent-changes feed, picks out edits to politicians'
//! articles, captures the diff and posts it.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;
