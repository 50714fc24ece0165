// src/services/capture.rs

//! Interest check, redaction and screenshot of a diff.
//!
//! Every capture runs in its own renderer session, bounded by one overall
//! timeout. The session is closed on every exit path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::{CaptureConfig, DiffReference};
use crate::services::renderer::{PageRenderer, RenderSession};
use crate::utils::html::FRAGMENT_SELECTORS;

/// Budget for tearing down a session after the capture itself.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides from the changed text fragments whether an edit is substantive.
pub trait InterestPredicate: Send + Sync {
    fn is_interesting(&self, fragments: &[String]) -> bool;
}

/// Ignores markup-only changes: link lists, categories and tiny fixes.
#[derive(Debug, Clone)]
pub struct MarkupFilter {
    min_chars: usize,
}

impl MarkupFilter {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    /// A fragment counts if it is longer than the minimum and does not
    /// start like a wiki link list entry.
    pub fn is_substantive(&self, fragment: &str) -> bool {
        let text = fragment.trim();
        !(text.is_empty()
            || text.starts_with("[[")
            || text.starts_with("*[")
            || text.starts_with("* [")
            || text.chars().count() <= self.min_chars)
    }
}

impl Default for MarkupFilter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl InterestPredicate for MarkupFilter {
    fn is_interesting(&self, fragments: &[String]) -> bool {
        fragments.iter().any(|f| self.is_substantive(f))
    }
}

/// Result of a capture that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// PNG image of the diff table
    Captured(Vec<u8>),
    /// The diff only touches markup
    NotInteresting,
}

/// Script returning the inner text of every changed fragment.
fn collect_fragments_script() -> String {
    let selectors = FRAGMENT_SELECTORS
        .iter()
        .map(|s| format!("...document.querySelectorAll({s:?})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{selectors}].map(x => x.innerText)")
}

/// Script hiding editor names and user links.
///
/// Links inside edit summaries and the allow-listed chrome labels stay
/// readable; everything else gets the same foreground and background colour.
fn redact_script(allow_list: &[String]) -> Result<String> {
    let allowed = serde_json::to_string(allow_list)?;
    Ok(format!(
        r#"(() => {{
const sheet = new CSSStyleSheet();
sheet.replaceSync(".censored{{color: #000 !important;background: #000 !important;}}");
document.adoptedStyleSheets = [...document.adoptedStyleSheets, sheet];
const diff = document.querySelector(".diff");
const links = [...document.querySelectorAll(".mw-userlink"), ...(diff ? diff.querySelectorAll("a[href^='/wiki']") : [])];
const allowed = {allowed};
links
  .filter(x => !(x.parentElement && x.parentElement.classList.contains("autocomment")))
  .filter(x => allowed.indexOf(x.innerText) === -1)
  .forEach(x => {{ x.innerText = "censored"; x.className = "censored"; }});
return true;
}})()"#
    ))
}

/// Runs the interest check and capture for admitted edits.
pub struct Capturer {
    renderer: Arc<dyn PageRenderer>,
    predicate: Arc<dyn InterestPredicate>,
    config: CaptureConfig,
}

impl Capturer {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        predicate: Arc<dyn InterestPredicate>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            renderer,
            predicate,
            config,
        }
    }

    /// Capture the diff region, or report that the diff is not interesting.
    ///
    /// Opening the session and every step after it share one deadline.
    pub async fn capture(&self, diff: &DiffReference) -> Result<CaptureOutcome> {
        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;

        let mut session = tokio::time::timeout_at(deadline, self.renderer.open())
            .await
            .map_err(|_| AppError::Timeout(timeout))??;

        let outcome = tokio::time::timeout_at(deadline, self.run(session.as_mut(), diff))
            .await
            .map_err(|_| AppError::Timeout(timeout))
            .and_then(|r| r);

        match tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[Capture] Closing session failed: {}", e),
            Err(_) => log::warn!("[Capture] Closing session timed out"),
        }

        outcome
    }

    async fn run(
        &self,
        session: &mut dyn RenderSession,
        diff: &DiffReference,
    ) -> Result<CaptureOutcome> {
        session
            .set_viewport(self.config.viewport_width, self.config.viewport_height)
            .await?;
        session.navigate(diff.as_str()).await?;

        let fragments = fragments_from(session.evaluate(&collect_fragments_script()).await?)?;
        log::debug!("[Capture] {} changed fragments in {}", fragments.len(), diff);
        if !self.predicate.is_interesting(&fragments) {
            return Ok(CaptureOutcome::NotInteresting);
        }

        session
            .evaluate(&redact_script(&self.config.redaction_allow_list)?)
            .await?;

        let element = session
            .query_selector(&self.config.selector)
            .await?
            .ok_or_else(|| {
                AppError::render(
                    "query selector",
                    format!("selector {:?} matched nothing", self.config.selector),
                )
            })?;

        let clip = session.bounding_box(element).await?.clip()?;
        let png = session.capture_region(clip, self.config.scale).await?;
        if png.is_empty() {
            return Err(AppError::render("capture", "no error but no image data"));
        }

        Ok(CaptureOutcome::Captured(png))
    }
}

fn fragments_from(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other)
            .map_err(|e| AppError::render("collect fragments", e)),
    }
}
