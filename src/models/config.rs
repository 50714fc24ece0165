//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable that overrides `publisher.access_token`.
pub const ACCESS_TOKEN_ENV: &str = "POLIWATCH_ACCESS_TOKEN";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which wiki is watched
    #[serde(default)]
    pub wiki: WikiConfig,

    /// Live feed connection settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Edit admission rules
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Page renderer settings
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Notification text and threading
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Where the watched subjects come from
    #[serde(default)]
    pub subjects: SubjectsConfig,

    /// Outbound post destination
    #[serde(default)]
    pub publisher: PublisherConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Take the publisher access token from the environment when it is set.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.publisher.access_token = Some(token);
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.wiki.name.trim().is_empty() {
            return Err(AppError::validation("wiki.name is empty"));
        }
        if self.wiki.host.trim().is_empty() {
            return Err(AppError::validation("wiki.host is empty"));
        }
        url::Url::parse(&self.stream.url)?;
        if self.stream.user_agent.trim().is_empty() {
            return Err(AppError::validation("stream.user_agent is empty"));
        }
        if self.stream.channel_capacity == 0 {
            return Err(AppError::validation("stream.channel_capacity must be > 0"));
        }
        if self.stream.backoff_base_secs < 2 {
            return Err(AppError::validation(
                "stream.backoff_base_secs must be >= 2 so the wait can grow",
            ));
        }
        if self.stream.backoff_cap_secs < self.stream.backoff_base_secs {
            return Err(AppError::validation(
                "stream.backoff_cap_secs must be >= stream.backoff_base_secs",
            ));
        }
        if self.capture.timeout_secs == 0 {
            return Err(AppError::validation("capture.timeout_secs must be > 0"));
        }
        if self.capture.selector.trim().is_empty() {
            return Err(AppError::validation("capture.selector is empty"));
        }
        if self.capture.scale <= 0.0 {
            return Err(AppError::validation("capture.scale must be > 0"));
        }
        url::Url::parse(&self.capture.devtools_url)?;
        if self.notify.thread_window_mins == 0 {
            return Err(AppError::validation("notify.thread_window_mins must be > 0"));
        }
        for (name, template) in [
            ("notify.first_notice_template", &self.notify.first_notice_template),
            ("notify.follow_up_template", &self.notify.follow_up_template),
        ] {
            if !template.contains("{name}") || !template.contains("{url}") {
                return Err(AppError::validation(format!(
                    "{name} must contain {{name}} and {{url}}"
                )));
            }
        }
        if self.subjects.file.is_none() {
            url::Url::parse(&self.subjects.sparql_endpoint)?;
        }
        if let Some(base_url) = &self.publisher.base_url {
            url::Url::parse(base_url)?;
        }
        Ok(())
    }
}

/// Watched wiki identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    /// Feed identifier of the wiki (e.g. "dewiki")
    #[serde(default = "defaults::wiki_name")]
    pub name: String,

    /// Host used to build diff URLs
    #[serde(default = "defaults::wiki_host")]
    pub host: String,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            name: defaults::wiki_name(),
            host: defaults::wiki_host(),
        }
    }
}

/// Live feed connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Recent-changes stream endpoint
    #[serde(default = "defaults::stream_url")]
    pub url: String,

    /// User-Agent header for feed and directory requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Slots in the channel between consumer and processing loop
    #[serde(default = "defaults::channel_capacity")]
    pub channel_capacity: usize,

    /// First wait after a failure, in seconds
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_secs: u64,

    /// Upper bound for the reconnect wait, in seconds
    #[serde(default = "defaults::backoff_cap")]
    pub backoff_cap_secs: u64,

    /// Quiet period after which the wait resets to the base, in seconds
    #[serde(default = "defaults::backoff_reset")]
    pub backoff_reset_secs: u64,
}

impl StreamConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    pub fn backoff_reset(&self) -> Duration {
        Duration::from_secs(self.backoff_reset_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: defaults::stream_url(),
            user_agent: defaults::user_agent(),
            channel_capacity: defaults::channel_capacity(),
            backoff_base_secs: defaults::backoff_base(),
            backoff_cap_secs: defaults::backoff_cap(),
            backoff_reset_secs: defaults::backoff_reset(),
        }
    }
}

/// Edit admission rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Minimum absolute byte change for an edit to be considered
    #[serde(default = "defaults::admission_threshold")]
    pub admission_threshold: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            admission_threshold: defaults::admission_threshold(),
        }
    }
}

/// Page renderer and capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// HTTP endpoint of the browser's DevTools interface
    #[serde(default = "defaults::devtools_url")]
    pub devtools_url: String,

    /// Overall budget for one capture, in seconds
    #[serde(default = "defaults::capture_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::viewport_width")]
    pub viewport_width: u32,

    /// Tall enough that long diffs are not cut off
    #[serde(default = "defaults::viewport_height")]
    pub viewport_height: u32,

    /// Element that is captured
    #[serde(default = "defaults::diff_selector")]
    pub selector: String,

    /// Device scale of the captured image
    #[serde(default = "defaults::capture_scale")]
    pub scale: f64,

    /// Fragments with at most this many characters are not interesting
    #[serde(default = "defaults::min_fragment_chars")]
    pub min_fragment_chars: usize,

    /// Link labels that are left visible during redaction
    #[serde(default = "defaults::redaction_allow_list")]
    pub redaction_allow_list: Vec<String>,
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            devtools_url: defaults::devtools_url(),
            timeout_secs: defaults::capture_timeout(),
            viewport_width: defaults::viewport_width(),
            viewport_height: defaults::viewport_height(),
            selector: defaults::diff_selector(),
            scale: defaults::capture_scale(),
            min_fragment_chars: defaults::min_fragment_chars(),
            redaction_allow_list: defaults::redaction_allow_list(),
        }
    }
}

/// Notification text and threading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Notifications closer together than this are threaded
    #[serde(default = "defaults::thread_window")]
    pub thread_window_mins: u64,

    /// Template for a new thread root.
    ///
    /// Placeholders: `{name}`, `{affiliation}`, `{url}`
    #[serde(default = "defaults::first_notice")]
    pub first_notice_template: String,

    /// Template for a reply within the thread window
    #[serde(default = "defaults::follow_up")]
    pub follow_up_template: String,
}

impl NotifyConfig {
    pub fn thread_window(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::minutes(self.thread_window_mins as i64)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            thread_window_mins: defaults::thread_window(),
            first_notice_template: defaults::first_notice(),
            follow_up_template: defaults::follow_up(),
        }
    }
}

/// Subject directory source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectsConfig {
    /// SPARQL endpoint queried at startup
    #[serde(default = "defaults::sparql_endpoint")]
    pub sparql_endpoint: String,

    /// Local JSON file with subject records; replaces the SPARQL query when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::subjects_timeout")]
    pub timeout_secs: u64,
}

impl Default for SubjectsConfig {
    fn default() -> Self {
        Self {
            sparql_endpoint: defaults::sparql_endpoint(),
            file: None,
            timeout_secs: defaults::subjects_timeout(),
        }
    }
}

/// Mastodon-compatible publisher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Instance base URL, e.g. `https://social.example`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bearer token; see [`ACCESS_TOKEN_ENV`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::publish_timeout")]
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            timeout_secs: defaults::publish_timeout(),
        }
    }
}

mod defaults {
    // Wiki defaults
    pub fn wiki_name() -> String {
        "dewiki".into()
    }
    pub fn wiki_host() -> String {
        "de.wikipedia.org".into()
    }

    // Stream defaults
    pub fn stream_url() -> String {
        "https://stream.wikimedia.org/v2/stream/recentchange".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; poliwatch/0.1)".into()
    }
    pub fn channel_capacity() -> usize {
        32
    }
    pub fn backoff_base() -> u64 {
        2
    }
    pub fn backoff_cap() -> u64 {
        300
    }
    pub fn backoff_reset() -> u64 {
        300
    }

    // Classifier defaults
    pub fn admission_threshold() -> u64 {
        50
    }

    // Capture defaults
    pub fn devtools_url() -> String {
        "http://127.0.0.1:9222".into()
    }
    pub fn capture_timeout() -> u64 {
        300
    }
    pub fn viewport_width() -> u32 {
        1800
    }
    pub fn viewport_height() -> u32 {
        8192
    }
    pub fn diff_selector() -> String {
        "table.diff".into()
    }
    pub fn capture_scale() -> f64 {
        1.25
    }
    pub fn min_fragment_chars() -> usize {
        10
    }
    pub fn redaction_allow_list() -> Vec<String> {
        [
            "Visuelle Bearbeitung",
            "Markierung",
            "Markierungen",
            "Diskussion",
            "Beiträge",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    // Notify defaults
    pub fn thread_window() -> u64 {
        120
    }
    pub fn first_notice() -> String {
        "Änderung beim Wiki-Eintrag zu {name}{affiliation}\n{url}".into()
    }
    pub fn follow_up() -> String {
        "Noch eine Änderung bei {name}{affiliation}\n{url}".into()
    }

    // Subject directory defaults
    pub fn sparql_endpoint() -> String {
        "https://query.wikidata.org/sparql".into()
    }
    pub fn subjects_timeout() -> u64 {
        30
    }

    // Publisher defaults
    pub fn publish_timeout() -> u64 {
        60
    }
}
