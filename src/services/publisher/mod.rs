//! Publisher capability.
//!
//! ## Implementations
//!
//! - [`MastodonPublisher`]: posts to a Mastodon-compatible instance
//! - [`DryRunPublisher`]: writes each post to a local directory

mod local;
mod mastodon;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{MediaId, NotificationDraft, PostId, PublishedPost, PublisherConfig};

pub use local::DryRunPublisher;
pub use mastodon::MastodonPublisher;

/// Outbound destination for notifications.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Check the credentials and return the account name posts go out as.
    async fn verify(&self) -> Result<String>;

    /// Upload a PNG image and return its media id.
    async fn upload_image(&self, png: &[u8]) -> Result<MediaId>;

    /// Publish a post with attached media, optionally as a reply.
    async fn post(
        &self,
        text: &str,
        media: &[MediaId],
        reply_to: Option<&PostId>,
    ) -> Result<PublishedPost>;

    /// Forget an uploaded image that will not be posted.
    async fn discard_media(&self, _media: &MediaId) {}
}

/// Upload the draft's image and publish it.
///
/// An uploaded image whose post fails is handed back via `discard_media`.
pub async fn publish(publisher: &dyn Publisher, draft: &NotificationDraft) -> Result<PublishedPost> {
    let media = publisher.upload_image(&draft.image).await?;
    let result = publisher
        .post(&draft.text, std::slice::from_ref(&media), draft.placement.reply_to())
        .await;
    if result.is_err() {
        publisher.discard_media(&media).await;
    }
    result
}

/// Build the configured publisher, or a dry-run one writing to `dry_run`.
pub fn from_config(
    config: &PublisherConfig,
    user_agent: &str,
    dry_run: Option<PathBuf>,
) -> Result<Box<dyn Publisher>> {
    if let Some(dir) = dry_run {
        log::info!("[Publish] Dry run, writing posts to {}", dir.display());
        return Ok(Box::new(DryRunPublisher::new(dir)));
    }

    let base_url = config
        .base_url
        .as_deref()
        .ok_or_else(|| AppError::config("publisher.base_url is not set"))?;
    let token = config
        .access_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::config("publisher access token is not set"))?;

    let client = crate::utils::http::create_client(user_agent, config.timeout_secs)?;
    Ok(Box::new(MastodonPublisher::new(client, base_url, token)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_credentials() {
        let config = PublisherConfig::default();
        assert!(matches!(
            from_config(&config, "poliwatch-test", None),
            Err(AppError::Config(_))
        ));

        let config = PublisherConfig {
            base_url: Some("https://social.example".into()),
            access_token: Some("  ".into()),
            ..PublisherConfig::default()
        };
        assert!(from_config(&config, "poliwatch-test", None).is_err());

        let config = PublisherConfig {
            base_url: Some("https://social.example".into()),
            access_token: Some("secret".into()),
            ..PublisherConfig::default()
        };
        assert!(from_config(&config, "poliwatch-test", None).is_ok());
    }

    #[tokio::test]
    async fn test_dry_run_needs_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = from_config(
            &PublisherConfig::default(),
            "poliwatch-test",
            Some(dir.path().join("out")),
        )
        .unwrap();

        assert!(publisher.verify().await.unwrap().starts_with("dry-run:"));
        assert!(dir.path().join("out").is_dir());
    }
}
