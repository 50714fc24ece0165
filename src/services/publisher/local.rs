//! Dry-run publisher writing posts to disk.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── 20240301T120000-0001.png   # captured diff
//! └── 20240301T120000-0001.txt   # post text
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use super::Publisher;
use crate::error::{AppError, Result};
use crate::models::{MediaId, PostId, PublishedPost};

/// Publisher that keeps everything local.
pub struct DryRunPublisher {
    root_dir: PathBuf,
    counter: AtomicU64,
    pending: Mutex<HashMap<String, Vec<u8>>>,
}

impl DryRunPublisher {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            counter: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}{}-{n:04}", Utc::now().format("%Y%m%dT%H%M%S"))
    }

    fn take_pending(&self, media: &MediaId) -> Result<Vec<u8>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| AppError::publish("dry-run media store poisoned"))?;
        pending
            .remove(&media.0)
            .ok_or_else(|| AppError::publish(format!("unknown media id {}", media.0)))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        let path = self.root_dir.join(name);

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn verify(&self) -> Result<String> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        Ok(format!("dry-run:{}", self.root_dir.display()))
    }

    async fn upload_image(&self, png: &[u8]) -> Result<MediaId> {
        let id = self.next_id("media-");
        self.pending
            .lock()
            .map_err(|_| AppError::publish("dry-run media store poisoned"))?
            .insert(id.clone(), png.to_vec());
        Ok(MediaId(id))
    }

    async fn post(
        &self,
        text: &str,
        media: &[MediaId],
        reply_to: Option<&PostId>,
    ) -> Result<PublishedPost> {
        let id = self.next_id("");

        let mut body = String::new();
        if let Some(parent) = reply_to {
            body.push_str(&format!("in-reply-to: {parent}\n\n"));
        }
        body.push_str(text);
        body.push('\n');
        self.write_bytes(&format!("{id}.txt"), body.as_bytes()).await?;

        for (i, m) in media.iter().enumerate() {
            let png = self.take_pending(m)?;
            let name = if i == 0 {
                format!("{id}.png")
            } else {
                format!("{id}-{i}.png")
            };
            self.write_bytes(&name, &png).await?;
        }

        let path = self.root_dir.join(format!("{id}.txt"));
        log::info!("[Publish] Wrote {}", path.display());
        Ok(PublishedPost {
            id: PostId(id),
            url: Some(format!("file://{}", path.display())),
        })
    }

    async fn discard_media(&self, media: &MediaId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&media.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationDraft, ThreadPlacement};
    use crate::services::publisher::publish;

    #[tokio::test]
    async fn test_publish_writes_image_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DryRunPublisher::new(dir.path().join("posts"));

        let draft = NotificationDraft {
            subject_key: "Angela Merkel".into(),
            text: "Änderung beim Wiki-Eintrag zu Angela #Merkel".into(),
            image: vec![0x89, b'P', b'N', b'G'],
            placement: ThreadPlacement::Root,
        };
        let post = publish(&publisher, &draft).await.unwrap();

        let png = std::fs::read(publisher.root_dir().join(format!("{}.png", post.id))).unwrap();
        assert_eq!(png, draft.image);
        let text =
            std::fs::read_to_string(publisher.root_dir().join(format!("{}.txt", post.id))).unwrap();
        assert_eq!(text, format!("{}\n", draft.text));
    }

    #[tokio::test]
    async fn test_reply_records_parent() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DryRunPublisher::new(dir.path());

        let first = publisher.post("erste", &[], None).await.unwrap();
        let second = publisher
            .post("zweite", &[], Some(&first.id))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let text = std::fs::read_to_string(dir.path().join(format!("{}.txt", second.id))).unwrap();
        assert!(text.starts_with(&format!("in-reply-to: {}\n\n", first.id)));
    }

    #[tokio::test]
    async fn test_unknown_media_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DryRunPublisher::new(dir.path());

        let result = publisher.post("x", &[MediaId("nope".into())], None).await;
        assert!(matches!(result, Err(AppError::Publish(_))));
    }

    #[tokio::test]
    async fn test_failed_post_discards_uploaded_image() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the output directory should be makes every write fail.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let publisher = DryRunPublisher::new(&blocked);

        let draft = NotificationDraft {
            subject_key: "Angela Merkel".into(),
            text: "x".into(),
            image: vec![1, 2, 3],
            placement: ThreadPlacement::Root,
        };
        assert!(publish(&publisher, &draft).await.is_err());
        assert!(publisher.pending.lock().unwrap().is_empty());
    }
}
