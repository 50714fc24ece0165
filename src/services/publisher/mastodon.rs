//! Mastodon-compatible status API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use super::Publisher;
use crate::error::{AppError, Result};
use crate::models::{MediaId, PostId, PublishedPost};

/// Publisher posting statuses with a bearer token.
pub struct MastodonPublisher {
    client: Client,
    base_url: Url,
    token: String,
}

impl MastodonPublisher {
    pub fn new(client: Client, base_url: &str, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Account {
    acct: String,
}

#[derive(Debug, Deserialize)]
struct MediaAttachment {
    id: String,
}

#[derive(Debug, Serialize)]
struct NewStatus<'a> {
    status: &'a str,
    media_ids: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

/// Turn a non-success response into a publish error carrying the body.
async fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::publish(format!("{what} failed with {status}: {body}")))
}

#[async_trait]
impl Publisher for MastodonPublisher {
    async fn verify(&self) -> Result<String> {
        let response = self
            .client
            .get(self.base_url.join("/api/v1/accounts/verify_credentials")?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let account: Account = check(response, "credential check").await?.json().await?;
        Ok(account.acct)
    }

    async fn upload_image(&self, png: &[u8]) -> Result<MediaId> {
        let part = Part::bytes(png.to_vec())
            .file_name("diff.png")
            .mime_str("image/png")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.base_url.join("/api/v2/media")?)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let media: MediaAttachment = check(response, "media upload").await?.json().await?;

        log::debug!("[Publish] Uploaded media {}", media.id);
        Ok(MediaId(media.id))
    }

    async fn post(
        &self,
        text: &str,
        media: &[MediaId],
        reply_to: Option<&PostId>,
    ) -> Result<PublishedPost> {
        let body = NewStatus {
            status: text,
            media_ids: media.iter().map(|m| m.0.as_str()).collect(),
            in_reply_to_id: reply_to.map(|id| id.0.as_str()),
        };

        let response = self
            .client
            .post(self.base_url.join("/api/v1/statuses")?)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status: Status = check(response, "status post").await?.json().await?;

        Ok(PublishedPost {
            id: PostId(status.id),
            url: status.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Answer one request and hand back its raw bytes.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        });

        (format!("http://{addr}"), rx)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= end + 4 + length
    }

    #[tokio::test]
    async fn test_post_reply() {
        let (base, request) = serve_once(
            "200 OK",
            r#"{"id":"200","url":"https://social.example/@bot/200","content":"<p>x</p>"}"#,
        )
        .await;
        let publisher = MastodonPublisher::new(Client::new(), &base, "secret").unwrap();

        let post = publisher
            .post(
                "Noch eine Änderung",
                &[MediaId("m1".into())],
                Some(&PostId("100".into())),
            )
            .await
            .unwrap();
        assert_eq!(post.id, PostId("200".into()));
        assert_eq!(post.url.as_deref(), Some("https://social.example/@bot/200"));

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /api/v1/statuses "));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains(r#""media_ids":["m1"]"#));
        assert!(request.contains(r#""in_reply_to_id":"100""#));
    }

    #[tokio::test]
    async fn test_root_post_omits_reply_id() {
        let (base, request) = serve_once("200 OK", r#"{"id":"201","url":null}"#).await;
        let publisher = MastodonPublisher::new(Client::new(), &base, "secret").unwrap();

        let post = publisher.post("Änderung", &[], None).await.unwrap();
        assert_eq!(post.id, PostId("201".into()));
        assert!(post.url.is_none());
        assert!(!request.await.unwrap().contains("in_reply_to_id"));
    }

    #[tokio::test]
    async fn test_upload_image() {
        let (base, request) = serve_once("202 Accepted", r#"{"id":"m7","type":"image"}"#).await;
        let publisher = MastodonPublisher::new(Client::new(), &base, "secret").unwrap();

        let media = publisher.upload_image(b"\x89PNG").await.unwrap();
        assert_eq!(media, MediaId("m7".into()));

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /api/v2/media "));
        assert!(request.contains(r#"name="file"; filename="diff.png""#));
    }

    #[tokio::test]
    async fn test_verify_returns_account() {
        let (base, request) =
            serve_once("200 OK", r#"{"id":"1","username":"poliwatch","acct":"poliwatch"}"#).await;
        let publisher = MastodonPublisher::new(Client::new(), &base, "secret").unwrap();

        assert_eq!(publisher.verify().await.unwrap(), "poliwatch");
        assert!(
            request
                .await
                .unwrap()
                .starts_with("GET /api/v1/accounts/verify_credentials ")
        );
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_token() {
        let (base, _request) =
            serve_once("401 Unauthorized", r#"{"error":"The access token is invalid"}"#).await;
        let publisher = MastodonPublisher::new(Client::new(), &base, "revoked").unwrap();

        match publisher.verify().await {
            Err(AppError::Publish(message)) => assert!(message.contains("401")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_post_is_publish_error() {
        let (base, _request) =
            serve_once("422 Unprocessable Entity", r#"{"error":"Text can't be blank"}"#).await;
        let publisher = MastodonPublisher::new(Client::new(), &base, "secret").unwrap();

        let err = publisher.post("", &[], None).await.unwrap_err();
        match err {
            AppError::Publish(message) => assert!(message.contains("Text can't be blank")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
