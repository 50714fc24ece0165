//! Chrome DevTools Protocol renderer.
//!
//! Connects to a browser started with `--remote-debugging-port`. Each
//! session is a fresh target (tab) that is closed again on teardown.

use std::collections::HashSet;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{BoxModel, Clip, ElementHandle, PageRenderer, RenderSession};
use crate::error::{AppError, Result};

const LOAD_EVENT: &str = "Page.loadEventFired";

/// Renderer backed by a browser's DevTools endpoint.
pub struct CdpRenderer {
    client: Client,
    endpoint: Url,
}

impl CdpRenderer {
    pub fn new(client: Client, endpoint: &str) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: Url::parse(endpoint)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    id: String,
    web_socket_debugger_url: String,
}

#[async_trait]
impl PageRenderer for CdpRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>> {
        let new_url = self.endpoint.join("/json/new?about:blank")?;
        let target: TargetInfo = self
            .client
            .put(new_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let close_url = self.endpoint.join(&format!("/json/close/{}", target.id))?;
        log::debug!("[Render] Opened target {}", target.id);

        // From here on the tab exists; the guard closes it if this future is
        // dropped or the handshake fails.
        let mut target_guard = TargetGuard::new(self.client.clone(), close_url);

        let ws = match connect_async(target.web_socket_debugger_url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                if let Err(close_err) = target_guard.close().await {
                    log::warn!("[Render] Closing target failed: {}", close_err);
                }
                return Err(e.into());
            }
        };

        Ok(Box::new(CdpSession {
            ws,
            target: target_guard,
            next_id: 0,
            seen_events: HashSet::new(),
            closed: false,
        }))
    }
}

/// Owns a browser target until it has been closed.
///
/// Dropping an unclosed guard schedules the close request on the runtime.
struct TargetGuard {
    client: Client,
    close_url: Option<Url>,
}

impl TargetGuard {
    fn new(client: Client, close_url: Url) -> Self {
        Self {
            client,
            close_url: Some(close_url),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(url) = self.close_url.clone() else {
            return Ok(());
        };
        self.client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        self.close_url = None;
        log::debug!("[Render] Closed {}", url);
        Ok(())
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        let Some(url) = self.close_url.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("[Render] No runtime to close {}", url);
            return;
        };

        let client = self.client.clone();
        runtime.spawn(async move {
            match client.get(url.clone()).send().await {
                Ok(_) => log::debug!("[Render] Closed abandoned {}", url),
                Err(e) => log::warn!("[Render] Closing abandoned {} failed: {}", url, e),
            }
        });
    }
}

/// Incoming DevTools frame: a command reply or an event.
#[derive(Debug, Deserialize)]
struct CdpMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<CdpError>,
}

#[derive(Debug, Deserialize)]
struct CdpError {
    message: String,
}

struct CdpSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    target: TargetGuard,
    next_id: u64,
    /// Events seen while waiting for command replies
    seen_events: HashSet<String>,
    closed: bool,
}

impl CdpSession {
    async fn next_message(&mut self, step: &str) -> Result<CdpMessage> {
        loop {
            let message = self
                .ws
                .next()
                .await
                .ok_or_else(|| AppError::render(step, "DevTools connection closed"))??;

            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Ping(payload) => self.ws.send(Message::Pong(payload)).await?,
                Message::Close(_) => {
                    return Err(AppError::render(step, "DevTools connection closed"));
                }
                _ => continue,
            }
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let payload = json!({ "id": id, "method": method, "params": params });
        self.ws.send(Message::Text(payload.to_string().into())).await?;

        loop {
            let reply = self.next_message(method).await?;
            if let Some(event) = reply.method {
                self.seen_events.insert(event);
                continue;
            }
            if reply.id != Some(id) {
                continue;
            }
            if let Some(error) = reply.error {
                return Err(AppError::render(method, error.message));
            }
            return Ok(reply.result.unwrap_or(Value::Null));
        }
    }

    async fn wait_for_event(&mut self, event: &str) -> Result<()> {
        if self.seen_events.remove(event) {
            return Ok(());
        }
        loop {
            let message = self.next_message(event).await?;
            if message.method.as_deref() == Some(event) {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl RenderSession for CdpSession {
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        self.call(
            "Emulation.setDeviceMetricsOverride",
            json!({ "width": width, "height": height, "deviceScaleFactor": 1, "mobile": false }),
        )
        .await?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.call("Page.enable", json!({})).await?;
        self.seen_events.remove(LOAD_EVENT);

        let result = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(AppError::render("Page.navigate", format!("{url}: {error}")));
        }

        self.wait_for_event(LOAD_EVENT).await
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": script, "returnByValue": true, "awaitPromise": true }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(AppError::render("Runtime.evaluate", text));
        }

        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn query_selector(&mut self, selector: &str) -> Result<Option<ElementHandle>> {
        let document = self.call("DOM.getDocument", json!({ "depth": 0 })).await?;
        let root = document
            .pointer("/root/nodeId")
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::render("DOM.getDocument", "no root node"))?;

        let found = self
            .call(
                "DOM.querySelector",
                json!({ "nodeId": root, "selector": selector }),
            )
            .await?;

        Ok(found
            .get("nodeId")
            .and_then(Value::as_i64)
            .filter(|&id| id != 0)
            .map(ElementHandle))
    }

    async fn bounding_box(&mut self, element: ElementHandle) -> Result<BoxModel> {
        let result = self
            .call("DOM.getBoxModel", json!({ "nodeId": element.0 }))
            .await?;
        let model = result
            .get("model")
            .cloned()
            .ok_or_else(|| AppError::render("DOM.getBoxModel", "no box model"))?;
        Ok(serde_json::from_value(model)?)
    }

    async fn capture_region(&mut self, clip: Clip, scale: f64) -> Result<Vec<u8>> {
        let result = self
            .call(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "fromSurface": false,
                    "clip": {
                        "x": clip.x,
                        "y": clip.y,
                        "width": clip.width,
                        "height": clip.height,
                        "scale": scale,
                    },
                }),
            )
            .await?;

        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::render("Page.captureScreenshot", "no image data"))?;
        Ok(STANDARD.decode(data)?)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let _ = self.ws.close(None).await;
        self.target.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn test_decode_reply_and_event() {
        let reply: CdpMessage =
            serde_json::from_str(r#"{"id":3,"result":{"frameId":"A","loaderId":"B"}}"#).unwrap();
        assert_eq!(reply.id, Some(3));
        assert!(reply.method.is_none());
        assert_eq!(reply.result.unwrap()["frameId"], "A");

        let event: CdpMessage =
            serde_json::from_str(r#"{"method":"Page.loadEventFired","params":{"timestamp":1.5}}"#)
                .unwrap();
        assert_eq!(event.method.as_deref(), Some(LOAD_EVENT));
        assert!(event.id.is_none());
    }

    #[test]
    fn test_decode_error_reply() {
        let reply: CdpMessage = serde_json::from_str(
            r#"{"id":7,"error":{"code":-32000,"message":"Could not find node with given id"}}"#,
        )
        .unwrap();
        assert_eq!(
            reply.error.unwrap().message,
            "Could not find node with given id"
        );
    }

    #[test]
    fn test_decode_target_info() {
        let target: TargetInfo = serde_json::from_str(
            r#"{
                "description": "",
                "devtoolsFrontendUrl": "/devtools/inspector.html?ws=127.0.0.1:9222/devtools/page/ABC",
                "id": "ABC",
                "title": "about:blank",
                "type": "page",
                "url": "about:blank",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/ABC"
            }"#,
        )
        .unwrap();
        assert_eq!(target.id, "ABC");
        assert_eq!(
            target.web_socket_debugger_url,
            "ws://127.0.0.1:9222/devtools/page/ABC"
        );
    }

    #[test]
    fn test_renderer_rejects_bad_endpoint() {
        assert!(CdpRenderer::new(Client::new(), "not a url").is_err());
    }

    /// DevTools HTTP endpoint creating target `T1`; reports each request line.
    async fn devtools_endpoint(ws_url: String) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !String::from_utf8_lossy(&request).contains("\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let line = String::from_utf8_lossy(&request)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();

                let body = if line.starts_with("PUT /json/new") {
                    format!(r#"{{"id":"T1","webSocketDebuggerUrl":"{ws_url}"}}"#)
                } else {
                    "Target is closing".to_string()
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                let _ = tx.send(line);
            }
        });

        (format!("http://{addr}"), rx)
    }

    /// Websocket address that accepts connections but never answers the handshake.
    async fn silent_websocket() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("ws://{addr}/devtools/page/T1")
    }

    #[tokio::test]
    async fn test_cancelled_open_still_closes_target() {
        let (endpoint, mut requests) = devtools_endpoint(silent_websocket().await).await;
        let renderer = CdpRenderer::new(Client::new(), &endpoint).unwrap();

        let opened = tokio::time::timeout(Duration::from_millis(500), renderer.open()).await;
        assert!(opened.is_err());

        let first = requests.recv().await.unwrap();
        assert!(first.starts_with("PUT /json/new"));
        let second = tokio::time::timeout(Duration::from_secs(5), requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(second.starts_with("GET /json/close/T1 "));
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_target() {
        // Nothing listens on the websocket port, so the connect fails fast.
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}/devtools/page/T1", closed.local_addr().unwrap());
        drop(closed);

        let (endpoint, mut requests) = devtools_endpoint(ws_url).await;
        let renderer = CdpRenderer::new(Client::new(), &endpoint).unwrap();

        assert!(renderer.open().await.is_err());
        assert!(requests.recv().await.unwrap().starts_with("PUT /json/new"));
        assert!(requests.recv().await.unwrap().starts_with("GET /json/close/T1 "));
    }
}
