use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use logdog_types::Handler;
use serde::Serialize;
use tokio::sync::mpsc;

/// JSON body posted for every batch
#[derive(Clone, Debug, Serialize)]
pub struct WebhookPayload {
    pub dog: String,
    pub path: String,
    pub lines: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

/// Posts every batch as JSON to a URL
///
/// `handle` only queues the payload; a background task on the tokio
/// runtime delivers the queue in order and logs failed requests.
pub struct WebhookHandler {
    url: String,
    dog: String,
    sender: mpsc::UnboundedSender<WebhookPayload>,
}

impl WebhookHandler {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(url: impl Into<String>, dog: impl Into<String>) -> anyhow::Result<Self> {
        let url = url.into();
        let dog = dog.into();
        let runtime = tokio::runtime::Handle::try_current()
            .context("webhook handler needs a running tokio runtime")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<WebhookPayload>();
        let target = url.clone();
        runtime.spawn(async move {
            while let Some(payload) = receiver.recv().await {
                let result = client
                    .post(&target)
                    .json(&payload)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status());

                match result {
                    Ok(response) => {
                        tracing::debug!(
                            url = %target,
                            dog = %payload.dog,
                            lines = payload.lines.len(),
                            status = %response.status(),
                            "webhook delivered"
                        );
                    }
                    Err(e) => {
                        tracing::error!(url = %target, dog = %payload.dog, error = %e, "webhook failed");
                    }
                }
            }
        });

        Ok(Self { url, dog, sender })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Handler for WebhookHandler {
    fn handle(&self, path: &Path, lines: &[String]) -> anyhow::Result<()> {
        let payload = WebhookPayload {
            dog: self.dog.clone(),
            path: path.display().to_string(),
            lines: lines.to_vec(),
            sent_at: Utc::now(),
        };
        self.sender
            .send(payload)
            .map_err(|_| anyhow!("webhook task for {} has stopped", self.url))
    }

    fn describe(&self) -> String {
        format!("webhook:{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Accept one HTTP request and return its body
    async fn serve_once(listener: TcpListener, body_tx: oneshot::Sender<String>) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= split + 4 + length {
                    let body = text[split + 4..split + 4 + length].to_string();
                    socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                        .await
                        .unwrap();
                    let _ = body_tx.send(body);
                    return;
                }
            }
            if n == 0 {
                return;
            }
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = WebhookPayload {
            dog: "test".to_string(),
            path: "/var/log/a.log".to_string(),
            lines: vec!["something wrong\n".to_string()],
            sent_at: Utc::now(),
        };
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["dog"], "test");
        assert_eq!(value["path"], "/var/log/a.log");
        assert_eq!(value["lines"][0], "something wrong\n");
        assert!(value["sent_at"].is_string());
    }

    #[test]
    fn test_spawn_requires_runtime() {
        assert!(WebhookHandler::spawn("http://127.0.0.1:9/hook", "test").is_err());
    }

    #[tokio::test]
    async fn test_batch_is_posted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (body_tx, body_rx) = oneshot::channel();
        tokio::spawn(serve_once(listener, body_tx));

        let handler = WebhookHandler::spawn(format!("http://{addr}/hook"), "test").unwrap();
        handler
            .handle(Path::new("/var/log/a.log"), &["whats wrong\n".to_string()])
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(5), body_rx)
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["dog"], "test");
        assert_eq!(value["lines"][0], "whats wrong\n");
    }
}
