//! Chat webhook transport

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn post(&self, webhook_url: &str, text: &str) -> anyhow::Result<()>;
}

/// Posts `{"text": ...}` to an incoming webhook
#[derive(Debug, Clone)]
pub struct WebhookChatClient {
    client: reqwest::Client,
}

impl WebhookChatClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChatClient for WebhookChatClient {
    async fn post(&self, webhook_url: &str, text: &str) -> anyhow::Result<()> {
        self.client
            .post(webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;

    async fn spawn_webhook(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                        received.lock().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{}/hook", addr), received)
    }

    #[tokio::test]
    async fn test_posts_text_payload() {
        let (url, received) = spawn_webhook(StatusCode::OK).await;
        let client = WebhookChatClient::new(Duration::from_secs(5)).unwrap();

        client.post(&url, "errors for toto: 42").await.unwrap();
        assert_eq!(received.lock()[0], json!({ "text": "errors for toto: 42" }));
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let (url, _) = spawn_webhook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = WebhookChatClient::new(Duration::from_secs(5)).unwrap();
        assert!(client.post(&url, "x").await.is_err());
    }
}
