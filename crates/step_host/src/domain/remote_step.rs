use crate::domain::{Step, StepFailure};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use common::domain::{DomainError, Message, WireFormat};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::instrument;

/// Step implemented behind an RPC endpoint.
///
/// POSTs the message's wire form and expects the processed message's wire
/// form back.
#[derive(Clone)]
pub struct RemoteStep {
    client: reqwest::Client,
    url: String,
}

impl RemoteStep {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build step rpc client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Step for RemoteStep {
    #[instrument(skip_all, fields(url = %self.url, tracing_id = %message.tracing_id))]
    async fn process(&self, message: Message) -> Result<Message, StepFailure> {
        let body = message.to_wire()?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("step rpc request failed")?;

        let status = response.status();
        let reply = response
            .bytes()
            .await
            .context("failed to read step rpc reply")?;

        if !status.is_success() {
            return Err(StepFailure::new(anyhow!(
                "step rpc returned {status}: {}",
                String::from_utf8_lossy(&reply)
            ))
            .with_attempt(message));
        }

        Message::from_wire(&reply).map_err(|e| {
            StepFailure::new(DomainError::UserStepInvalidReturn(e.to_string())).with_attempt(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/process")
    }

    fn message() -> Message {
        Message::new(1, "t", "p", vec!["a".into(), "b".into()]).with_payload(b"hello".to_vec())
    }

    #[tokio::test]
    async fn test_reply_becomes_output() {
        let router = Router::new().route(
            "/process",
            post(|body: Bytes| async move {
                let mut message = Message::from_wire(&body).unwrap();
                message.payload = b"decoded".to_vec();
                message.to_wire().unwrap()
            }),
        );
        let step = RemoteStep::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let output = step.process(message()).await.unwrap();

        assert_eq!(output.payload, b"decoded");
    }

    #[tokio::test]
    async fn test_unusable_reply_is_invalid_return() {
        let router = Router::new().route("/process", post(|| async { "\"invalid response\"" }));
        let step = RemoteStep::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let failure = step.process(message()).await.unwrap_err();

        assert!(matches!(failure.error, DomainError::UserStepInvalidReturn(_)));
        assert_eq!(failure.attempt.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn test_error_status_fails_step() {
        let router = Router::new().route(
            "/process",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "unknown port") }),
        );
        let step = RemoteStep::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let failure = step.process(message()).await.unwrap_err();

        assert!(matches!(failure.error, DomainError::StepFailed(_)));
        assert!(failure.error.to_string().contains("unknown port"));
    }
}
