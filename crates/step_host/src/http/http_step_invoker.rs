use crate::domain::{InvokeError, StepInvoker, StepRequest, StepResponse};
use crate::http::ROUTING_KEY_HEADER;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{instrument, warn};

/// Worker-side client for a step host served over HTTP.
///
/// Sends the delivery's topic in `X-Routing-Key` and reads the routing key of
/// the reply from the same header. A 4xx reply means the endpoint will never
/// accept this message; connection failures, 5xx replies and replies without
/// a routing key are treated as the endpoint being unavailable.
#[derive(Clone)]
pub struct HttpStepInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStepInvoker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build step endpoint client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl StepInvoker for HttpStepInvoker {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, topic = ?request.topic))]
    async fn invoke(&self, request: StepRequest) -> Result<StepResponse, InvokeError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body);
        if let Some(topic) = &request.topic {
            builder = builder.header(ROUTING_KEY_HEADER, topic);
        }

        let response = builder
            .send()
            .await
            .context("could not call step endpoint")?;

        let status = response.status();
        let routing_key = response
            .headers()
            .get(ROUTING_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .context("could not read step endpoint reply")?;

        if status.is_client_error() {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(status = status.as_u16(), body = %body, "step endpoint rejected message");
            return Err(InvokeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(anyhow!("step endpoint returned {status}").into());
        }

        let routing_key =
            routing_key.ok_or_else(|| anyhow!("reply is missing the {ROUTING_KEY_HEADER} header"))?;

        Ok(StepResponse { routing_key, body })
    }
}
