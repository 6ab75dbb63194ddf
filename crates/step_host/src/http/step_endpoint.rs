use crate::domain::{StepHost, StepRequest};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Header naming the inbound topic on requests and the routing key on replies.
pub const ROUTING_KEY_HEADER: &str = "X-Routing-Key";

/// Serve a step host over HTTP.
///
/// `POST /` runs one invocation. Domain failures are still a 200 carrying an
/// error envelope routed to `errors`; only the routing header tells them apart.
pub fn router(host: StepHost) -> Router {
    Router::new()
        .route("/", post(invoke))
        .route("/health", get(health_check))
        .with_state(Arc::new(host))
}

async fn invoke(State(host): State<Arc<StepHost>>, headers: HeaderMap, body: Bytes) -> Response {
    let topic = headers
        .get(ROUTING_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let response = host.handle(StepRequest::new(topic, body)).await;

    let routing_key = match HeaderValue::from_str(&response.routing_key) {
        Ok(value) => value,
        Err(e) => {
            error!(routing_key = %response.routing_key, error = %e, "routing key is not a valid header value");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        StatusCode::OK,
        [
            (ROUTING_KEY_HEADER, routing_key),
            (CONTENT_TYPE.as_str(), HeaderValue::from_static("application/json")),
        ],
        response.body,
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
