use crate::domain::DeviceRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    #[serde(default)]
    data: Vec<Value>,
}

/// Device registry reached over HTTP.
///
/// Queries `GET <endpoint>?properties=<json>` with the tenant's bearer token
/// and reads the matching devices from the `data` array of the reply.
#[derive(Clone)]
pub struct HttpDeviceRegistry {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDeviceRegistry {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build device registry http client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    #[instrument(skip(self, access_token), fields(endpoint = %self.endpoint))]
    async fn find_devices(
        &self,
        access_token: &str,
        properties: &Map<String, Value>,
    ) -> Result<Vec<Value>> {
        let filter = serde_json::to_string(properties)?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("properties", filter.as_str())])
            .bearer_auth(access_token)
            .send()
            .await
            .context("device registry request failed")?
            .error_for_status()
            .context("device registry returned an error status")?;

        let body: DeviceListResponse = response
            .json()
            .await
            .context("device registry returned an unreadable body")?;

        debug!(matches = body.data.len(), "device registry lookup complete");
        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/api/devices")
    }

    fn filter() -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("dev_eui".to_string(), json!("0004a30b001c1234"));
        properties
    }

    #[tokio::test]
    async fn test_find_devices_sends_filter_and_token() {
        let router = Router::new().route(
            "/api/devices",
            get(
                |headers: HeaderMap, Query(query): Query<HashMap<String, String>>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let properties: Value =
                        serde_json::from_str(query.get("properties").unwrap()).unwrap();

                    if auth != "Bearer secret" || properties["dev_eui"] != "0004a30b001c1234" {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    Ok(Json(json!({"data": [{"id": 3, "code": "mfm-3"}]})))
                },
            ),
        );
        let endpoint = serve(router).await;

        let registry = HttpDeviceRegistry::new(endpoint, Duration::from_secs(5)).unwrap();
        let devices = registry.find_devices("secret", &filter()).await.unwrap();

        assert_eq!(devices, vec![json!({"id": 3, "code": "mfm-3"})]);
    }

    #[tokio::test]
    async fn test_find_devices_missing_data_is_empty() {
        let router = Router::new().route("/api/devices", get(|| async { Json(json!({})) }));
        let endpoint = serve(router).await;

        let registry = HttpDeviceRegistry::new(endpoint, Duration::from_secs(5)).unwrap();
        let devices = registry.find_devices("secret", &filter()).await.unwrap();

        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn test_find_devices_error_status() {
        let router = Router::new().route(
            "/api/devices",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let endpoint = serve(router).await;

        let registry = HttpDeviceRegistry::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = registry.find_devices("secret", &filter()).await.unwrap_err();

        assert!(err.to_string().contains("error status"));
    }
}
