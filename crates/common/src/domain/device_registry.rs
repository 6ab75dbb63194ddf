use async_trait::async_trait;
use serde_json::{Map, Value};

/// Lookup service mapping property filters to device records.
///
/// Implementations return every device matching the filter; deciding whether
/// the result is usable is up to the caller. Transport failures are errors,
/// an empty result is not.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Find devices whose properties match `properties`, authenticating with
    /// the tenant's bearer token.
    async fn find_devices(
        &self,
        access_token: &str,
        properties: &Map<String, Value>,
    ) -> anyhow::Result<Vec<Value>>;
}
