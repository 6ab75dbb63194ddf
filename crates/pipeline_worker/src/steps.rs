mod passthrough;
mod ttn_uplink;

pub use passthrough::*;
pub use ttn_uplink::*;

use crate::config::ServiceConfig;
use anyhow::{bail, Context, Result};
use common::domain::DeviceRegistry;
use common::registry::HttpDeviceRegistry;
use std::sync::Arc;
use std::time::Duration;
use step_host::{CommandStep, RemoteStep, Step};
use tracing::info;

/// Steps compiled into the worker binary, selectable by name.
pub const COMPILED_STEPS: [&str; 2] = ["passthrough", "ttn_uplink"];

/// Pick the step this worker runs.
///
/// A subprocess command wins over an RPC url, which wins over the compiled-in
/// step named by `step`.
pub fn build_step(config: &ServiceConfig) -> Result<Arc<dyn Step>> {
    if let Some(command_line) = &config.step_command {
        info!(command = %command_line, "using subprocess step");
        let step = CommandStep::from_command_line(command_line)
            .context("invalid PIPELINE_STEP_COMMAND")?;
        return Ok(Arc::new(step));
    }

    if let Some(url) = &config.step_rpc_url {
        info!(url = %url, "using rpc step");
        let step = RemoteStep::new(url, Duration::from_secs(config.step_timeout_secs))?;
        return Ok(Arc::new(step));
    }

    let registry = config
        .device_registry_url
        .as_deref()
        .map(|url| -> Result<Arc<dyn DeviceRegistry>> {
            Ok(Arc::new(HttpDeviceRegistry::new(
                url,
                Duration::from_secs(config.device_registry_timeout_secs),
            )?))
        })
        .transpose()?;

    info!(step = %config.step, "using compiled-in step");
    compiled_step(&config.step, registry)
}

/// Look up a compiled-in step by name.
pub fn compiled_step(
    name: &str,
    registry: Option<Arc<dyn DeviceRegistry>>,
) -> Result<Arc<dyn Step>> {
    match name {
        "passthrough" => Ok(Arc::new(PassthroughStep)),
        "ttn_uplink" => {
            let registry = registry
                .context("the ttn_uplink step needs PIPELINE_DEVICE_REGISTRY_URL to be set")?;
            Ok(Arc::new(TtnUplinkStep::new(registry)))
        }
        other => bail!(
            "unknown step {other:?}, expected one of: {}",
            COMPILED_STEPS.join(", ")
        ),
    }
}
