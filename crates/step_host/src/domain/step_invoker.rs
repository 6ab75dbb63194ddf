use crate::domain::{StepRequest, StepResponse};
use async_trait::async_trait;
use thiserror::Error;

/// Failures that keep an invocation from producing any response.
///
/// Per-message failures never show up here; they come back as an error
/// envelope routed to the errors topic.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The step endpoint refused the message itself; redelivering won't help
    #[error("step endpoint rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("step endpoint unavailable: {0:#}")]
    Unavailable(#[from] anyhow::Error),
}

/// Runs one pipeline step invocation, in-process or across a transport.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StepInvoker: Send + Sync {
    async fn invoke(&self, request: StepRequest) -> Result<StepResponse, InvokeError>;
}
