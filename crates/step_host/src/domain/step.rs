use async_trait::async_trait;
use common::domain::{DomainError, Message};
use thiserror::Error;

/// A unit of decode or transform logic that plugs into a pipeline.
///
/// A step takes ownership of the message it is given and returns the message
/// to forward. It never touches `step_index`; advancing the pipeline is the
/// host's job.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Step: Send + Sync {
    async fn process(&self, message: Message) -> Result<Message, StepFailure>;
}

/// Why a step could not produce a message, plus whatever it had managed so far.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StepFailure {
    #[source]
    pub error: DomainError,
    /// Partial state at the moment of failure, reported as the processing attempt
    pub attempt: Option<Message>,
}

impl StepFailure {
    pub fn new(error: impl Into<DomainError>) -> Self {
        Self {
            error: error.into(),
            attempt: None,
        }
    }

    pub fn with_attempt(mut self, attempt: Message) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

impl From<DomainError> for StepFailure {
    fn from(error: DomainError) -> Self {
        Self::new(error)
    }
}

impl From<anyhow::Error> for StepFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::new(DomainError::StepFailed(error))
    }
}

impl From<serde_json::Error> for StepFailure {
    fn from(error: serde_json::Error) -> Self {
        Self::new(DomainError::SerializationError(error))
    }
}
