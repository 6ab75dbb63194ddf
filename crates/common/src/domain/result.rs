use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Missing required properties in message: {}", .0.join(","))]
    MissingRequiredProperties(Vec<String>),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Malformed pipeline message: {0}")]
    MalformedMessage(String),

    #[error("pipeline message has no steps remaining")]
    NoStepsRemaining,

    #[error("{0}")]
    DeviceMatchAmbiguous(String),

    #[error("Device registry error: {0}")]
    DeviceRegistryError(#[source] anyhow::Error),

    #[error("Step returned a value that is not a pipeline message: {0}")]
    UserStepInvalidReturn(String),

    #[error("Step failed: {0:#}")]
    StepFailed(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DomainError {
    /// Name of the error within the pipeline taxonomy.
    ///
    /// Error envelopes prefix their diagnostic text with this so operators can
    /// tell pipeline completion apart from genuine processing failures.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::MissingRequiredProperties(_) => "MissingRequiredProperties",
            DomainError::MalformedPayload(_) => "MalformedPayload",
            DomainError::MalformedMessage(_) => "MalformedMessage",
            DomainError::NoStepsRemaining => "NoStepsRemaining",
            DomainError::DeviceMatchAmbiguous(_) => "DeviceMatchAmbiguous",
            DomainError::DeviceRegistryError(_) => "DeviceRegistryError",
            DomainError::UserStepInvalidReturn(_) => "UserStepInvalidReturn",
            DomainError::StepFailed(_) => "StepFailed",
            DomainError::SerializationError(_) => "SerializationError",
        }
    }

    /// Full diagnostic text: the taxonomy name followed by the error and its cause chain.
    pub fn diagnostic(&self) -> String {
        let mut text = format!("{}: {}", self.kind(), self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !text.contains(&cause_text) {
                text.push_str(": ");
                text.push_str(&cause_text);
            }
            source = cause.source();
        }
        text
    }
}
