use async_trait::async_trait;
use common::domain::Message;
use step_host::{Step, StepFailure};

/// Forwards every message untouched.
pub struct PassthroughStep;

#[async_trait]
impl Step for PassthroughStep {
    async fn process(&self, message: Message) -> Result<Message, StepFailure> {
        Ok(message)
    }
}
