use crate::domain::{Step, StepFailure};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use common::domain::{DomainError, Message, WireFormat};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Longest slice of unusable child output quoted back in an error
const MAX_QUOTED_OUTPUT: usize = 256;

/// Step implemented by an external program.
///
/// The message's wire form is written to the child's stdin and the child is
/// expected to print the processed message's wire form to stdout and exit 0.
/// A non-zero exit fails the step with the child's stderr; output that is not
/// a message fails with `UserStepInvalidReturn`.
#[derive(Debug, Clone)]
pub struct CommandStep {
    program: String,
    args: Vec<String>,
}

impl CommandStep {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line into program and arguments.
    pub fn from_command_line(command_line: &str) -> anyhow::Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("step command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Step for CommandStep {
    #[instrument(skip_all, fields(program = %self.program, tracing_id = %message.tracing_id))]
    async fn process(&self, message: Message) -> Result<Message, StepFailure> {
        let input = message.to_wire()?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start step command {}", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .context("step command stdin was not captured")?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for step command")?;

        // a child that exits without reading its input closes the pipe early
        if let Ok(Err(e)) = writer.await {
            debug!(error = %e, "step command did not consume its whole input");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StepFailure::new(anyhow!(
                "step command exited with {}: {}",
                output.status,
                stderr.trim()
            ))
            .with_attempt(message));
        }

        Message::from_wire(&output.stdout).map_err(|e| {
            StepFailure::new(DomainError::UserStepInvalidReturn(format!(
                "{e}; output was {:?}",
                quote(&output.stdout)
            )))
            .with_attempt(message)
        })
    }
}

fn quote(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    text.chars().take(MAX_QUOTED_OUTPUT).collect()
}
