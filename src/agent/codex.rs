//! Subprocess agent backend.
//!
//! Spawns the agent binary once, captures combined stdout/stderr under a
//! 30-minute wall-clock timeout, and maps the subprocess's own exit code
//! directly (defaulting to 0 if no code was reported). Unlike the streaming
//! backend it does not second-guess a declared exit code from the output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::AgentError;

use super::prompt::build_prompt;
use super::{classify_failure, AgentConfig, AgentContext, AgentOutcome, AgentRunner};

const AGENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct CodexAgent {
    config: AgentConfig,
}

impl CodexAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    async fn invoke(
        &self,
        ctx: &mut AgentContext<'_>,
        transcript: &mut String,
    ) -> Result<AgentOutcome, AgentError> {
        let prompt = build_prompt(&self.config);

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("exec");
        if let Some(model) = &self.config.model {
            cmd.args(["--model", model]);
        }
        cmd.args(&self.config.extra_args);
        cmd.arg(&prompt);
        cmd.current_dir(ctx.sandbox_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| AgentError::SpawnFailed {
            binary: self.config.binary.clone(),
            source,
        })?;

        let header = format!("--- iteration {} ({}) ---\n", ctx.iteration, self.config.kind);
        transcript.push_str(&header);
        ctx.sink.append(&header).await?;

        let output = tokio::time::timeout(AGENT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| AgentError::TimedOut {
                seconds: AGENT_TIMEOUT.as_secs(),
            })?
            .map_err(|e| AgentError::Stream(e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push_str(&stderr);
        }
        transcript.push_str(&combined);
        ctx.sink.append(&combined).await?;
        ctx.sink.flush().await?;

        // The subprocess's declared exit code is authoritative; success is
        // not inferred from output. Killed-by-signal reports no code and
        // defaults to 0.
        Ok(AgentOutcome {
            output: transcript.clone(),
            exit_code: output.status.code().unwrap_or(0),
        })
    }
}

#[async_trait]
impl AgentRunner for CodexAgent {
    async fn run(&self, mut ctx: AgentContext<'_>) -> Result<AgentOutcome, AgentError> {
        let mut transcript = String::new();
        match self.invoke(&mut ctx, &mut transcript).await {
            Ok(outcome) => Ok(outcome),
            Err(AgentError::Log(e)) => Err(AgentError::Log(e)),
            Err(err) => {
                let message = err.to_string();
                let exit_code = classify_failure(
                    &message,
                    &transcript,
                    &self.config.rate_limit_phrases,
                );
                transcript.push_str(&message);
                transcript.push('\n');
                ctx.sink.append(&format!("{}\n", message)).await?;
                ctx.sink.flush().await?;
                Ok(AgentOutcome {
                    output: transcript,
                    exit_code,
                })
            }
        }
    }
}
