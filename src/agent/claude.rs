//! Streaming agent backend.
//!
//! Spawns the agent CLI in stream-json mode and drains its stdout one event
//! at a time into the log sink. The stream is consumed strictly
//! sequentially; the invocation is not finished until the stream is fully
//! drained (or its error path taken) and the process has been waited on.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::errors::AgentError;

use super::prompt::build_prompt;
use super::stream::{render_event, StreamEvent};
use super::{classify_failure, AgentConfig, AgentContext, AgentOutcome, AgentRunner, EXIT_SUCCESS};

pub struct ClaudeAgent {
    config: AgentConfig,
}

impl ClaudeAgent {
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
        cmd.args([
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
            "--permission-mode",
            self.config.permission_mode.as_cli_flag(),
        ]);
        if let Some(model) = &self.config.model {
            cmd.args(["--model", model]);
        }
        cmd.args(&self.config.extra_args);
        cmd.args(["-p", &prompt]);
        cmd.current_dir(ctx.sandbox_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AgentError::SpawnFailed {
            binary: self.config.binary.clone(),
            source,
        })?;

        let header = format!("--- iteration {} ({}) ---\n", ctx.iteration, self.config.kind);
        transcript.push_str(&header);
        ctx.sink.append(&header).await?;

        let mut result_is_error = false;

        // Drain the stream fully before waiting on the process. One chunk at
        // a time; no concurrent writers to the sink mid-iteration.
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| AgentError::Stream(e.to_string()))?
            {
                let chunk = match serde_json::from_str::<StreamEvent>(&line) {
                    Ok(event) => {
                        if let StreamEvent::Result { is_error, .. } = &event {
                            result_is_error = *is_error;
                        }
                        render_event(&event)
                    }
                    // Not stream-json: pass the raw line through.
                    Err(_) => format!("{}\n", line),
                };
                if !chunk.is_empty() {
                    transcript.push_str(&chunk);
                    ctx.sink.append(&chunk).await?;
                }
            }
        }

        let mut stderr_content = String::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| AgentError::Stream(e.to_string()))?
            {
                stderr_content.push_str(&line);
                stderr_content.push('\n');
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::Stream(e.to_string()))?;

        ctx.sink.flush().await?;

        if status.success() && !result_is_error {
            return Ok(AgentOutcome {
                output: transcript.clone(),
                exit_code: EXIT_SUCCESS,
            });
        }

        if !stderr_content.is_empty() {
            transcript.push_str(&stderr_content);
            ctx.sink.append(&stderr_content).await?;
            ctx.sink.flush().await?;
        }

        let exit_code = classify_failure(
            &stderr_content,
            transcript,
            &self.config.rate_limit_phrases,
        );
        Ok(AgentOutcome {
            output: transcript.clone(),
            exit_code,
        })
    }
}

#[async_trait]
impl AgentRunner for ClaudeAgent {
    async fn run(&self, mut ctx: AgentContext<'_>) -> Result<AgentOutcome, AgentError> {
        let mut transcript = String::new();
        match self.invoke(&mut ctx, &mut transcript).await {
            Ok(outcome) => Ok(outcome),
            // Sink failures abort the run; they are persistence errors, not
            // agent failures to classify.
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
