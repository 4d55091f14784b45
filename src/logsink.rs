//! Log sink abstraction for streaming agent transcripts into the run's
//! persisted log.
//!
//! The agent adapters write incremental text here as it arrives; the sink
//! buffers and posts complete lines to the backend so partial progress
//! survives a crash mid-iteration. Within one iteration there is exactly one
//! writer — ordering of persisted entries matches production order.

use async_trait::async_trait;

use crate::client::BackendClient;
use crate::errors::ClientError;

/// Flush the buffer once it grows past this even without a newline, so a
/// long-running tool call still checkpoints its output.
const FLUSH_THRESHOLD_BYTES: usize = 4096;

#[async_trait]
pub trait LogSink: Send {
    /// Buffer incremental text. Complete lines may be persisted eagerly.
    async fn append(&mut self, text: &str) -> Result<(), ClientError>;

    /// Persist anything still buffered. Called at iteration boundaries.
    async fn flush(&mut self) -> Result<(), ClientError>;
}

/// Sink that appends to a run's log through the backend client, one log
/// entry per line.
pub struct BackendLogSink<'a> {
    client: &'a BackendClient,
    run_id: String,
    buffer: String,
}

impl<'a> BackendLogSink<'a> {
    pub fn new(client: &'a BackendClient, run_id: impl Into<String>) -> Self {
        Self {
            client,
            run_id: run_id.into(),
            buffer: String::new(),
        }
    }

    async fn drain_complete_lines(&mut self) -> Result<(), ClientError> {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches('\n');
            if !line.is_empty() {
                self.client.append_log(&self.run_id, line).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for BackendLogSink<'_> {
    async fn append(&mut self, text: &str) -> Result<(), ClientError> {
        self.buffer.push_str(text);
        self.drain_complete_lines().await?;
        if self.buffer.len() >= FLUSH_THRESHOLD_BYTES {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        self.drain_complete_lines().await?;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.client.append_log(&self.run_id, &rest).await?;
        }
        Ok(())
    }
}
