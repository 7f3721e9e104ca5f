//! Configuration types for record stream pipelines

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{StreamError, StreamResult};

/// Options recognised by every pipeline stage.
///
/// Stages copy the values they need when they are constructed, so changing an
/// options value afterwards has no effect on an already-built pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamOptions {
    pub batch_size: usize,
    pub max_buffer_size: usize,
    /// Milliseconds to wait after each item written by the relay producer
    pub delay_between_items: u64,
    pub progress_update_interval: usize,
    pub expected_item_count: Option<u64>,
    pub enable_backpressure: bool,
    /// Milliseconds allowed between two successful pulls; JSON accepts `timeout` too
    #[serde(alias = "timeout")]
    pub timeout_ms: Option<u64>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_buffer_size: 1000,
            delay_between_items: 0,
            progress_update_interval: 100,
            expected_item_count: None,
            enable_backpressure: true,
            timeout_ms: None,
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON object with camelCase keys; missing keys keep their defaults.
    pub fn from_json(json: &str) -> StreamResult<Self> {
        let options: StreamOptions = serde_json::from_str(json)
            .map_err(|e| StreamError::validation(format!("unreadable options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_delay(mut self, milliseconds: u64) -> Self {
        self.delay_between_items = milliseconds;
        self
    }

    pub fn with_progress_interval(mut self, items: usize) -> Self {
        self.progress_update_interval = items;
        self
    }

    pub fn with_expected_count(mut self, count: u64) -> Self {
        self.expected_item_count = Some(count);
        self
    }

    pub fn with_backpressure(mut self, enabled: bool) -> Self {
        self.enable_backpressure = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_between_items)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> StreamResult<()> {
        if self.batch_size == 0 {
            return Err(StreamError::validation("batch size must be positive"));
        }
        if self.max_buffer_size == 0 {
            return Err(StreamError::validation("max buffer size must be positive"));
        }
        if self.progress_update_interval == 0 {
            return Err(StreamError::validation("progress update interval must be positive"));
        }
        if self.timeout_ms == Some(0) {
            return Err(StreamError::validation("timeout must be greater than zero"));
        }
        Ok(())
    }
}
