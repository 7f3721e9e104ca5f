//! Live registry of in-flight streams
//!
//! Entries are created when a stream starts, updated as progress arrives, and
//! removed on completion or error. The removed state is handed back so the
//! caller can inspect the final numbers.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{StreamError, StreamResult};

/// Progress updates are logged when the item count is a multiple of this
pub const PROGRESS_LOG_EVERY: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ActiveStreamState {
    pub stream_id: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub items_processed: u64,
    /// Items per second since the stream started
    pub processing_rate: f64,
    pub current_memory_usage: u64,
    pub fault: Option<StreamError>,
    clock: Instant,
    elapsed_at_end: Option<Duration>,
}

impl ActiveStreamState {
    fn new(stream_id: String, description: String) -> Self {
        Self {
            stream_id,
            description,
            start_time: Utc::now(),
            end_time: None,
            items_processed: 0,
            processing_rate: 0.0,
            current_memory_usage: 0,
            fault: None,
            clock: Instant::now(),
            elapsed_at_end: None,
        }
    }

    /// Time since start, frozen once the stream finished
    pub fn duration(&self) -> Duration {
        self.elapsed_at_end.unwrap_or_else(|| self.clock.elapsed())
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    fn finish(&mut self) {
        self.elapsed_at_end = Some(self.clock.elapsed());
        self.end_time = Some(Utc::now());
    }
}

#[derive(Debug, Default)]
pub struct StreamPerformanceMonitor {
    active: RwLock<HashMap<String, ActiveStreamState>>,
}

impl StreamPerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream under a freshly generated id
    pub fn start_stream(&self, description: impl Into<String>) -> String {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let stream_id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !active.contains_key(&candidate) {
                break candidate;
            }
        };
        let description = description.into();
        log::info!("Started stream {}: {}", stream_id, description);
        active.insert(
            stream_id.clone(),
            ActiveStreamState::new(stream_id.clone(), description),
        );
        stream_id
    }

    /// Register a stream whose id was assigned elsewhere (e.g. by a pipeline)
    pub fn track_stream(
        &self,
        stream_id: impl Into<String>,
        description: impl Into<String>,
    ) -> StreamResult<()> {
        let stream_id = stream_id.into();
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(&stream_id) {
            return Err(StreamError::validation(format!(
                "stream {} is already being tracked",
                stream_id
            )));
        }
        let description = description.into();
        log::info!("Started stream {}: {}", stream_id, description);
        active.insert(
            stream_id.clone(),
            ActiveStreamState::new(stream_id, description),
        );
        Ok(())
    }

    /// Record progress; returns `false` for unknown ids
    pub fn update_progress(&self, stream_id: &str, items_processed: u64, memory_used: u64) -> bool {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = active.get_mut(stream_id) else {
            return false;
        };

        state.items_processed = items_processed;
        state.current_memory_usage = memory_used;
        let seconds = state.clock.elapsed().as_secs_f64();
        state.processing_rate = if seconds > 0.0 {
            items_processed as f64 / seconds
        } else {
            0.0
        };

        if items_processed > 0 && items_processed % PROGRESS_LOG_EVERY == 0 {
            log::info!(
                "Stream {}: Processed {} items at {:.1} items/sec, Memory: {:.2} MB",
                stream_id,
                items_processed,
                state.processing_rate,
                memory_used as f64 / (1024.0 * 1024.0)
            );
        }
        true
    }

    /// Remove a finished stream and return its final state
    pub fn complete_stream(&self, stream_id: &str) -> Option<ActiveStreamState> {
        let mut state = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stream_id)?;
        state.finish();
        log::info!(
            "Completed stream {}: {} items in {:?}, Average rate: {:.1} items/sec",
            stream_id,
            state.items_processed,
            state.duration(),
            state.processing_rate
        );
        Some(state)
    }

    /// Remove a failed stream, attaching the fault to its final state
    pub fn error_stream(&self, stream_id: &str, fault: StreamError) -> Option<ActiveStreamState> {
        let mut state = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stream_id)?;
        state.finish();
        log::error!(
            "Error in stream {} after processing {} items: {}",
            stream_id,
            state.items_processed,
            fault
        );
        state.fault = Some(fault);
        Some(state)
    }

    pub fn get(&self, stream_id: &str) -> Option<ActiveStreamState> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream_id)
            .cloned()
    }

    /// Snapshot of every stream still in flight
    pub fn active_streams(&self) -> Vec<ActiveStreamState> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
