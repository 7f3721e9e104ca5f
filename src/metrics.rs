//! Rolling history of completed-stream summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Snapshots kept by [`MetricsCollector::new`]
pub const DEFAULT_METRICS_CAPACITY: usize = 100;

/// Summary of one finished stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub endpoint_name: String,
    pub items_streamed: u64,
    pub batches_streamed: u64,
    pub average_batch_size: f64,
    pub total_streaming_time: Duration,
    pub items_per_second: f64,
    pub memory_used_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Derive a snapshot from raw totals; batches are `ceil(items / batch_size)`.
    pub fn summarize(
        endpoint_name: impl Into<String>,
        items_streamed: u64,
        batch_size: usize,
        total_streaming_time: Duration,
        memory_used_bytes: u64,
    ) -> Self {
        let batch_size = batch_size.max(1) as u64;
        let batches_streamed = (items_streamed + batch_size - 1) / batch_size;
        let average_batch_size = if batches_streamed > 0 {
            items_streamed as f64 / batches_streamed as f64
        } else {
            0.0
        };
        let seconds = total_streaming_time.as_secs_f64();
        let items_per_second = if seconds > 0.0 {
            items_streamed as f64 / seconds
        } else {
            0.0
        };

        Self {
            endpoint_name: endpoint_name.into(),
            items_streamed,
            batches_streamed,
            average_batch_size,
            total_streaming_time,
            items_per_second,
            memory_used_bytes,
            timestamp: Utc::now(),
        }
    }
}

/// Lock-guarded, bounded FIFO of snapshots; the oldest entry is evicted first
#[derive(Debug)]
pub struct MetricsCollector {
    capacity: usize,
    snapshots: Mutex<VecDeque<MetricsSnapshot>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_METRICS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: Mutex::new(VecDeque::with_capacity(capacity + 1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add(&self, snapshot: MetricsSnapshot) {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.push_back(snapshot);
        while snapshots.len() > self.capacity {
            snapshots.pop_front();
        }
    }

    /// Point-in-time copy, oldest first
    pub fn get_all(&self) -> Vec<MetricsSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<MetricsSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_rounds_batches_up() {
        let snapshot = MetricsSnapshot::summarize("records", 250, 100, Duration::from_secs(2), 0);
        assert_eq!(snapshot.batches_streamed, 3);
        assert!((snapshot.average_batch_size - 250.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.items_per_second, 125.0);
    }

    #[test]
    fn summarize_handles_empty_streams() {
        let snapshot = MetricsSnapshot::summarize("records", 0, 100, Duration::ZERO, 0);
        assert_eq!(snapshot.batches_streamed, 0);
        assert_eq!(snapshot.average_batch_size, 0.0);
        assert_eq!(snapshot.items_per_second, 0.0);
    }
}
