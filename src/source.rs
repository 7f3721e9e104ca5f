//! Demo record producer
//!
//! Stands in for the service's sample-data generator: records are produced in
//! batches with a pause after each batch. Values are derived from the id so
//! runs are reproducible.

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cancel::{sleep_or_cancel, CancellationToken};
use crate::error::{StreamError, StreamResult};
use crate::operators::FallibleStream;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: u64,
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl DataRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("Item {}", id),
            value: (id.wrapping_mul(7919) % 100_000) as f64 / 100.0,
            timestamp: Utc::now(),
        }
    }
}

/// Produce `total` records, `batch_size` at a time, pausing `delay` between batches.
pub fn generate_records(
    total: u64,
    batch_size: usize,
    delay: Duration,
    cancel: CancellationToken,
) -> StreamResult<FallibleStream<DataRecord>> {
    if batch_size == 0 {
        return Err(StreamError::validation("batch size must be positive"));
    }

    Ok(stream! {
        let mut produced = 0u64;
        while produced < total {
            if cancel.is_cancelled() {
                yield Err(StreamError::Cancelled);
                return;
            }
            let current = (batch_size as u64).min(total - produced);
            for id in produced..produced + current {
                yield Ok(DataRecord::new(id));
            }
            produced += current;

            if produced < total {
                if let Err(cancelled) = sleep_or_cancel(delay, &cancel).await {
                    yield Err(cancelled);
                    return;
                }
            }
        }
    }
    .boxed())
}
