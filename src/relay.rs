//! Bounded producer/consumer relay
//!
//! One spawned producer task pulls from the upstream stream and writes into a
//! fixed-capacity channel; the returned stream is the single consumer. The
//! producer suspends while the channel is full, which caps the memory held
//! between a fast producer and a slow consumer at `capacity` items.

use async_stream::stream;
use chrono::Utc;
use futures_util::stream::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::cancel::{or_cancel, sleep_or_cancel, CancellationToken};
use crate::error::{StreamError, StreamResult};
use crate::event_bus::EventBus;
use crate::events::{StreamCompleted, StreamFailed, StreamProgress, StreamStarted};
use crate::operators::FallibleStream;
use crate::stream_configuration::StreamOptions;

/// Live counters for one relay
#[derive(Debug)]
pub struct RelayStats {
    capacity: usize,
    written: AtomicU64,
    read: AtomicU64,
    peak_depth: AtomicUsize,
}

impl RelayStats {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            written: AtomicU64::new(0),
            read: AtomicU64::new(0),
            peak_depth: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn items_written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    pub fn items_read(&self) -> u64 {
        self.read.load(Ordering::Acquire)
    }

    /// Items written but not yet read (may lag by one while a transfer is in flight)
    pub fn depth(&self) -> usize {
        self.items_written().saturating_sub(self.items_read()) as usize
    }

    /// Highest channel occupancy the producer observed after a write
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Acquire)
    }

    pub fn utilization(&self) -> f64 {
        if self.capacity > 0 {
            self.depth() as f64 / self.capacity as f64
        } else {
            0.0
        }
    }
}

impl fmt::Display for RelayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Relay({}/{}, peak {}, {:.1}%)",
            self.depth(),
            self.capacity,
            self.peak_depth(),
            self.utilization() * 100.0
        )
    }
}

/// Backpressure relay between one producer task and one consumer
pub struct BackpressureRelay {
    capacity: usize,
    progress_interval: u64,
    delay: Duration,
    expected_items: Option<u64>,
    batch_size: usize,
    stream_id: String,
    description: String,
    bus: Option<EventBus>,
    stats: Arc<RelayStats>,
}

impl BackpressureRelay {
    /// Relay with `capacity` slots and default options otherwise
    pub fn new(capacity: usize) -> StreamResult<Self> {
        Self::from_options(&StreamOptions::default().with_max_buffer_size(capacity))
    }

    pub fn from_options(options: &StreamOptions) -> StreamResult<Self> {
        options.validate()?;
        Ok(Self {
            capacity: options.max_buffer_size,
            progress_interval: options.progress_update_interval as u64,
            delay: options.delay(),
            expected_items: options.expected_item_count,
            batch_size: options.batch_size,
            stream_id: uuid::Uuid::new_v4().to_string(),
            description: "backpressure relay".to_string(),
            bus: None,
            stats: Arc::new(RelayStats::new(options.max_buffer_size)),
        })
    }

    /// Publish lifecycle events for this relay's producer on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Start the producer task and return the consumer side.
    ///
    /// The consumer yields every produced item in order, then ends; if the
    /// producer failed, the fault follows the buffered items. Cancellation is
    /// observed by both sides, so the consumer never waits on an abandoned
    /// queue.
    pub fn spawn<T>(self, source: FallibleStream<T>, cancel: CancellationToken) -> FallibleStream<T>
    where
        T: Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<StreamResult<T>>(self.capacity);
        let stats = Arc::clone(&self.stats);
        let consumer_cancel = cancel.clone();

        tokio::spawn(self.produce(source, tx, cancel));

        stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = consumer_cancel.cancelled() => Some(Err(StreamError::Cancelled)),
                    item = rx.recv() => item,
                };
                match next {
                    Some(Ok(item)) => {
                        stats.read.fetch_add(1, Ordering::AcqRel);
                        yield Ok(item);
                    }
                    Some(Err(e)) => {
                        yield Err(e);
                        break;
                    }
                    None => break,
                }
            }
        }
        .boxed()
    }

    async fn produce<T>(
        self,
        mut source: FallibleStream<T>,
        tx: mpsc::Sender<StreamResult<T>>,
        cancel: CancellationToken,
    ) where
        T: Send + 'static,
    {
        let start = Instant::now();
        self.publish(StreamStarted {
            stream_id: self.stream_id.clone(),
            description: self.description.clone(),
            item_type: std::any::type_name::<T>().to_string(),
            item_size_bytes: std::mem::size_of::<T>(),
            batch_size: self.batch_size,
            start_time: Utc::now(),
        });

        let mut written = 0u64;
        let outcome: StreamResult<()> = loop {
            let next = match or_cancel(source.next(), &cancel).await {
                Ok(next) => next,
                Err(cancelled) => break Err(cancelled),
            };
            let item = match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(item)) => item,
            };

            match or_cancel(tx.send(Ok(item)), &cancel).await {
                Ok(Ok(())) => {}
                // consumer dropped its end
                Ok(Err(_)) => break Err(StreamError::Cancelled),
                Err(cancelled) => break Err(cancelled),
            }

            written += 1;
            self.stats.written.fetch_add(1, Ordering::AcqRel);
            let depth = tx.max_capacity() - tx.capacity();
            self.stats.peak_depth.fetch_max(depth, Ordering::AcqRel);

            if written % self.progress_interval == 0 {
                self.publish(StreamProgress {
                    stream_id: self.stream_id.clone(),
                    items_processed: written,
                    total_items: self.expected_items,
                    elapsed: start.elapsed(),
                });
            }

            if let Err(cancelled) = sleep_or_cancel(self.delay, &cancel).await {
                break Err(cancelled);
            }
        };

        match outcome {
            Ok(()) => {
                drop(tx);
                log::debug!(
                    "Relay {} drained {} items in {:?}",
                    self.stream_id,
                    written,
                    start.elapsed()
                );
                self.publish(StreamCompleted {
                    stream_id: self.stream_id.clone(),
                    total_items: written,
                    total_time: start.elapsed(),
                });
            }
            Err(fault) => {
                // A fired relay token is already seen by the consumer; any other
                // fault, upstream `Cancelled` included, follows the buffered items.
                if !cancel.is_cancelled() {
                    let _ = or_cancel(tx.send(Err(fault.clone())), &cancel).await;
                }
                log::warn!(
                    "Relay {} stopped after {} items: {}",
                    self.stream_id,
                    written,
                    fault
                );
                self.publish(StreamFailed {
                    stream_id: self.stream_id.clone(),
                    fault,
                    items_processed_before_error: written,
                });
            }
        }
    }

    fn publish(&self, event: impl Into<crate::events::StreamLifecycleEvent>) {
        if let Some(bus) = &self.bus {
            bus.publish(&event.into());
        }
    }
}

impl fmt::Debug for BackpressureRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackpressureRelay")
            .field("stream_id", &self.stream_id)
            .field("capacity", &self.capacity)
            .field("stats", &self.stats.to_string())
            .finish()
    }
}

/// Route `s` through a relay of `capacity` slots without event publication
pub fn with_backpressure<T>(
    s: FallibleStream<T>,
    capacity: usize,
    cancel: CancellationToken,
) -> StreamResult<FallibleStream<T>>
where
    T: Send + 'static,
{
    Ok(BackpressureRelay::new(capacity)?.spawn(s, cancel))
}
