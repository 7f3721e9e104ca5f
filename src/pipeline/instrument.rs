use async_stream::stream;
use chrono::Utc;
use futures_util::stream::StreamExt;
use std::time::Instant;

use crate::cancel::{or_cancel, CancellationToken};
use crate::error::StreamError;
use crate::event_bus::EventBus;
use crate::events::{
    StreamCompleted, StreamFailed, StreamLifecycleEvent, StreamProgress, StreamStarted,
};
use crate::operators::FallibleStream;

/// What the instrumented stream announces in its `Started` event
#[derive(Debug, Clone)]
pub(crate) struct RunInfo {
    pub stream_id: String,
    pub description: String,
    pub batch_size: usize,
    pub progress_interval: u64,
    pub expected_items: Option<u64>,
}

/// Publishes the lifecycle of one run and guarantees a single terminal event.
///
/// If the consumer drops the stream before it finished, the drop publishes
/// `Error { Cancelled }` with the count reached so far.
struct Lifecycle {
    bus: Option<EventBus>,
    info: RunInfo,
    started: Instant,
    items: u64,
    finished: bool,
}

impl Lifecycle {
    fn start<T>(bus: Option<EventBus>, info: RunInfo) -> Self {
        let lifecycle = Self {
            bus,
            info,
            started: Instant::now(),
            items: 0,
            finished: false,
        };
        lifecycle.publish(StreamStarted {
            stream_id: lifecycle.info.stream_id.clone(),
            description: lifecycle.info.description.clone(),
            item_type: std::any::type_name::<T>().to_string(),
            item_size_bytes: std::mem::size_of::<T>(),
            batch_size: lifecycle.info.batch_size,
            start_time: Utc::now(),
        });
        lifecycle
    }

    fn item(&mut self) {
        self.items += 1;
        if self.items % self.info.progress_interval == 0 {
            self.publish(StreamProgress {
                stream_id: self.info.stream_id.clone(),
                items_processed: self.items,
                total_items: self.info.expected_items,
                elapsed: self.started.elapsed(),
            });
        }
    }

    fn complete(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.publish(StreamCompleted {
            stream_id: self.info.stream_id.clone(),
            total_items: self.items,
            total_time: self.started.elapsed(),
        });
    }

    fn fail(&mut self, fault: StreamError) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.publish(StreamFailed {
            stream_id: self.info.stream_id.clone(),
            fault,
            items_processed_before_error: self.items,
        });
    }

    fn publish(&self, event: impl Into<StreamLifecycleEvent>) {
        if let Some(bus) = &self.bus {
            bus.publish(&event.into());
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!(
                "Stream {} dropped by its consumer after {} items",
                self.info.stream_id,
                self.items
            );
            self.fail(StreamError::Cancelled);
        }
    }
}

/// Terminal stage of every pipeline run: cancellation boundary plus lifecycle events.
pub(crate) fn instrument<T>(
    s: FallibleStream<T>,
    bus: Option<EventBus>,
    info: RunInfo,
    cancel: CancellationToken,
) -> FallibleStream<T>
where
    T: Send + 'static,
{
    stream! {
        let mut s = s;
        let mut lifecycle = Lifecycle::start::<T>(bus, info);
        loop {
            match or_cancel(s.next(), &cancel).await {
                Ok(Some(Ok(item))) => {
                    lifecycle.item();
                    yield Ok(item);
                }
                Ok(None) => {
                    lifecycle.complete();
                    break;
                }
                Ok(Some(Err(fault))) | Err(fault) => {
                    lifecycle.fail(fault.clone());
                    yield Err(fault);
                    break;
                }
            }
        }
    }
    .boxed()
}
