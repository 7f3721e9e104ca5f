//! Event bus subscribers shipped with the crate
//!
//! Each subscriber keeps its [`Subscription`]s alive for as long as it is
//! held; dropping it detaches it from the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::event_bus::{EventBus, HandlerResult, Subscription};
use crate::events::{EventKind, StreamLifecycleEvent, StreamStarted};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::monitor::StreamPerformanceMonitor;

type StartedIndex = Arc<Mutex<HashMap<String, StreamStarted>>>;

fn remember(index: &StartedIndex, started: &StreamStarted) {
    index
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(started.stream_id.clone(), started.clone());
}

fn forget(index: &StartedIndex, stream_id: &str) -> Option<StreamStarted> {
    index
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(stream_id)
}

/// Logs every lifecycle event through the `log` facade
pub struct LoggingSubscriber {
    _subscription: Subscription,
}

impl LoggingSubscriber {
    pub fn attach(bus: &EventBus) -> Self {
        let subscription = bus.subscribe_all(|event| {
            match event {
                StreamLifecycleEvent::Started(e) => log::info!(
                    "Stream {} started for type {} with batch size {}",
                    e.stream_id,
                    e.item_type,
                    e.batch_size
                ),
                StreamLifecycleEvent::Progress(e) => match e.total_items {
                    Some(total) => log::info!(
                        "Stream {} progress: {}/{} items in {:?}",
                        e.stream_id,
                        e.items_processed,
                        total,
                        e.elapsed
                    ),
                    None => log::info!(
                        "Stream {} progress: {} items in {:?}",
                        e.stream_id,
                        e.items_processed,
                        e.elapsed
                    ),
                },
                StreamLifecycleEvent::Completed(e) => log::info!(
                    "Stream {} completed: {} items in {:?}",
                    e.stream_id,
                    e.total_items,
                    e.total_time
                ),
                StreamLifecycleEvent::Error(e) => log::error!(
                    "Stream {} error after processing {} items: {}",
                    e.stream_id,
                    e.items_processed_before_error,
                    e.fault
                ),
            }
            Ok(())
        });
        Self {
            _subscription: subscription,
        }
    }
}

/// Turns `Completed` events into [`MetricsSnapshot`]s
///
/// The endpoint name, batch size and item size come from the matching
/// `Started` event; memory is estimated as items times item size.
pub struct MetricsRecorder {
    collector: Arc<MetricsCollector>,
    _subscriptions: Vec<Subscription>,
}

impl MetricsRecorder {
    pub fn attach(bus: &EventBus, collector: Arc<MetricsCollector>) -> Self {
        let started: StartedIndex = Arc::default();

        let on_started = {
            let started = Arc::clone(&started);
            bus.subscribe(EventKind::Started, move |event| {
                if let StreamLifecycleEvent::Started(e) = event {
                    remember(&started, e);
                }
                Ok(())
            })
        };

        let on_completed = {
            let started = Arc::clone(&started);
            let collector = Arc::clone(&collector);
            bus.subscribe(EventKind::Completed, move |event| {
                if let StreamLifecycleEvent::Completed(e) = event {
                    let (name, batch_size, item_size) = match forget(&started, &e.stream_id) {
                        Some(s) => (s.description, s.batch_size, s.item_size_bytes as u64),
                        None => (e.stream_id.clone(), 1, 0),
                    };
                    collector.add(MetricsSnapshot::summarize(
                        name,
                        e.total_items,
                        batch_size,
                        e.total_time,
                        e.total_items.saturating_mul(item_size),
                    ));
                }
                Ok(())
            })
        };

        let on_error = {
            let started = Arc::clone(&started);
            bus.subscribe(EventKind::Error, move |event| {
                forget(&started, event.stream_id());
                Ok(())
            })
        };

        Self {
            collector,
            _subscriptions: vec![on_started, on_completed, on_error],
        }
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }
}

/// Mirrors lifecycle events into a [`StreamPerformanceMonitor`]
pub struct MonitorFeed {
    monitor: Arc<StreamPerformanceMonitor>,
    _subscription: Subscription,
}

impl MonitorFeed {
    pub fn attach(bus: &EventBus, monitor: Arc<StreamPerformanceMonitor>) -> Self {
        let item_sizes: Arc<Mutex<HashMap<String, u64>>> = Arc::default();
        let feed = Arc::clone(&monitor);

        let subscription = bus.subscribe_all(move |event| -> HandlerResult {
            match event {
                StreamLifecycleEvent::Started(e) => {
                    item_sizes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(e.stream_id.clone(), e.item_size_bytes as u64);
                    feed.track_stream(e.stream_id.clone(), e.description.clone())?;
                }
                StreamLifecycleEvent::Progress(e) => {
                    let item_size = item_sizes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&e.stream_id)
                        .copied()
                        .unwrap_or(0);
                    feed.update_progress(
                        &e.stream_id,
                        e.items_processed,
                        e.items_processed.saturating_mul(item_size),
                    );
                }
                StreamLifecycleEvent::Completed(e) => {
                    item_sizes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&e.stream_id);
                    feed.update_progress(&e.stream_id, e.total_items, 0);
                    feed.complete_stream(&e.stream_id);
                }
                StreamLifecycleEvent::Error(e) => {
                    item_sizes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&e.stream_id);
                    feed.update_progress(&e.stream_id, e.items_processed_before_error, 0);
                    feed.error_stream(&e.stream_id, e.fault.clone());
                }
            }
            Ok(())
        });

        Self {
            monitor,
            _subscription: subscription,
        }
    }

    pub fn monitor(&self) -> &Arc<StreamPerformanceMonitor> {
        &self.monitor
    }
}
