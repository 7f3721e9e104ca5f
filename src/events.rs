//! Stream lifecycle events published on the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::StreamError;

/// Discriminant used to key event bus subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Started,
    Progress,
    Completed,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Started,
        EventKind::Progress,
        EventKind::Completed,
        EventKind::Error,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Started => "StreamStarted",
            EventKind::Progress => "StreamProgress",
            EventKind::Completed => "StreamCompleted",
            EventKind::Error => "StreamError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStarted {
    pub stream_id: String,
    /// Human readable name of what is being streamed
    pub description: String,
    /// Rust type name of the streamed items
    pub item_type: String,
    pub item_size_bytes: usize,
    pub batch_size: usize,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProgress {
    pub stream_id: String,
    pub items_processed: u64,
    /// Expected total when the producer announced one
    pub total_items: Option<u64>,
    pub elapsed: Duration,
}

impl StreamProgress {
    /// Fraction of the expected total reached, when a total is known.
    pub fn ratio(&self) -> Option<f64> {
        match self.total_items {
            Some(total) if total > 0 => Some(self.items_processed as f64 / total as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCompleted {
    pub stream_id: String,
    pub total_items: u64,
    pub total_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFailed {
    pub stream_id: String,
    pub fault: StreamError,
    pub items_processed_before_error: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamLifecycleEvent {
    Started(StreamStarted),
    Progress(StreamProgress),
    Completed(StreamCompleted),
    Error(StreamFailed),
}

impl StreamLifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamLifecycleEvent::Started(_) => EventKind::Started,
            StreamLifecycleEvent::Progress(_) => EventKind::Progress,
            StreamLifecycleEvent::Completed(_) => EventKind::Completed,
            StreamLifecycleEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn stream_id(&self) -> &str {
        match self {
            StreamLifecycleEvent::Started(e) => &e.stream_id,
            StreamLifecycleEvent::Progress(e) => &e.stream_id,
            StreamLifecycleEvent::Completed(e) => &e.stream_id,
            StreamLifecycleEvent::Error(e) => &e.stream_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamLifecycleEvent::Completed(_) | StreamLifecycleEvent::Error(_)
        )
    }
}

impl From<StreamStarted> for StreamLifecycleEvent {
    fn from(event: StreamStarted) -> Self {
        StreamLifecycleEvent::Started(event)
    }
}

impl From<StreamProgress> for StreamLifecycleEvent {
    fn from(event: StreamProgress) -> Self {
        StreamLifecycleEvent::Progress(event)
    }
}

impl From<StreamCompleted> for StreamLifecycleEvent {
    fn from(event: StreamCompleted) -> Self {
        StreamLifecycleEvent::Completed(event)
    }
}

impl From<StreamFailed> for StreamLifecycleEvent {
    fn from(event: StreamFailed) -> Self {
        StreamLifecycleEvent::Error(event)
    }
}
