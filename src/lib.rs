pub mod analytics;
pub mod cancel;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod operators;
pub mod pipeline;
pub mod relay;
pub mod retry;
pub mod source;
pub mod stream_configuration;
pub mod subscribers;
pub mod transport;

// Core stream types at the crate root
pub use cancel::CancellationToken;
pub use error::{FaultKind, StreamError, StreamResult};
pub use event_bus::{EventBus, Subscription};
pub use events::{EventKind, StreamLifecycleEvent};
pub use operators::FallibleStream;
pub use pipeline::{Pipeline, PipelineBuilder, RunningStream};
pub use relay::{with_backpressure, BackpressureRelay, RelayStats};
pub use retry::{retry, retry_stream, RetryPolicy};
pub use stream_configuration::StreamOptions;
