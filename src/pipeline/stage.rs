use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::{StreamError, StreamResult};
use crate::operators::{self, FallibleStream};
use crate::relay::BackpressureRelay;
use crate::stream_configuration::StreamOptions;

/// Per-run values handed to every stage
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stream_id: String,
    pub options: StreamOptions,
    pub cancel: CancellationToken,
}

/// One pull-stage of a pipeline: wraps the upstream stream in another stream.
pub trait Stage<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this stage already puts a bounded relay between producer and consumer.
    fn is_relay(&self) -> bool {
        false
    }

    /// Reject configurations this stage cannot run with; called by the builder.
    fn validate(&self, _options: &StreamOptions) -> StreamResult<()> {
        Ok(())
    }

    fn apply(&self, input: FallibleStream<T>, ctx: &StageContext) -> StreamResult<FallibleStream<T>>;
}

pub struct ThrottleStage {
    items_per_second: u32,
}

impl ThrottleStage {
    pub fn new(items_per_second: u32) -> Self {
        Self { items_per_second }
    }
}

impl<T: Send + 'static> Stage<T> for ThrottleStage {
    fn name(&self) -> &str {
        "throttle"
    }

    fn validate(&self, _options: &StreamOptions) -> StreamResult<()> {
        if self.items_per_second == 0 {
            return Err(StreamError::validation("items per second must be positive"));
        }
        Ok(())
    }

    fn apply(&self, input: FallibleStream<T>, ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        operators::throttle(input, self.items_per_second, ctx.cancel.clone())
    }
}

pub struct DelayStage {
    every: usize,
    delay: Duration,
}

impl DelayStage {
    pub fn per_item(delay: Duration) -> Self {
        Self { every: 1, delay }
    }

    pub fn per_batch(batch_size: usize, delay: Duration) -> Self {
        Self { every: batch_size, delay }
    }
}

impl<T: Send + 'static> Stage<T> for DelayStage {
    fn name(&self) -> &str {
        if self.every == 1 {
            "delay-between-items"
        } else {
            "delay-between-batches"
        }
    }

    fn validate(&self, _options: &StreamOptions) -> StreamResult<()> {
        if self.every == 0 {
            return Err(StreamError::validation("batch size must be positive"));
        }
        Ok(())
    }

    fn apply(&self, input: FallibleStream<T>, ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        operators::delay_between_batches(input, self.every, self.delay, ctx.cancel.clone())
    }
}

pub struct FilterStage<F> {
    predicate: F,
}

impl<F> FilterStage<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<T, F, Fut> Stage<T> for FilterStage<F>
where
    F: Fn(&T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send,
    T: Send + 'static,
{
    fn name(&self) -> &str {
        "filter"
    }

    fn apply(&self, input: FallibleStream<T>, _ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        Ok(operators::filter(input, self.predicate.clone()))
    }
}

pub struct TransformStage<F> {
    mapping: F,
}

impl<F> TransformStage<F> {
    pub fn new(mapping: F) -> Self {
        Self { mapping }
    }
}

impl<T, F, Fut> Stage<T> for TransformStage<F>
where
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = T> + Send,
    T: Send + 'static,
{
    fn name(&self) -> &str {
        "transform"
    }

    fn apply(&self, input: FallibleStream<T>, _ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        Ok(operators::transform(input, self.mapping.clone()))
    }
}

pub struct ProgressStage {
    callback: Arc<dyn Fn(u64) + Send + Sync>,
    interval: Option<usize>,
}

impl ProgressStage {
    /// Report every `interval` items, or every `progress_update_interval` when `None`
    pub fn new<F>(callback: F, interval: Option<usize>) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            interval,
        }
    }
}

impl<T: Send + 'static> Stage<T> for ProgressStage {
    fn name(&self) -> &str {
        "progress"
    }

    fn validate(&self, _options: &StreamOptions) -> StreamResult<()> {
        if self.interval == Some(0) {
            return Err(StreamError::validation("progress interval must be positive"));
        }
        Ok(())
    }

    fn apply(&self, input: FallibleStream<T>, ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        let callback = Arc::clone(&self.callback);
        let interval = self.interval.unwrap_or(ctx.options.progress_update_interval);
        operators::with_progress(input, move |count| callback(count), interval)
    }
}

pub struct TimeoutStage {
    duration: Duration,
}

impl TimeoutStage {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl<T: Send + 'static> Stage<T> for TimeoutStage {
    fn name(&self) -> &str {
        "timeout"
    }

    fn validate(&self, _options: &StreamOptions) -> StreamResult<()> {
        if self.duration.is_zero() {
            return Err(StreamError::validation("timeout must be greater than zero"));
        }
        Ok(())
    }

    fn apply(&self, input: FallibleStream<T>, ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        operators::timeout(input, self.duration, ctx.cancel.clone())
    }
}

/// Routes the stream through a [`BackpressureRelay`] sized by `max_buffer_size`.
///
/// Lifecycle events are published by the pipeline itself, so the relay runs
/// without a bus here.
pub struct BackpressureStage;

impl<T: Send + 'static> Stage<T> for BackpressureStage {
    fn name(&self) -> &str {
        "backpressure"
    }

    fn is_relay(&self) -> bool {
        true
    }

    fn apply(&self, input: FallibleStream<T>, ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        let relay = BackpressureRelay::from_options(&ctx.options)?.with_stream_id(ctx.stream_id.clone());
        Ok(relay.spawn(input, ctx.cancel.clone()))
    }
}

type StageFn<T> =
    dyn Fn(FallibleStream<T>, &StageContext) -> StreamResult<FallibleStream<T>> + Send + Sync;

/// A named stage built from a closure
pub struct FnStage<T> {
    name: String,
    func: Box<StageFn<T>>,
}

impl<T> FnStage<T> {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(FallibleStream<T>, &StageContext) -> StreamResult<FallibleStream<T>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl<T: Send + 'static> Stage<T> for FnStage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, input: FallibleStream<T>, ctx: &StageContext) -> StreamResult<FallibleStream<T>> {
        (self.func)(input, ctx)
    }
}
