use futures_core::Stream;
use futures_util::stream::StreamExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use super::instrument::{instrument, RunInfo};
use super::stage::{
    BackpressureStage, DelayStage, FilterStage, FnStage, ProgressStage, Stage, StageContext,
    ThrottleStage, TimeoutStage, TransformStage,
};
use crate::cancel::CancellationToken;
use crate::error::StreamResult;
use crate::event_bus::EventBus;
use crate::operators::{self, FallibleStream};
use crate::retry::{retry_stream, RetryPolicy};
use crate::stream_configuration::StreamOptions;

/// Collects an ordered list of stages; [`build`](Self::build) validates and freezes it.
pub struct PipelineBuilder<T> {
    options: StreamOptions,
    stages: Vec<Box<dyn Stage<T>>>,
    bus: Option<EventBus>,
    description: Option<String>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    pub fn new(options: StreamOptions) -> Self {
        Self {
            options,
            stages: Vec::new(),
            bus: None,
            description: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Runs derive child tokens from `cancel`; cancelling it stops every run.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stage<S>(mut self, stage: S) -> Self
    where
        S: Stage<T> + 'static,
    {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn named_stage<F>(self, name: &str, func: F) -> Self
    where
        F: Fn(FallibleStream<T>, &StageContext) -> StreamResult<FallibleStream<T>>
            + Send
            + Sync
            + 'static,
    {
        self.stage(FnStage::new(name, func))
    }

    pub fn throttle(self, items_per_second: u32) -> Self {
        self.stage(ThrottleStage::new(items_per_second))
    }

    pub fn delay_between_items(self, delay: Duration) -> Self {
        self.stage(DelayStage::per_item(delay))
    }

    pub fn delay_between_batches(self, batch_size: usize, delay: Duration) -> Self {
        self.stage(DelayStage::per_batch(batch_size, delay))
    }

    pub fn filter<F, Fut>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send,
    {
        self.stage(FilterStage::new(predicate))
    }

    pub fn transform<F, Fut>(self, mapping: F) -> Self
    where
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = T> + Send,
    {
        self.stage(TransformStage::new(mapping))
    }

    /// Report the running count every `progress_update_interval` items
    pub fn progress<F>(self, callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.stage(ProgressStage::new(callback, None))
    }

    pub fn timeout(self, duration: Duration) -> Self {
        self.stage(TimeoutStage::new(duration))
    }

    pub fn backpressure(self) -> Self {
        self.stage(BackpressureStage)
    }

    /// Validate options and stages, then append the stages implied by the
    /// options: a relay when backpressure is enabled and none was added (the
    /// relay applies `delay_between_items`), a per-item delay otherwise, and a
    /// timeout when one is configured.
    pub fn build(mut self) -> StreamResult<Pipeline<T>> {
        self.options.validate()?;

        let has_relay = self.stages.iter().any(|s| s.is_relay());
        if self.options.enable_backpressure && !has_relay {
            self.stages.push(Box::new(BackpressureStage));
        } else if !self.options.enable_backpressure && self.options.delay_between_items > 0 {
            self.stages.push(Box::new(DelayStage::per_item(self.options.delay())));
        }
        if let Some(timeout) = self.options.timeout() {
            self.stages.push(Box::new(TimeoutStage::new(timeout)));
        }

        for stage in &self.stages {
            stage.validate(&self.options)?;
        }

        Ok(Pipeline {
            description: self
                .description
                .unwrap_or_else(|| std::any::type_name::<T>().to_string()),
            options: self.options,
            stages: self.stages,
            bus: self.bus,
            cancel: self.cancel,
        })
    }
}

/// A validated, reusable chain of stages; every [`run`](Self::run) is a new stream instance.
pub struct Pipeline<T> {
    options: StreamOptions,
    stages: Vec<Box<dyn Stage<T>>>,
    bus: Option<EventBus>,
    description: String,
    cancel: CancellationToken,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn builder(options: StreamOptions) -> PipelineBuilder<T> {
        PipelineBuilder::new(options)
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Cancel every run started from this pipeline
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Wrap `source` in every stage, in order, and instrument the result.
    pub fn run(&self, source: FallibleStream<T>) -> StreamResult<RunningStream<T>> {
        let ctx = StageContext {
            stream_id: uuid::Uuid::new_v4().to_string(),
            options: self.options.clone(),
            cancel: self.cancel.child_token(),
        };

        let mut stream = source;
        for stage in &self.stages {
            log::debug!(
                "Pipeline '{}': applying stage '{}' to stream {}",
                self.description,
                stage.name(),
                ctx.stream_id
            );
            stream = stage.apply(stream, &ctx)?;
        }

        let info = RunInfo {
            stream_id: ctx.stream_id.clone(),
            description: self.description.clone(),
            batch_size: self.options.batch_size,
            progress_interval: self.options.progress_update_interval as u64,
            expected_items: self.options.expected_item_count,
        };

        Ok(RunningStream {
            stream_id: ctx.stream_id,
            inner: instrument(stream, self.bus.clone(), info, ctx.cancel.clone()),
            cancel: ctx.cancel,
        })
    }

    /// Like [`run`](Self::run), then group the items into `batch_size` chunks.
    pub fn run_chunked(&self, source: FallibleStream<T>) -> StreamResult<RunningStream<Vec<T>>> {
        let running = self.run(source)?;
        let inner = operators::chunk(running.inner, self.options.batch_size)?;
        Ok(RunningStream {
            stream_id: running.stream_id,
            cancel: running.cancel,
            inner,
        })
    }

    /// Run over a source that is re-created by `factory` when it fails
    /// transiently before yielding anything.
    pub fn run_retrying<F>(&self, policy: RetryPolicy, factory: F) -> StreamResult<RunningStream<T>>
    where
        F: FnMut() -> FallibleStream<T> + Send + 'static,
    {
        let source = retry_stream(policy, self.cancel.child_token(), factory);
        self.run(source)
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("description", &self.description)
            .field("options", &self.options)
            .field("stages", &names)
            .finish()
    }
}

/// One running instance of a pipeline
pub struct RunningStream<T> {
    stream_id: String,
    cancel: CancellationToken,
    inner: FallibleStream<T>,
}

impl<T> RunningStream<T> {
    /// Id carried by every lifecycle event of this run
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation; the next pull yields `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_inner(self) -> FallibleStream<T> {
        self.inner
    }
}

impl<T> Stream for RunningStream<T> {
    type Item = StreamResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
