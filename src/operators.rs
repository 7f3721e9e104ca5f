//! Sequence operators over lazily-pulled record streams
//!
//! Every operator takes a [`FallibleStream`] and returns a new one. Nothing is
//! pulled from upstream until the consumer polls. A fault is terminal: the
//! operator yields it once and ends. Operators that suspend (throttle, delays,
//! timeout) also wake on the cancellation token and yield
//! [`StreamError::Cancelled`].

use async_stream::stream;
use futures_core::Stream;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::time::Duration;

use crate::cancel::{or_cancel, sleep_or_cancel, CancellationToken};
use crate::error::{StreamError, StreamResult};

pub use crate::retry::retry_stream;

/// A boxed stream whose items are `Ok(value)` until an optional terminal `Err(fault)`.
pub type FallibleStream<T> = BoxStream<'static, StreamResult<T>>;

// ================================
// Constructors
// ================================

/// Lift an iterator into a stream of successful items
pub fn from_iter<I, T>(iter: I) -> FallibleStream<T>
where
    I: IntoIterator<Item = T> + Send + 'static,
    <I as IntoIterator>::IntoIter: Send,
    T: Send + 'static,
{
    stream::iter(iter.into_iter().map(Ok)).boxed()
}

/// Lift an infallible stream
pub fn from_stream<S, T>(s: S) -> FallibleStream<T>
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    s.map(Ok).boxed()
}

/// Adopt a stream that already yields results, ending it at its first fault
pub fn from_results<S, T>(s: S) -> FallibleStream<T>
where
    S: Stream<Item = StreamResult<T>> + Send + 'static,
    T: Send + 'static,
{
    stream! {
        futures_util::pin_mut!(s);
        while let Some(item) = s.next().await {
            let failed = item.is_err();
            yield item;
            if failed {
                break;
            }
        }
    }
    .boxed()
}

// ================================
// Batching
// ================================

/// Group items into vectors of `size`; the last vector may be shorter.
///
/// Fails before anything is pulled when `size` is zero. A fault discards the
/// partially filled chunk.
pub fn chunk<T>(s: FallibleStream<T>, size: usize) -> StreamResult<FallibleStream<Vec<T>>>
where
    T: Send + 'static,
{
    if size == 0 {
        return Err(StreamError::validation("chunk size must be positive"));
    }

    Ok(stream! {
        let mut s = s;
        let mut buf = Vec::with_capacity(size);
        while let Some(item) = s.next().await {
            match item {
                Ok(value) => {
                    buf.push(value);
                    if buf.len() == size {
                        yield Ok(std::mem::replace(&mut buf, Vec::with_capacity(size)));
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if !buf.is_empty() {
            yield Ok(buf);
        }
    }
    .boxed())
}

// ================================
// Rate control
// ================================

/// Emit at most `items_per_second`, sleeping a fixed interval after every item.
///
/// This is fixed-interval pacing: no burst credit accumulates while the
/// consumer is slow.
pub fn throttle<T>(
    s: FallibleStream<T>,
    items_per_second: u32,
    cancel: CancellationToken,
) -> StreamResult<FallibleStream<T>>
where
    T: Send + 'static,
{
    if items_per_second == 0 {
        return Err(StreamError::validation("items per second must be positive"));
    }
    let interval = Duration::from_secs_f64(1.0 / items_per_second as f64);
    Ok(pace(s, 1, interval, cancel))
}

/// Suspend for `delay` after every item
pub fn delay_between_items<T>(
    s: FallibleStream<T>,
    delay: Duration,
    cancel: CancellationToken,
) -> FallibleStream<T>
where
    T: Send + 'static,
{
    pace(s, 1, delay, cancel)
}

/// Suspend for `delay` after every `batch_size` items
pub fn delay_between_batches<T>(
    s: FallibleStream<T>,
    batch_size: usize,
    delay: Duration,
    cancel: CancellationToken,
) -> StreamResult<FallibleStream<T>>
where
    T: Send + 'static,
{
    if batch_size == 0 {
        return Err(StreamError::validation("batch size must be positive"));
    }
    Ok(pace(s, batch_size, delay, cancel))
}

fn pace<T>(
    s: FallibleStream<T>,
    every: usize,
    delay: Duration,
    cancel: CancellationToken,
) -> FallibleStream<T>
where
    T: Send + 'static,
{
    if delay.is_zero() {
        return s;
    }

    stream! {
        let mut s = s;
        let mut count = 0usize;
        while let Some(item) = s.next().await {
            match item {
                Ok(value) => {
                    yield Ok(value);
                    count += 1;
                    if count % every == 0 {
                        if let Err(cancelled) = sleep_or_cancel(delay, &cancel).await {
                            yield Err(cancelled);
                            return;
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
    .boxed()
}

// ================================
// Element-wise stages
// ================================

/// Keep items for which the async predicate holds
pub fn filter<T, F, Fut>(s: FallibleStream<T>, mut predicate: F) -> FallibleStream<T>
where
    F: FnMut(&T) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
    T: Send + 'static,
{
    stream! {
        let mut s = s;
        while let Some(item) = s.next().await {
            match item {
                Ok(value) => {
                    if predicate(&value).await {
                        yield Ok(value);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
    .boxed()
}

/// Map every item through an async function
pub fn transform<T, U, F, Fut>(s: FallibleStream<T>, mut f: F) -> FallibleStream<U>
where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = U> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    stream! {
        let mut s = s;
        while let Some(item) = s.next().await {
            match item {
                Ok(value) => yield Ok(f(value).await),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
    .boxed()
}

/// Map every item through an async function that may fail
pub fn try_transform<T, U, F, Fut>(s: FallibleStream<T>, mut f: F) -> FallibleStream<U>
where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = StreamResult<U>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    stream! {
        let mut s = s;
        while let Some(item) = s.next().await {
            let mapped = match item {
                Ok(value) => f(value).await,
                Err(e) => Err(e),
            };
            let failed = mapped.is_err();
            yield mapped;
            if failed {
                return;
            }
        }
    }
    .boxed()
}

// ================================
// Instrumentation and guards
// ================================

/// Call `callback` with the running count after every `interval` items
pub fn with_progress<T, F>(
    s: FallibleStream<T>,
    mut callback: F,
    interval: usize,
) -> StreamResult<FallibleStream<T>>
where
    F: FnMut(u64) + Send + 'static,
    T: Send + 'static,
{
    if interval == 0 {
        return Err(StreamError::validation("progress interval must be positive"));
    }

    Ok(stream! {
        let mut s = s;
        let mut count = 0u64;
        while let Some(item) = s.next().await {
            match item {
                Ok(value) => {
                    yield Ok(value);
                    count += 1;
                    if count % interval as u64 == 0 {
                        callback(count);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
    .boxed())
}

/// End with [`StreamError::Timeout`] when the next item takes longer than `duration`
pub fn timeout<T>(
    s: FallibleStream<T>,
    duration: Duration,
    cancel: CancellationToken,
) -> StreamResult<FallibleStream<T>>
where
    T: Send + 'static,
{
    if duration.is_zero() {
        return Err(StreamError::validation("timeout must be greater than zero"));
    }

    Ok(stream! {
        let mut s = s;
        loop {
            match tokio::time::timeout(duration, or_cancel(s.next(), &cancel)).await {
                Ok(Ok(Some(Ok(value)))) => yield Ok(value),
                Ok(Ok(None)) => break,
                Ok(Ok(Some(Err(e)))) | Ok(Err(e)) => {
                    yield Err(e);
                    break;
                }
                Err(elapsed) => {
                    log::warn!("No item arrived within {:?}", duration);
                    yield Err(StreamError::from(elapsed));
                    break;
                }
            }
        }
    }
    .boxed())
}

/// Race every pull against `cancel`; once it fires, yield `Cancelled` and end
pub fn with_cancellation<T>(s: FallibleStream<T>, cancel: CancellationToken) -> FallibleStream<T>
where
    T: Send + 'static,
{
    stream! {
        let mut s = s;
        loop {
            match or_cancel(s.next(), &cancel).await {
                Ok(Some(Ok(value))) => yield Ok(value),
                Ok(None) => break,
                Ok(Some(Err(e))) | Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
    .boxed()
}
