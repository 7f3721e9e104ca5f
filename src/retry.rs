//! Bounded exponential-backoff retry
//!
//! The same [`RetryPolicy`] drives three call sites: a single async call
//! ([`retry`]), a sequence-producing call ([`retry_stream`]) and the outbound
//! request layer ([`RetryingSender`]).

use async_stream::stream;
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use std::future::Future;
use std::time::Duration;

use crate::cancel::{sleep_or_cancel, CancellationToken};
use crate::error::{FaultKind, StreamError, StreamResult, DEFAULT_TRANSIENT_STATUS_CODES};
use crate::operators::FallibleStream;

/// Retry policy with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: usize,
    /// Delay before the second attempt; doubled for each later attempt
    pub initial_delay: Duration,
    pub transient_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            transient_status_codes: DEFAULT_TRANSIENT_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Default::default()
        }
    }

    pub fn with_transient_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.transient_status_codes = codes.into();
        self
    }

    pub fn is_transient(&self, err: &StreamError) -> bool {
        err.kind_with(&self.transient_status_codes) == FaultKind::Transient
    }

    pub fn is_transient_status(&self, code: u16) -> bool {
        self.transient_status_codes.contains(&code)
    }

    /// Delay to wait before `attempt` (1-based): zero for the first, then
    /// `initial_delay * 2^(attempt - 2)`.
    pub fn delay_before(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31) as u32;
        self.initial_delay.saturating_mul(1u32 << exponent)
    }

    fn attempts(&self) -> usize {
        self.max_retries.max(1)
    }
}

/// Call `op` until it succeeds, fails with a non-transient fault, or the
/// attempt budget is spent. The last fault is returned on exhaustion.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> StreamResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StreamResult<T>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !policy.is_transient(&e) => return Err(e),
            Err(e) if attempt >= max_attempts => {
                log::warn!("Giving up after {} attempts: {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_before(attempt + 1);
                log::warn!(
                    "Call failed with {}. Retrying in {}ms. Attempt {}/{}",
                    e,
                    delay.as_millis(),
                    attempt,
                    max_attempts
                );
                sleep_or_cancel(delay, cancel).await?;
                attempt += 1;
            }
        }
    }
}

/// Retry a sequence-producing call.
///
/// A transient fault raised before the current attempt yielded anything
/// restarts the sequence from `factory`. Once an item has been yielded the
/// fault is forwarded as-is, so consumers never see an item twice.
pub fn retry_stream<T, F>(
    policy: RetryPolicy,
    cancel: CancellationToken,
    mut factory: F,
) -> FallibleStream<T>
where
    F: FnMut() -> FallibleStream<T> + Send + 'static,
    T: Send + 'static,
{
    stream! {
        let max_attempts = policy.attempts();
        let mut attempt = 1;
        'attempts: loop {
            let mut source = factory();
            let mut yielded = false;
            while let Some(item) = source.next().await {
                match item {
                    Ok(value) => {
                        yielded = true;
                        yield Ok(value);
                    }
                    Err(e) => {
                        if yielded || !policy.is_transient(&e) || attempt >= max_attempts {
                            yield Err(e);
                            break 'attempts;
                        }
                        let delay = policy.delay_before(attempt + 1);
                        log::warn!(
                            "Sequence failed with {}. Restarting in {}ms. Attempt {}/{}",
                            e,
                            delay.as_millis(),
                            attempt,
                            max_attempts
                        );
                        if let Err(cancelled) = sleep_or_cancel(delay, &cancel).await {
                            yield Err(cancelled);
                            break 'attempts;
                        }
                        attempt += 1;
                        continue 'attempts;
                    }
                }
            }
            break;
        }
    }
    .boxed()
}

/// A response carrying an HTTP-like status code
pub trait StatusResponse {
    fn status_code(&self) -> u16;

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }
}

/// Outbound request seam; implemented by the transport collaborator.
#[async_trait]
pub trait RequestSender: Send + Sync {
    type Request: Clone + Send + Sync + 'static;
    type Response: StatusResponse + Send;

    async fn send(&self, request: Self::Request) -> StreamResult<Self::Response>;
}

/// Wraps a [`RequestSender`] with the retry policy.
///
/// Transient status codes are retried like transient faults; when the budget
/// is spent the last response is handed back to the caller unchanged.
pub struct RetryingSender<S> {
    inner: S,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<S> RetryingSender<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> RequestSender for RetryingSender<S>
where
    S: RequestSender,
{
    type Request = S::Request;
    type Response = S::Response;

    async fn send(&self, request: Self::Request) -> StreamResult<Self::Response> {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            let delay = self.policy.delay_before(attempt + 1);
            match self.inner.send(request.clone()).await {
                Ok(response) => {
                    let status = response.status_code();
                    if response.is_success()
                        || !self.policy.is_transient_status(status)
                        || attempt >= max_attempts
                    {
                        return Ok(response);
                    }
                    log::warn!(
                        "Request failed with {}. Retrying in {}ms. Attempt {}/{}",
                        status,
                        delay.as_millis(),
                        attempt,
                        max_attempts
                    );
                }
                Err(e) => {
                    if !self.policy.is_transient(&e) || attempt >= max_attempts {
                        return Err(e);
                    }
                    log::warn!(
                        "Request failed with exception {}. Retrying in {}ms. Attempt {}/{}",
                        e,
                        delay.as_millis(),
                        attempt,
                        max_attempts
                    );
                }
            }
            sleep_or_cancel(delay, &self.cancel).await?;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[test]
    fn status_allow_list_drives_classification() {
        let policy = RetryPolicy::default().with_transient_status_codes(vec![500]);
        let internal = StreamError::Status { code: 500, message: "boom".into() };
        let gateway = StreamError::Status { code: 502, message: "gateway".into() };
        assert!(policy.is_transient(&internal));
        assert!(!policy.is_transient(&gateway));
        assert!(policy.is_transient(&StreamError::Timeout));
        assert!(!policy.is_transient(&StreamError::Cancelled));
    }
}
