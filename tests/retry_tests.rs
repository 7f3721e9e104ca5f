use async_trait::async_trait;
use futures_util::stream::StreamExt;
use record_stream::operators::{from_iter, from_results, FallibleStream};
use record_stream::retry::{
    retry, retry_stream, RequestSender, RetryPolicy, RetryingSender, StatusResponse,
};
use record_stream::{CancellationToken, StreamError, StreamResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn unavailable() -> StreamError {
    StreamError::ServiceUnavailable("upstream restarting".into())
}

#[tokio::test]
async fn test_retry_succeeds_on_third_attempt() {
    let policy = RetryPolicy::new(3, Duration::from_millis(10));
    let attempts = AtomicUsize::new(0);
    let result = retry(&policy, &CancellationToken::new(), || {
        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 3 {
                Err(unavailable())
            } else {
                Ok(n)
            }
        }
    })
    .await;
    assert_eq!(result, Ok(3));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_exhaustion_backs_off_exponentially() {
    let policy = RetryPolicy::default();
    let start = Instant::now();
    let times = Mutex::new(Vec::new());
    let result: StreamResult<()> = retry(&policy, &CancellationToken::new(), || {
        times.lock().unwrap().push(start.elapsed());
        async { Err(StreamError::Timeout) }
    })
    .await;

    assert_eq!(result, Err(StreamError::Timeout));
    let times = times.into_inner().unwrap();
    assert_eq!(times.len(), 3);
    // attempts at ~0ms, ~100ms and ~300ms
    assert!(times[0] < Duration::from_millis(50));
    assert!(times[1] >= Duration::from_millis(100));
    assert!(times[2] >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_retry_does_not_repeat_non_transient_faults() {
    let policy = RetryPolicy::default();
    let attempts = AtomicUsize::new(0);
    let result: StreamResult<()> = retry(&policy, &CancellationToken::new(), || {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(StreamError::validation("bad input")) }
    })
    .await;
    assert!(matches!(result, Err(StreamError::Validation(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_wait_is_cancellable() {
    let policy = RetryPolicy::new(5, Duration::from_secs(10));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let result: StreamResult<()> = retry(&policy, &cancel, || async { Err(StreamError::TooManyRequests) }).await;
    assert_eq!(result, Err(StreamError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_retry_stream_restarts_before_first_item() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let policy = RetryPolicy::new(3, Duration::from_millis(5));
    let s = retry_stream(policy, CancellationToken::new(), move || -> FallibleStream<u32> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            from_results(futures_util::stream::iter(vec![Err(unavailable())]))
        } else {
            from_iter(vec![1, 2, 3])
        }
    });

    let result: Vec<StreamResult<u32>> = s.collect().await;
    assert_eq!(result, vec![Ok(1), Ok(2), Ok(3)]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_stream_forwards_fault_after_items() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let policy = RetryPolicy::new(3, Duration::from_millis(5));
    let s = retry_stream(policy, CancellationToken::new(), move || -> FallibleStream<u32> {
        counter.fetch_add(1, Ordering::SeqCst);
        from_results(futures_util::stream::iter(vec![Ok(1), Err(unavailable())]))
    });

    let result: Vec<StreamResult<u32>> = s.collect().await;
    assert_eq!(result, vec![Ok(1), Err(unavailable())]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[derive(Debug, Clone, PartialEq)]
struct Reply {
    status: u16,
}

impl StatusResponse for Reply {
    fn status_code(&self) -> u16 {
        self.status
    }
}

struct ScriptedSender {
    replies: Mutex<Vec<StreamResult<Reply>>>,
    calls: AtomicUsize,
}

impl ScriptedSender {
    fn new(mut replies: Vec<StreamResult<Reply>>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RequestSender for ScriptedSender {
    type Request = String;
    type Response = Reply;

    async fn send(&self, _request: String) -> StreamResult<Reply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Ok(Reply { status: 200 }))
    }
}

#[tokio::test]
async fn test_sender_retries_transient_status() {
    let inner = ScriptedSender::new(vec![Ok(Reply { status: 503 }), Ok(Reply { status: 200 })]);
    let sender = RetryingSender::new(inner, RetryPolicy::new(3, Duration::from_millis(5)));
    let reply = sender.send("GET /records".to_string()).await.unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(sender.into_inner().calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sender_returns_last_response_when_exhausted() {
    let inner = ScriptedSender::new(vec![
        Ok(Reply { status: 502 }),
        Ok(Reply { status: 504 }),
        Ok(Reply { status: 429 }),
    ]);
    let sender = RetryingSender::new(inner, RetryPolicy::new(3, Duration::from_millis(5)));
    let reply = sender.send("GET /records".to_string()).await.unwrap();
    assert_eq!(reply, Reply { status: 429 });
    assert_eq!(sender.into_inner().calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sender_does_not_retry_client_errors() {
    let inner = ScriptedSender::new(vec![Ok(Reply { status: 404 })]);
    let sender = RetryingSender::new(inner, RetryPolicy::default());
    let reply = sender.send("GET /missing".to_string()).await.unwrap();
    assert_eq!(reply.status, 404);
    assert_eq!(sender.into_inner().calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sender_retries_transient_faults() {
    let inner = ScriptedSender::new(vec![Err(StreamError::Timeout), Ok(Reply { status: 201 })]);
    let sender = RetryingSender::new(inner, RetryPolicy::new(3, Duration::from_millis(5)));
    let reply = sender.send("POST /records".to_string()).await.unwrap();
    assert_eq!(reply.status, 201);
}
