use futures_util::stream::StreamExt;
use quickcheck::{QuickCheck, TestResult};
use record_stream::operators::*;
use record_stream::{CancellationToken, StreamError, StreamResult};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::ReceiverStream;

async fn collect_all<T>(s: FallibleStream<T>) -> Vec<StreamResult<T>> {
    s.collect::<Vec<_>>().await
}

fn failing_after(n: u32, fault: StreamError) -> FallibleStream<u32> {
    let items: Vec<StreamResult<u32>> = (0..n).map(Ok).chain(std::iter::once(Err(fault))).collect();
    from_results(futures_util::stream::iter(items))
}

#[tokio::test]
async fn test_chunk_groups_in_order() {
    let chunks = chunk(from_iter(1..=10), 3).unwrap();
    let result: Vec<Vec<i32>> = chunks.map(|c| c.unwrap()).collect().await;
    assert_eq!(result, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9], vec![10]]);
}

#[tokio::test]
async fn test_chunk_of_empty_stream_is_empty() {
    let chunks = chunk(from_iter(Vec::<u8>::new()), 4).unwrap();
    assert!(collect_all(chunks).await.is_empty());
}

#[test]
fn test_chunk_zero_size_is_rejected() {
    match chunk(from_iter(0..3), 0) {
        Err(StreamError::Validation(_)) => {}
        Err(other) => panic!("unexpected fault {other:?}"),
        Ok(_) => panic!("chunk(0) must fail"),
    }
}

#[tokio::test]
async fn test_chunk_discards_partial_chunk_on_fault() {
    let chunks = chunk(failing_after(5, StreamError::custom("boom")), 2).unwrap();
    let result = collect_all(chunks).await;
    assert_eq!(
        result,
        vec![Ok(vec![0, 1]), Ok(vec![2, 3]), Err(StreamError::custom("boom"))]
    );
}

#[test]
fn test_chunk_concatenation_restores_input() {
    fn prop(items: Vec<u16>, size: u8) -> TestResult {
        if size == 0 {
            return TestResult::discard();
        }
        let size = size as usize;
        let chunks: Vec<Vec<u16>> = tokio_test::block_on(async {
            chunk(from_iter(items.clone()), size)
                .unwrap()
                .map(|c| c.unwrap())
                .collect()
                .await
        });

        let all_but_last_full = chunks
            .iter()
            .take(chunks.len().saturating_sub(1))
            .all(|c| c.len() == size);
        let last_ok = chunks.last().map_or(true, |c| !c.is_empty() && c.len() <= size);
        let flat: Vec<u16> = chunks.into_iter().flatten().collect();
        TestResult::from_bool(flat == items && all_but_last_full && last_ok)
    }

    QuickCheck::new()
        .tests(50)
        .quickcheck(prop as fn(Vec<u16>, u8) -> TestResult);
}

#[tokio::test]
async fn test_throttle_spaces_items() {
    let cancel = CancellationToken::new();
    let start = Instant::now();
    let result = collect_all(throttle(from_iter(0..3), 10, cancel).unwrap()).await;
    assert_eq!(result, vec![Ok(0), Ok(1), Ok(2)]);
    // three intervals of 100ms at 10 items/s
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[test]
fn test_throttle_zero_rate_is_rejected() {
    let cancel = CancellationToken::new();
    assert!(matches!(
        throttle(from_iter(0..3), 0, cancel),
        Err(StreamError::Validation(_))
    ));
}

#[tokio::test]
async fn test_delay_between_batches_pauses_after_each_batch() {
    let cancel = CancellationToken::new();
    let start = Instant::now();
    let s = delay_between_batches(from_iter(0..6), 3, Duration::from_millis(50), cancel).unwrap();
    let result = collect_all(s).await;
    assert_eq!(result.len(), 6);
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_delay_between_items_wakes_on_cancel() {
    let cancel = CancellationToken::new();
    let s = delay_between_items(from_iter(0..100), Duration::from_secs(10), cancel.clone());
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let result = collect_all(s).await;
    assert_eq!(result, vec![Ok(0), Err(StreamError::Cancelled)]);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_filter_then_transform_keeps_order() {
    let evens = filter(from_iter(1..=10), |x: &i32| {
        let keep = x % 2 == 0;
        async move { keep }
    });
    let doubled = transform(evens, |x| async move { x * 10 });
    let result: Vec<i32> = doubled.map(|r| r.unwrap()).collect().await;
    assert_eq!(result, vec![20, 40, 60, 80, 100]);
}

#[tokio::test]
async fn test_try_transform_stops_at_first_fault() {
    let s = try_transform(from_iter(0..10), |x: i32| async move {
        if x == 3 {
            Err(StreamError::custom("bad record"))
        } else {
            Ok(x)
        }
    });
    let result = collect_all(s).await;
    assert_eq!(
        result,
        vec![Ok(0), Ok(1), Ok(2), Err(StreamError::custom("bad record"))]
    );
}

#[tokio::test]
async fn test_progress_reports_every_interval() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let s = with_progress(from_iter(0..25), move |n| sink.lock().unwrap().push(n), 10).unwrap();
    assert_eq!(collect_all(s).await.len(), 25);
    assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
}

#[tokio::test]
async fn test_operators_forward_faults_once() {
    let s = transform(failing_after(2, StreamError::Timeout), |x| async move { x + 1 });
    let result = collect_all(s).await;
    assert_eq!(result, vec![Ok(1), Ok(2), Err(StreamError::Timeout)]);
}

#[tokio::test]
async fn test_timeout_faults_slow_source() {
    let cancel = CancellationToken::new();
    let slow = from_stream(futures_util::stream::iter(0..3).then(|x| async move {
        if x == 1 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        x
    }));
    let result = collect_all(timeout(slow, Duration::from_millis(50), cancel).unwrap()).await;
    assert_eq!(result, vec![Ok(0), Err(StreamError::Timeout)]);
}

#[tokio::test]
async fn test_timeout_fires_when_channel_producer_stalls() {
    let cancel = CancellationToken::new();
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tokio::spawn(async move {
        tx.send(1u8).await.unwrap();
        tx.send(2u8).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(tx);
    });

    let s = timeout(from_stream(ReceiverStream::new(rx)), Duration::from_millis(50), cancel).unwrap();
    let result = collect_all(s).await;
    assert_eq!(result, vec![Ok(1), Ok(2), Err(StreamError::Timeout)]);
}

#[tokio::test]
async fn test_timeout_passes_fast_source() {
    let cancel = CancellationToken::new();
    let result = collect_all(timeout(from_iter(0..5), Duration::from_millis(200), cancel).unwrap()).await;
    assert_eq!(result.len(), 5);
    assert!(result.iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_with_cancellation_ends_pending_stream() {
    let cancel = CancellationToken::new();
    let pending = from_stream(futures_util::stream::pending::<u8>());
    let s = with_cancellation(pending, cancel.clone());
    cancel.cancel();
    let result = collect_all(s).await;
    assert_eq!(result, vec![Err(StreamError::Cancelled)]);
}

#[tokio::test]
async fn test_nothing_is_pulled_before_polling() {
    let pulled = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&pulled);
    let source = from_stream(futures_util::stream::iter(0..5).inspect(move |_| {
        *counter.lock().unwrap() += 1;
    }));
    let mut s = transform(source, |x| async move { x });
    assert_eq!(*pulled.lock().unwrap(), 0);
    assert_eq!(s.next().await, Some(Ok(0)));
    assert_eq!(*pulled.lock().unwrap(), 1);
}
