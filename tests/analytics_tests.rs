use futures_util::stream::StreamExt;
use record_stream::analytics::{analyze, AnalyticsSchema, StreamAnalysisService};
use record_stream::operators::{from_iter, from_results};
use record_stream::source::DataRecord;
use record_stream::{StreamError, StreamResult};
use std::sync::Arc;
use std::time::Duration;

fn record_schema() -> AnalyticsSchema<DataRecord> {
    AnalyticsSchema::new()
        .category("parity", |r: &DataRecord| {
            Some(if r.id % 2 == 0 { "even" } else { "odd" }.to_string())
        })
        .numeric("value", |r: &DataRecord| Some(r.value))
}

fn record(id: u64, value: f64) -> DataRecord {
    DataRecord {
        value,
        ..DataRecord::new(id)
    }
}

#[test]
fn test_service_computes_categories_and_statistics() {
    let service = StreamAnalysisService::new(record_schema());
    let id = service.start_analysis("records");

    for (i, value) in [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().enumerate() {
        service.process_item(&id, &record(i as u64, value)).unwrap();
    }

    let report = service.analytics(&id).unwrap();
    assert_eq!(report.items_processed, 5);
    assert!(!report.completed);

    let parity = &report.categories["parity"];
    assert_eq!(parity["even"], 3);
    assert_eq!(parity["odd"], 2);

    let values = &report.statistics["value"];
    assert_eq!(values.count, 5);
    assert!((values.mean - 3.0).abs() < 1e-12);
    assert!((values.variance - 2.5).abs() < 1e-12);
    assert_eq!(values.min, Some(1.0));
    assert_eq!(values.max, Some(5.0));
}

#[test]
fn test_unknown_analysis_is_rejected() {
    let service = StreamAnalysisService::new(record_schema());
    assert!(matches!(
        service.process_item("missing", &record(0, 1.0)),
        Err(StreamError::Validation(_))
    ));
    assert!(service.analytics("missing").is_none());
    assert!(service.complete_analysis("missing").is_none());
}

#[test]
fn test_completion_freezes_duration_and_releases_entry() {
    let service = StreamAnalysisService::new(record_schema());
    let id = service.start_analysis("records");
    service.process_item(&id, &record(0, 1.0)).unwrap();
    std::thread::sleep(Duration::from_millis(10));
    service.process_item(&id, &record(1, 1.0)).unwrap();

    let done = service.complete_analysis(&id).unwrap();
    assert!(done.completed);
    assert_eq!(done.items_processed, 2);
    assert!(done.processing.min_interval.unwrap() >= Duration::from_millis(10));
    assert_eq!(done.processing.min_interval, done.processing.max_interval);

    assert!(service.analytics(&id).is_none());
    assert!(service.complete_analysis(&id).is_none());
    assert!(service.is_empty());
}

#[test]
fn test_remove_analysis_abandons_without_completing() {
    let service = StreamAnalysisService::new(record_schema());
    let id = service.start_analysis("records");
    service.process_item(&id, &record(0, 1.0)).unwrap();

    let removed = service.remove_analysis(&id).unwrap();
    assert!(!removed.completed);
    assert!(service.is_empty());
}

#[test]
fn test_non_finite_values_are_skipped() {
    let service = StreamAnalysisService::new(record_schema());
    let id = service.start_analysis("records");
    service.process_item(&id, &record(0, f64::NAN)).unwrap();
    service.process_item(&id, &record(1, 4.0)).unwrap();

    let report = service.analytics(&id).unwrap();
    assert_eq!(report.items_processed, 2);
    assert_eq!(report.statistics["value"].count, 1);
}

#[tokio::test]
async fn test_analyze_passes_items_through() {
    let service = Arc::new(StreamAnalysisService::new(record_schema()));
    let records: Vec<DataRecord> = (0..10).map(DataRecord::new).collect();
    let (id, mut analysed) = analyze(from_iter(records.clone()), Arc::clone(&service), "records");

    let mut out = Vec::new();
    for _ in 0..4 {
        out.push(analysed.next().await.unwrap().unwrap());
    }
    let partial = service.analytics(&id).unwrap();
    assert!(!partial.completed);
    assert_eq!(partial.items_processed, 4);
    assert_eq!(partial.description, "records");

    while let Some(item) = analysed.next().await {
        out.push(item.unwrap());
    }
    assert_eq!(out, records);
    assert!(service.analytics(&id).is_none());
    assert_eq!(service.len(), 0);
}

#[tokio::test]
async fn test_completed_runs_leave_service_empty() {
    let service = Arc::new(StreamAnalysisService::new(record_schema()));
    for run in 0..50u64 {
        let (_, analysed) = analyze(
            from_iter((0..5).map(move |i| record(run * 5 + i, i as f64))),
            Arc::clone(&service),
            format!("run {run}"),
        );
        let out: Vec<StreamResult<DataRecord>> = analysed.collect().await;
        assert_eq!(out.len(), 5);
    }
    assert_eq!(service.len(), 0);
}

#[tokio::test]
async fn test_analyze_completes_on_fault() {
    let service = Arc::new(StreamAnalysisService::new(record_schema()));
    let items: Vec<StreamResult<DataRecord>> =
        vec![Ok(record(0, 1.0)), Err(StreamError::Timeout), Ok(record(1, 2.0))];
    let (id, analysed) = analyze(
        from_results(futures_util::stream::iter(items)),
        Arc::clone(&service),
        "records",
    );

    let out: Vec<StreamResult<DataRecord>> = analysed.collect().await;
    assert_eq!(out.len(), 2);
    assert_eq!(out[1], Err(StreamError::Timeout));
    assert!(service.analytics(&id).is_none());
    assert!(service.is_empty());
}

#[tokio::test]
async fn test_dropping_analyzed_stream_releases_entry() {
    let service = Arc::new(StreamAnalysisService::new(record_schema()));
    let (id, mut analysed) = analyze(
        from_iter((0..100).map(|i| record(i, 1.0))),
        Arc::clone(&service),
        "records",
    );
    analysed.next().await;
    analysed.next().await;
    assert_eq!(service.analytics(&id).unwrap().items_processed, 2);

    drop(analysed);
    assert!(service.is_empty());
}

#[test]
fn test_unpolled_analyzed_stream_releases_entry_on_drop() {
    let service = Arc::new(StreamAnalysisService::new(record_schema()));
    let (_, analysed) = analyze(from_iter(vec![record(0, 1.0)]), Arc::clone(&service), "records");
    assert_eq!(service.len(), 1);
    drop(analysed);
    assert!(service.is_empty());
}
