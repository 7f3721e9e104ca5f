//! Per-stream analytics
//!
//! An [`AnalyticsSchema`] names the fields worth looking at: category fields
//! are counted by value, numeric fields feed running statistics. Each analysed
//! stream gets a [`StreamAnalytics`] that also tracks the gaps between items.

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{StreamError, StreamResult};
use crate::operators::FallibleStream;

type CategoryFn<T> = Arc<dyn Fn(&T) -> Option<String> + Send + Sync>;
type NumericFn<T> = Arc<dyn Fn(&T) -> Option<f64> + Send + Sync>;

// ================================
// Schema
// ================================

/// Named field extractors for one item type
pub struct AnalyticsSchema<T> {
    categories: Vec<(String, CategoryFn<T>)>,
    numerics: Vec<(String, NumericFn<T>)>,
}

impl<T> AnalyticsSchema<T> {
    pub fn new() -> Self {
        Self {
            categories: Vec::new(),
            numerics: Vec::new(),
        }
    }

    /// Count items by the value `extract` returns; `None` skips the item.
    pub fn category<F>(mut self, name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&T) -> Option<String> + Send + Sync + 'static,
    {
        self.categories.push((name.into(), Arc::new(extract)));
        self
    }

    /// Feed the value `extract` returns into running statistics.
    pub fn numeric<F>(mut self, name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&T) -> Option<f64> + Send + Sync + 'static,
    {
        self.numerics.push((name.into(), Arc::new(extract)));
        self
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn numeric_names(&self) -> Vec<&str> {
        self.numerics.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl<T> Default for AnalyticsSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AnalyticsSchema<T> {
    fn clone(&self) -> Self {
        Self {
            categories: self.categories.clone(),
            numerics: self.numerics.clone(),
        }
    }
}

impl<T> fmt::Debug for AnalyticsSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyticsSchema")
            .field("categories", &self.category_names())
            .field("numerics", &self.numeric_names())
            .finish()
    }
}

// ================================
// Statistics
// ================================

/// Welford's online mean and variance
#[derive(Debug, Clone, Default)]
pub struct RunningStatistics {
    count: u64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl RunningStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; zero until two values have been seen
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn summary(&self) -> StatisticsSummary {
        StatisticsSummary {
            count: self.count,
            mean: self.mean,
            variance: self.variance(),
            std_dev: self.std_dev(),
            min: self.min,
            max: self.max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSummary {
    pub count: u64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatistics {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub items_per_second: f64,
    pub average_interval: Duration,
    pub min_interval: Option<Duration>,
    pub max_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
struct IntervalTracker {
    started: Instant,
    last: Option<Instant>,
    gaps: u32,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl IntervalTracker {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last: None,
            gaps: 0,
            total: Duration::ZERO,
            min: None,
            max: None,
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last {
            let gap = now.duration_since(last);
            self.gaps = self.gaps.saturating_add(1);
            self.total += gap;
            self.min = Some(self.min.map_or(gap, |m| m.min(gap)));
            self.max = Some(self.max.map_or(gap, |m| m.max(gap)));
        }
        self.last = Some(now);
    }

    fn average(&self) -> Duration {
        if self.gaps == 0 {
            Duration::ZERO
        } else {
            self.total / self.gaps
        }
    }
}

// ================================
// Per-stream analytics
// ================================

/// Serializable view of one stream's analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub stream_id: String,
    pub description: String,
    pub items_processed: u64,
    pub categories: HashMap<String, HashMap<String, u64>>,
    pub statistics: HashMap<String, StatisticsSummary>,
    pub processing: ProcessingStatistics,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct StreamAnalytics<T> {
    stream_id: String,
    description: String,
    schema: AnalyticsSchema<T>,
    items_processed: u64,
    categories: HashMap<String, HashMap<String, u64>>,
    statistics: HashMap<String, RunningStatistics>,
    intervals: IntervalTracker,
    started_at: DateTime<Utc>,
    finished: Option<Duration>,
}

impl<T> StreamAnalytics<T> {
    pub fn new(
        stream_id: impl Into<String>,
        description: impl Into<String>,
        schema: AnalyticsSchema<T>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            description: description.into(),
            schema,
            items_processed: 0,
            categories: HashMap::new(),
            statistics: HashMap::new(),
            intervals: IntervalTracker::new(),
            started_at: Utc::now(),
            finished: None,
        }
    }

    pub fn record(&mut self, item: &T) {
        self.items_processed += 1;
        self.intervals.tick();

        for (name, extract) in &self.schema.categories {
            if let Some(value) = extract(item) {
                *self
                    .categories
                    .entry(name.clone())
                    .or_default()
                    .entry(value)
                    .or_insert(0) += 1;
            }
        }
        for (name, extract) in &self.schema.numerics {
            if let Some(value) = extract(item).filter(|v| v.is_finite()) {
                self.statistics.entry(name.clone()).or_default().push(value);
            }
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn items_processed(&self) -> u64 {
        self.items_processed
    }

    pub fn category_counts(&self, field: &str) -> Option<&HashMap<String, u64>> {
        self.categories.get(field)
    }

    pub fn statistics(&self, field: &str) -> Option<StatisticsSummary> {
        self.statistics.get(field).map(RunningStatistics::summary)
    }

    pub fn processing(&self) -> ProcessingStatistics {
        let duration = self
            .finished
            .unwrap_or_else(|| self.intervals.started.elapsed());
        let seconds = duration.as_secs_f64();
        ProcessingStatistics {
            started_at: self.started_at,
            duration,
            items_per_second: if seconds > 0.0 {
                self.items_processed as f64 / seconds
            } else {
                0.0
            },
            average_interval: self.intervals.average(),
            min_interval: self.intervals.min,
            max_interval: self.intervals.max,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.finished.is_some()
    }

    /// Freeze the processing duration; later items are still counted.
    pub fn complete(&mut self) {
        if self.finished.is_none() {
            self.finished = Some(self.intervals.started.elapsed());
        }
    }

    pub fn report(&self) -> AnalyticsReport {
        AnalyticsReport {
            stream_id: self.stream_id.clone(),
            description: self.description.clone(),
            items_processed: self.items_processed,
            categories: self.categories.clone(),
            statistics: self
                .statistics
                .iter()
                .map(|(name, stats)| (name.clone(), stats.summary()))
                .collect(),
            processing: self.processing(),
            completed: self.is_completed(),
        }
    }
}

// ================================
// Service
// ================================

/// Registry of analysed streams sharing one schema
pub struct StreamAnalysisService<T> {
    schema: AnalyticsSchema<T>,
    streams: RwLock<HashMap<String, StreamAnalytics<T>>>,
}

impl<T> StreamAnalysisService<T> {
    pub fn new(schema: AnalyticsSchema<T>) -> Self {
        Self {
            schema,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &AnalyticsSchema<T> {
        &self.schema
    }

    /// Begin analysing a new stream and return its id
    pub fn start_analysis(&self, description: impl Into<String>) -> String {
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let stream_id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !streams.contains_key(&candidate) {
                break candidate;
            }
        };
        let description = description.into();
        log::debug!("Started analysis {} for {}", stream_id, description);
        streams.insert(
            stream_id.clone(),
            StreamAnalytics::new(stream_id.clone(), description, self.schema.clone()),
        );
        stream_id
    }

    pub fn process_item(&self, stream_id: &str, item: &T) -> StreamResult<()> {
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let analytics = streams
            .get_mut(stream_id)
            .ok_or_else(|| StreamError::validation(format!("unknown analysis {}", stream_id)))?;
        analytics.record(item);
        Ok(())
    }

    pub fn analytics(&self, stream_id: &str) -> Option<AnalyticsReport> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream_id)
            .map(StreamAnalytics::report)
    }

    /// Finish the analysis, drop it from the registry and return its final report
    pub fn complete_analysis(&self, stream_id: &str) -> Option<AnalyticsReport> {
        let mut analytics = self
            .streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stream_id)?;
        analytics.complete();
        let report = analytics.report();
        log::info!(
            "Analysis {} complete: {} items in {:?} ({:.1} items/sec)",
            stream_id,
            report.items_processed,
            report.processing.duration,
            report.processing.items_per_second
        );
        Some(report)
    }

    pub fn remove_analysis(&self, stream_id: &str) -> Option<AnalyticsReport> {
        self.streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stream_id)
            .map(|a| a.report())
    }

    pub fn len(&self) -> usize {
        self.streams.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for StreamAnalysisService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamAnalysisService")
            .field("schema", &self.schema)
            .field("streams", &self.len())
            .finish()
    }
}

/// Completes an `analyze` run exactly once, including when its consumer
/// drops the stream early.
struct AnalysisGuard<T> {
    service: Arc<StreamAnalysisService<T>>,
    stream_id: String,
    finished: bool,
}

impl<T> AnalysisGuard<T> {
    fn finish(&mut self) -> Option<AnalyticsReport> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.service.complete_analysis(&self.stream_id)
    }
}

impl<T> Drop for AnalysisGuard<T> {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("Analysis {} abandoned by its consumer", self.stream_id);
            self.finish();
        }
    }
}

/// Record every item in a fresh analysis as it passes through.
///
/// Returns the analysis id with the pass-through stream. The analysis is
/// completed and removed from the service when the stream ends, on its first
/// fault, or when the stream is dropped.
pub fn analyze<T>(
    s: FallibleStream<T>,
    service: Arc<StreamAnalysisService<T>>,
    description: impl Into<String>,
) -> (String, FallibleStream<T>)
where
    T: Send + Sync + 'static,
{
    let stream_id = service.start_analysis(description);
    let mut guard = AnalysisGuard {
        service,
        stream_id: stream_id.clone(),
        finished: false,
    };
    let analysed = stream! {
        let mut s = s;
        while let Some(item) = s.next().await {
            match item {
                Ok(value) => {
                    if let Err(e) = guard.service.process_item(&guard.stream_id, &value) {
                        log::warn!("Analysis {} dropped an item: {}", guard.stream_id, e);
                    }
                    yield Ok(value);
                }
                Err(e) => {
                    guard.finish();
                    yield Err(e);
                    return;
                }
            }
        }
        guard.finish();
    }
    .boxed();
    (stream_id, analysed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_two_pass() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = RunningStatistics::new();
        for v in values {
            stats.push(v);
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

        assert_eq!(stats.count(), 8);
        assert!((stats.mean() - 5.0).abs() < 1e-12);
        assert!((stats.variance() - var).abs() < 1e-12);
        assert_eq!(stats.min(), Some(2.0));
        assert_eq!(stats.max(), Some(9.0));
    }

    #[test]
    fn single_value_has_zero_variance() {
        let mut stats = RunningStatistics::new();
        stats.push(3.5);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.std_dev(), 0.0);
    }
}
