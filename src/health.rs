//! Health classification from the most recent metrics snapshot

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::metrics::MetricsCollector;

/// Limits supplied by the host service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub min_items_per_second: f64,
    pub max_memory_bytes: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_items_per_second: 100.0,
            max_memory_bytes: 100_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("Healthy"),
            HealthStatus::Degraded => f.write_str("Degraded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub data: Map<String, Value>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn warnings(&self) -> Vec<&str> {
        match self.data.get("warnings") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Classify the newest snapshot in `collector` against `thresholds`.
pub fn check(collector: &MetricsCollector, thresholds: &HealthThresholds) -> HealthReport {
    let Some(latest) = collector.latest() else {
        return HealthReport {
            status: HealthStatus::Healthy,
            message: "No streaming activity yet".to_string(),
            data: Map::new(),
        };
    };

    let mut data = Map::new();
    data.insert("lastStreamTime".to_string(), json!(latest.timestamp.to_rfc3339()));
    data.insert("itemsPerSecond".to_string(), json!(latest.items_per_second));
    data.insert("memoryUsed".to_string(), json!(latest.memory_used_bytes));

    let mut warnings = Vec::new();
    if latest.items_per_second < thresholds.min_items_per_second {
        warnings.push(Value::from("Low streaming rate detected"));
    }
    if latest.memory_used_bytes > thresholds.max_memory_bytes {
        warnings.push(Value::from("High memory usage detected"));
    }

    if warnings.is_empty() {
        HealthReport {
            status: HealthStatus::Healthy,
            message: "Streaming system is healthy".to_string(),
            data,
        }
    } else {
        data.insert("warnings".to_string(), Value::Array(warnings));
        HealthReport {
            status: HealthStatus::Degraded,
            message: "Streaming system performance is degraded".to_string(),
            data,
        }
    }
}
