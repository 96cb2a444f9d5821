// Centralized Observability Infrastructure for LabelDB
// This module provides structured logging, counters and trace contexts
// shared by the index, the metadata cache and ingestion.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

// Global atomic counters for metrics
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static LOOKUP_COUNTER: AtomicU64 = AtomicU64::new(0);
static ENRICHMENT_COUNTER: AtomicU64 = AtomicU64::new(0);
static ENRICHMENT_FAILURE_COUNTER: AtomicU64 = AtomicU64::new(0);
static ALLOCATION_FAILURE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging and tracing infrastructure
/// This should be called once at application startup
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("labeldb=debug,info")
    } else {
        EnvFilter::new("labeldb=warn,error")
    };

    // Quiet always wins over RUST_LOG
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_ids(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("LabelDB observability initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments
        Err(_) => Ok(()),
    }
}

/// Represents different types of operations for structured logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    IndexBuild {
        label_count: usize,
        trie_nodes: usize,
    },
    Autocomplete {
        prefix: String,
        result_count: usize,
    },
    FullSearch {
        query: String,
        result_count: usize,
    },
    CacheHit {
        entity_id: i64,
    },
    CacheMiss {
        entity_id: i64,
    },
    Enrichment {
        entity_id: i64,
        external_id: i64,
    },
    WriteBack {
        entity_id: i64,
        weight: Option<u64>,
    },
    Ingestion {
        inserted: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Metric types for performance monitoring
#[derive(Debug, Clone)]
pub enum MetricType {
    Counter { name: &'static str, value: u64 },
    Gauge { name: &'static str, value: f64 },
    Timer { name: &'static str, duration: Duration },
}

/// Operation context for tracing through the system
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub operation: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Log an operation with full context
pub fn log_operation<E: std::fmt::Display>(
    ctx: &OperationContext,
    op: &Operation,
    result: &std::result::Result<(), E>,
) {
    let elapsed = ctx.elapsed();
    let attrs = ctx
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");

    match result {
        Ok(()) => {
            debug!(
                trace_id = %ctx.trace_id,
                operation = %ctx.operation,
                elapsed_us = elapsed.as_micros() as u64,
                attributes = %attrs,
                "Operation completed: {:?}", op
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                operation = %ctx.operation,
                elapsed_us = elapsed.as_micros() as u64,
                attributes = %attrs,
                error = %e,
                "Operation failed: {:?}", op
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    match op {
        Operation::Autocomplete { .. } | Operation::FullSearch { .. } => {
            LOOKUP_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Operation::Enrichment { .. } => {
            ENRICHMENT_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }
}

/// Count an enrichment attempt that degraded to the unenriched record
pub fn record_enrichment_failure() {
    ENRICHMENT_FAILURE_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Count an ingestion record aborted by key exhaustion
pub fn record_allocation_failure() {
    ALLOCATION_FAILURE_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Record a metric
pub fn record_metric(metric: MetricType) {
    match metric {
        MetricType::Counter { name, value } => debug!("metric.counter {} = {}", name, value),
        MetricType::Gauge { name, value } => debug!("metric.gauge {} = {}", name, value),
        MetricType::Timer { name, duration } => debug!("metric.timer {} = {:?}", name, duration),
    }
}

/// Execute a future inside a trace context, logging its outcome and duration
pub async fn with_trace_id<F, T, E>(operation: &str, f: F) -> std::result::Result<T, E>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let trace_id = Uuid::new_v4();
    debug!(trace_id = %trace_id, "Starting operation: {}", operation);

    let start = Instant::now();
    let result = f.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => {
            debug!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Operation completed successfully: {}", operation
            );
            record_metric(MetricType::Timer {
                name: "operation.duration",
                duration: elapsed,
            });
        }
        Err(e) => {
            error!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Operation failed: {}", operation
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    result
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "operations": {
            "total": OPERATION_COUNTER.load(Ordering::Relaxed),
            "errors": ERROR_COUNTER.load(Ordering::Relaxed),
            "lookups": LOOKUP_COUNTER.load(Ordering::Relaxed),
        },
        "enrichment": {
            "attempts": ENRICHMENT_COUNTER.load(Ordering::Relaxed),
            "failures": ENRICHMENT_FAILURE_COUNTER.load(Ordering::Relaxed),
        },
        "ingestion": {
            "allocation_failures": ALLOCATION_FAILURE_COUNTER.load(Ordering::Relaxed),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_context_attributes() {
        let mut ctx = OperationContext::new("test_operation");
        ctx.add_attribute("entity_id", "42");
        assert_eq!(ctx.operation, "test_operation");
        assert_eq!(ctx.attributes.len(), 1);
    }

    #[test]
    fn test_log_operation_counts_lookups() {
        let before = LOOKUP_COUNTER.load(Ordering::Relaxed);
        let ctx = OperationContext::new("search.full");
        log_operation::<String>(
            &ctx,
            &Operation::FullSearch {
                query: "portal".to_string(),
                result_count: 3,
            },
            &Ok(()),
        );
        assert!(LOOKUP_COUNTER.load(Ordering::Relaxed) > before);
    }

    #[test]
    fn test_metrics_snapshot_shape() {
        record_metric(MetricType::Counter {
            name: "test.counter",
            value: 42,
        });
        record_enrichment_failure();
        let metrics = get_metrics();
        assert!(metrics["timestamp"].is_string());
        assert!(metrics["enrichment"]["failures"].as_u64().unwrap_or(0) >= 1);
    }

    #[tokio::test]
    async fn test_with_trace_id() {
        let result = with_trace_id("test_async_op", async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, anyhow::Error>(42)
        })
        .await;

        assert_eq!(result.expect("Test operation should succeed"), 42);
    }

    #[test]
    fn test_logging_level_configurations() {
        let configs = vec![
            ("quiet", "error"),
            ("verbose", "labeldb=debug,info"),
            ("default", "labeldb=warn,error"),
        ];

        for (mode, filter_str) in configs {
            assert!(
                EnvFilter::try_new(filter_str).is_ok(),
                "Failed to create filter for {} mode with filter: {}",
                mode,
                filter_str
            );
        }
    }
}
