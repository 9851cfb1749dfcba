// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for record-search.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `record_search_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `command`: FT.SEARCH, FT.AGGREGATE, HSET, JSON.SET, ...
//! - `status`: success, error
//! - `stage`: schema, predicate, aggregate

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record one round trip to the engine
pub fn record_command(command: &str, status: &str) {
    counter!(
        "record_search_commands_total",
        "command" => command.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record round-trip latency
pub fn record_command_latency(command: &str, duration: Duration) {
    histogram!(
        "record_search_command_seconds",
        "command" => command.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the number of rows a search page returned
pub fn record_search_results(count: usize) {
    histogram!("record_search_results").record(count as f64);
}

/// Record a page fetch during paginated enumeration
pub fn record_page_fetch(rows: usize, requested: usize) {
    counter!("record_search_page_fetches_total").increment(1);
    if rows < requested {
        counter!("record_search_short_pages_total").increment(1);
    }
}

/// Record a cursor operation (read, delete)
pub fn record_cursor_operation(operation: &str, success: bool) {
    counter!(
        "record_search_cursor_operations_total",
        "operation" => operation.to_string(),
        "status" => if success { "success" } else { "error" }.to_string()
    )
    .increment(1);
}

/// Record an index lifecycle operation (create, drop)
pub fn record_index_operation(operation: &str, success: bool) {
    counter!(
        "record_search_index_operations_total",
        "operation" => operation.to_string(),
        "status" => if success { "success" } else { "error" }.to_string()
    )
    .increment(1);
}

/// Record a record write (full, partial, delete) and how many fields it touched
pub fn record_write(kind: &str, fields: usize) {
    counter!(
        "record_search_writes_total",
        "kind" => kind.to_string()
    )
    .increment(1);
    histogram!("record_search_write_fields").record(fields as f64);
}

/// Record a fail-fast compilation error
pub fn record_compile_error(stage: &str) {
    counter!(
        "record_search_compile_errors_total",
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Set the number of tracked entities in a collection
pub fn set_tracked_entities(collection: &str, count: usize) {
    gauge!(
        "record_search_tracked_entities",
        "collection" => collection.to_string()
    )
    .set(count as f64);
}

/// A timing guard that records command latency on drop
pub struct LatencyTimer {
    command: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_command_latency(self.command, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_command_metrics() {
        record_command("FT.SEARCH", "success");
        record_command("FT.AGGREGATE", "error");
        record_command_latency("HSET", Duration::from_micros(150));
    }

    #[test]
    fn test_search_metrics() {
        record_search_results(42);
        record_page_fetch(10, 10);
        record_page_fetch(3, 10);
        record_cursor_operation("read", true);
        record_cursor_operation("delete", false);
    }

    #[test]
    fn test_write_and_index_metrics() {
        record_write("partial", 1);
        record_write("full", 6);
        record_index_operation("create", true);
        record_compile_error("predicate");
        set_tracked_entities("Person", 12);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("FT.SEARCH");
            std::thread::sleep(Duration::from_micros(10));
        }
        // Timer recorded on drop
    }
}
