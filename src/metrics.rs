// src/metrics.rs

#[cfg(feature = "observability")]
use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

// When observability is disabled the recording helpers below compile to nothing.
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use std::time::Duration;

/// Registers descriptions for every metric the SDK emits.
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    describe_counter!("ggp_rpc_calls_total", "RPC calls issued, by method and outcome.");
    #[cfg(feature = "observability")]
    describe_histogram!(
        "ggp_rpc_call_latency_seconds",
        Unit::Seconds,
        "Latency of RPC calls by method."
    );
    #[cfg(not(feature = "observability"))]
    describe_histogram!("ggp_rpc_call_latency_seconds", "Latency of RPC calls by method.");
    describe_counter!("ggp_cache_hits_total", "Registry cache hits, by table.");
    describe_counter!("ggp_cache_miss_total", "Registry cache misses, by table.");
    describe_gauge!("ggp_cache_size", "Entries per registry cache table.");
    describe_histogram!("ggp_batch_width", "Tasks launched per fetch batch.");
    describe_counter!("ggp_batch_failures_total", "Batch fetches aborted by a failing task.");
    describe_histogram!("ggp_log_chunks", "Sub-queries issued per chunked log query.");
}

pub fn record_rpc_call(method: &'static str, duration: Duration, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("ggp_rpc_calls_total", 1, "method" => method, "outcome" => outcome);
    histogram!("ggp_rpc_call_latency_seconds", duration.as_secs_f64(), "method" => method);
}

pub fn increment_cache_hit(cache_name: &'static str) {
    counter!("ggp_cache_hits_total", 1, "cache" => cache_name);
}

pub fn increment_cache_miss(cache_name: &'static str) {
    counter!("ggp_cache_miss_total", 1, "cache" => cache_name);
}

pub fn set_cache_size(cache_name: &'static str, size: f64) {
    gauge!("ggp_cache_size", size, "cache" => cache_name);
}

pub fn record_batch_width(width: f64) {
    histogram!("ggp_batch_width", width);
}

pub fn increment_batch_failures() {
    counter!("ggp_batch_failures_total", 1);
}

pub fn record_log_chunks(chunks: f64) {
    histogram!("ggp_log_chunks", chunks);
}

/// Installs the Prometheus exporter on `addr` and registers metric descriptions.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(addr: std::net::SocketAddr) -> Result<(), String> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())?;
    describe_metrics();
    Ok(())
}

/// Installs a `tracing` subscriber; JSON output when `json` is set.
#[cfg(feature = "observability")]
pub fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt().with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        log::warn!("tracing subscriber already installed: {}", e);
    }
}
