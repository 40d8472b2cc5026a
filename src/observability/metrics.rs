//! Metrics collection and exposition.
//!
//! # Metrics
//! - `reloader_apply_total` (counter): apply attempts by result
//! - `reloader_reload_total` (counter): reload attempts by outcome
//! - `reloader_rollback_total` (counter): rollbacks by result
//! - `reloader_install_duration_seconds` (histogram): stage + check + swap time

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_apply(result: &'static str) {
    counter!("reloader_apply_total", "result" => result).increment(1);
}

pub fn record_reload(outcome: &'static str) {
    counter!("reloader_reload_total", "outcome" => outcome).increment(1);
}

pub fn record_rollback(result: &'static str) {
    counter!("reloader_rollback_total", "result" => result).increment(1);
}

pub fn record_install_duration(elapsed: Duration) {
    histogram!("reloader_install_duration_seconds").record(elapsed.as_secs_f64());
}
