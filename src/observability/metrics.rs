//! Metrics collection and exposition.
//!
//! # Metrics
//! - `vhost_requests_total` (counter): requests by listener, status
//! - `vhost_request_duration_seconds` (histogram): latency by listener
//! - `vhost_upstream_requests_total` (counter): proxied attempts by handler, outcome
//! - `vhost_listeners_bound` (gauge): listeners currently accepting

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn register_metrics() {
    describe_counter!("vhost_requests_total", "Total number of requests answered by a listener");
    describe_histogram!(
        "vhost_request_duration_seconds",
        "Time spent in the handler chain, in seconds"
    );
    describe_counter!("vhost_upstream_requests_total", "Reverse proxy attempts by outcome");
    describe_gauge!("vhost_listeners_bound", "Listeners currently bound to a socket");
}

pub fn record_request(listener: &str, status: u16, elapsed: Duration) {
    counter!(
        "vhost_requests_total",
        "listener" => listener.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("vhost_request_duration_seconds", "listener" => listener.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_upstream(handler: &str, outcome: &'static str) {
    counter!(
        "vhost_upstream_requests_total",
        "handler" => handler.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn listener_bound(bound: bool) {
    if bound {
        gauge!("vhost_listeners_bound").increment(1.0);
    } else {
        gauge!("vhost_listeners_bound").decrement(1.0);
    }
}
