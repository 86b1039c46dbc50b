//! Metrics facade.
//!
//! # Design summary
//! - **Why**: spec §2/§4.8 names the gauges/counters/histograms the gateway
//!   must expose but, like the teacher's `observability::facade`, call sites
//!   should never touch the `metrics` crate's macros directly — a facade
//!   means the metric name strings live in exactly one place and a rename
//!   can't silently desync a counter from its Prometheus dashboard.
//! - **What**: each function below is a thin wrapper; `gateway-server`
//!   installs the actual recorder (`metrics-exporter-prometheus`) at
//!   startup. Without a recorder installed these calls are no-ops, which
//!   keeps every other crate's unit tests free of metrics wiring.

use metrics::{counter, gauge, histogram};

pub fn connection_opened() {
    counter!("connections_total", "outcome" => "opened").increment(1);
}

pub fn connection_closed(reason: &'static str) {
    counter!("connections_total", "outcome" => reason).increment(1);
}

pub fn connections_active_set(count: i64) {
    gauge!("connections_active").set(count as f64);
}

pub fn inbound_message(kind: &'static str) {
    counter!("messages_inbound_total", "type" => kind).increment(1);
}

pub fn outbound_message(kind: &'static str) {
    counter!("messages_outbound_total", "kind" => kind).increment(1);
}

pub fn push_delivered(count: u64) {
    counter!("push_delivered_total").increment(count);
}

pub fn push_failed(count: u64) {
    counter!("push_failed_total").increment(count);
}

pub fn dedup_hit() {
    counter!("dedup_hits_total").increment(1);
}

pub fn dedup_store_failure() {
    counter!("dedup_store_failures_total").increment(1);
}

pub fn rate_limit_rejection() {
    counter!("rate_limit_rejections_total").increment(1);
}

pub fn membership_cache_hit() {
    counter!("membership_cache_hits_total").increment(1);
}

pub fn membership_cache_miss() {
    counter!("membership_cache_misses_total").increment(1);
}

pub fn membership_cache_large_groups_set(count: i64) {
    gauge!("membership_cache_large_groups").set(count as f64);
}

pub fn membership_cache_bytes_approx_set(bytes: i64) {
    gauge!("membership_cache_bytes_approx").set(bytes as f64);
}

pub fn auth_latency(seconds: f64) {
    histogram!("auth_latency_seconds").record(seconds);
}

pub fn routing_call_latency(seconds: f64) {
    histogram!("routing_call_latency_seconds").record(seconds);
}

pub fn push_write_latency(seconds: f64) {
    histogram!("push_write_latency_seconds").record(seconds);
}
