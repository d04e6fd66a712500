use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!("board_cache_hits_total", "Cache lookups that hit.");
    describe_counter!("board_cache_misses_total", "Cache lookups that missed.");
    describe_counter!(
        "board_enrichment_fetch_errors_total",
        "Upstream profile fetches that failed and degraded to the unknown sentinel."
    );
    describe_counter!(
        "board_enrichment_unknown_total",
        "Provider responses with a non-success, non-pending status."
    );
    describe_counter!(
        "board_leaderboard_requests_total",
        "Leaderboard snapshots served."
    );
    describe_counter!("board_db_query_errors_total", "Failed SQLite operations.");
    describe_histogram!(
        "board_db_query_latency_ms",
        "SQLite operation latency in milliseconds."
    );
}

pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?)
}
