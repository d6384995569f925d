//! Prometheus metrics for the graph reader.
//!
//! Exposes:
//! - `graph_reader_command_duration_seconds` (histogram)
//! - `graph_reader_command_total` (counter with status)
//! - `graph_reader_command_inflight` (gauge)
//! - `graph_reader_oracle_calls_total` (counter by call kind and status)
//! - `graph_reader_chunks_skipped_total` (counter)
//! - `graph_reader_query_stage_seconds` (histogram by controller stage)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 50ms up to ~3 minutes.
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "graph_reader_command_duration_seconds",
        "CLI command duration in seconds",
        &["command"],
        buckets
    )
    .expect("failed to register command duration histogram")
});

static COMMAND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "graph_reader_command_total",
        "Total command executions by status",
        &["command", "status"]
    )
    .expect("failed to register command counter")
});

static COMMAND_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "graph_reader_command_inflight",
        "Number of in-flight commands",
        &["command"]
    )
    .expect("failed to register inflight gauge")
});

static ORACLE_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "graph_reader_oracle_calls_total",
        "Language model and embedding calls by kind and status",
        &["kind", "status"]
    )
    .expect("failed to register oracle call counter")
});

static CHUNKS_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "graph_reader_chunks_skipped_total",
        "Chunks that yielded no facts during extraction"
    )
    .expect("failed to register skipped chunk counter")
});

static QUERY_STAGE: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets =
        prometheus::exponential_buckets(0.1, 2.0, 12).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "graph_reader_query_stage_seconds",
        "Retrieval controller stage duration in seconds",
        &["stage"],
        buckets
    )
    .expect("failed to register query stage histogram")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&COMMAND_DURATION);
    Lazy::force(&COMMAND_TOTAL);
    Lazy::force(&COMMAND_INFLIGHT);
    Lazy::force(&ORACLE_CALLS);
    Lazy::force(&CHUNKS_SKIPPED);
    Lazy::force(&QUERY_STAGE);
}

fn status(success: bool) -> &'static str {
    if success {
        "ok"
    } else {
        "error"
    }
}

/// Increment inflight gauge for a command.
pub fn record_command_start(command: &'static str) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).inc();
}

/// Record command completion with duration and status.
pub fn record_command_result(command: &'static str, duration: Duration, success: bool) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).dec();
    COMMAND_DURATION
        .with_label_values(&[command])
        .observe(duration.as_secs_f64());
    COMMAND_TOTAL
        .with_label_values(&[command, status(success)])
        .inc();
}

/// Count one language-model or embedding call.
pub fn record_oracle_call(kind: &str, success: bool) {
    ORACLE_CALLS
        .with_label_values(&[kind, status(success)])
        .inc();
}

/// Count a chunk skipped during fact extraction.
pub fn record_chunk_skipped() {
    CHUNKS_SKIPPED.inc();
}

/// Record how long a controller stage took.
pub fn record_stage(stage: &str, duration: Duration) {
    QUERY_STAGE
        .with_label_values(&[stage])
        .observe(duration.as_secs_f64());
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::from("encode error"))
            .unwrap());
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, encoder.format_type())
        .body(Full::from(buffer))
        .unwrap())
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap()),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn metrics_text() -> String {
        let response = metrics_response().await.expect("metrics response");
        assert_eq!(response.status(), StatusCode::OK);
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect metrics body")
            .to_bytes();
        String::from_utf8(body_bytes.to_vec()).expect("utf-8 metrics body")
    }

    #[test]
    fn records_command_lifecycle() {
        let cmd = "test_command_lifecycle";

        record_command_start(cmd);
        assert_eq!(COMMAND_INFLIGHT.with_label_values(&[cmd]).get(), 1);

        record_command_result(cmd, Duration::from_millis(120), true);
        record_command_start(cmd);
        record_command_result(cmd, Duration::from_secs(2), false);

        assert_eq!(COMMAND_INFLIGHT.with_label_values(&[cmd]).get(), 0);
        assert_eq!(COMMAND_TOTAL.with_label_values(&[cmd, "ok"]).get(), 1);
        assert_eq!(COMMAND_TOTAL.with_label_values(&[cmd, "error"]).get(), 1);
        assert_eq!(
            COMMAND_DURATION
                .with_label_values(&[cmd])
                .get_sample_count(),
            2
        );
    }

    #[test]
    fn oracle_calls_are_labelled_by_kind_and_status() {
        let kind = "test_oracle_kind";
        record_oracle_call(kind, true);
        record_oracle_call(kind, true);
        record_oracle_call(kind, false);

        assert_eq!(ORACLE_CALLS.with_label_values(&[kind, "ok"]).get(), 2);
        assert_eq!(ORACLE_CALLS.with_label_values(&[kind, "error"]).get(), 1);
    }

    #[test]
    fn skipped_chunks_only_increase() {
        let before = CHUNKS_SKIPPED.get();
        record_chunk_skipped();
        assert!(CHUNKS_SKIPPED.get() > before);
    }

    #[test]
    fn stage_durations_are_observed() {
        let stage = "test_stage";
        record_stage(stage, Duration::from_millis(250));
        assert_eq!(QUERY_STAGE.with_label_values(&[stage]).get_sample_count(), 1);
        assert!(QUERY_STAGE.with_label_values(&[stage]).get_sample_sum() >= 0.25);
    }

    #[tokio::test]
    async fn metrics_response_exposes_all_families() {
        record_command_start("test_metrics_response");
        record_command_result("test_metrics_response", Duration::from_millis(10), true);
        record_oracle_call("test_metrics_response", true);
        record_chunk_skipped();
        record_stage("test_metrics_response", Duration::from_millis(10));

        let text = metrics_text().await;
        assert!(text.contains("graph_reader_command_total"));
        assert!(text.contains("graph_reader_command_duration_seconds"));
        assert!(text.contains("graph_reader_oracle_calls_total"));
        assert!(text.contains("graph_reader_chunks_skipped_total"));
        assert!(text.contains("graph_reader_query_stage_seconds"));
    }
}
