//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Requests dispatched to an operator
    pub static ref OPERATOR_REQUESTS: CounterVec = register_counter_vec!(
        "service_broker_operator_requests_total",
        "Total number of requests dispatched to operators",
        &["kind", "state"]
    ).unwrap();

    /// Requests whose handler failed
    pub static ref OPERATOR_FAILURES: CounterVec = register_counter_vec!(
        "service_broker_operator_request_failures_total",
        "Total number of failed operator requests",
        &["kind"]
    ).unwrap();

    /// Handler duration histogram
    pub static ref OPERATOR_DURATION: HistogramVec = register_histogram_vec!(
        "service_broker_operator_request_duration_seconds",
        "Duration of operator request handling in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Resources currently being polled
    pub static ref ACTIVE_POLLERS: GaugeVec = register_gauge_vec!(
        "service_broker_operator_active_pollers",
        "Number of resources with an active poller",
        &["poller"]
    ).unwrap();

    /// Poll ticks executed
    pub static ref POLL_TICKS: CounterVec = register_counter_vec!(
        "service_broker_operator_poll_ticks_total",
        "Total number of status poll ticks",
        &["poller"]
    ).unwrap();

    /// Poll ticks that ended in an error
    pub static ref POLL_FAILURES: CounterVec = register_counter_vec!(
        "service_broker_operator_poll_failures_total",
        "Total number of status polls that failed the resource",
        &["poller"]
    ).unwrap();

    /// Finished director tasks per restore phase
    pub static ref TASK_OUTCOMES: CounterVec = register_counter_vec!(
        "service_broker_operator_task_outcomes_total",
        "Finished director tasks by phase and outcome",
        &["phase", "outcome"]
    ).unwrap();

    /// Watch stream errors
    pub static ref WATCH_ERRORS: CounterVec = register_counter_vec!(
        "service_broker_operator_watch_errors_total",
        "Total number of watch stream errors",
        &["kind"]
    ).unwrap();

    /// Metering events archived and deleted
    pub static ref ARCHIVED_EVENTS: prometheus::Counter = prometheus::register_counter!(
        "service_broker_operator_archived_events_total",
        "Total number of metered events archived"
    ).unwrap();

    /// Delete attempts made while archiving
    pub static ref ARCHIVE_DELETE_ATTEMPTS: prometheus::Counter = prometheus::register_counter!(
        "service_broker_operator_archive_delete_attempts_total",
        "Total number of metered event delete attempts"
    ).unwrap();

    /// Archive job runs by outcome
    pub static ref ARCHIVE_RUNS: CounterVec = register_counter_vec!(
        "service_broker_operator_archive_runs_total",
        "Total number of archive job runs by outcome",
        &["outcome"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "service_broker_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path()))
}

fn route(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" | "/readyz" | "/ready" => health_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Healthy while the operator has not flagged itself unhealthy
fn health_response() -> Response<Full<Bytes>> {
    if OPERATOR_HEALTH.get() > 0.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
