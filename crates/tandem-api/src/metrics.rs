//! Metrics middleware and instrumentation for the Tandem API.
//!
//! Provides Prometheus metrics for:
//! - Request duration and throughput
//! - Error rates by endpoint
//! - The call lifecycle counters emitted by `tandem-flow`

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use tandem_flow::metrics::names as flow_metrics;

/// API request duration histogram.
pub const API_REQUEST_DURATION: &str = "tandem_api_request_duration_seconds";

/// API request counter.
pub const API_REQUEST_TOTAL: &str = "tandem_api_request_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// Returns a handle for rendering metrics. The handle is also stored
/// globally for use by the `/metrics` endpoint.
///
/// # Panics
///
/// Panics if the Prometheus recorder cannot be installed. Metrics are
/// critical infrastructure and the server should not start without them.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_histogram!(API_REQUEST_DURATION, "Duration of API requests in seconds");
            describe_counter!(API_REQUEST_TOTAL, "Total number of API requests");
            describe_counter!(
                flow_metrics::CALL_TRANSITIONS_TOTAL,
                "Call status transitions applied"
            );
            describe_counter!(
                flow_metrics::DISPATCHES_TOTAL,
                "Outbound dispatch attempts by result"
            );
            describe_histogram!(
                flow_metrics::DISPATCH_DURATION_SECONDS,
                "Duration of provider dispatch calls in seconds"
            );
            describe_counter!(
                flow_metrics::ADMISSION_DENIED_TOTAL,
                "Initiations refused by an admission gate"
            );
            describe_counter!(
                flow_metrics::WEBHOOK_EVENTS_TOTAL,
                "Provider webhook events by type and outcome"
            );
            describe_counter!(
                flow_metrics::CALLS_SWEPT_TOTAL,
                "Stale in-progress calls failed by the sweep"
            );

            tracing::info!("Prometheus metrics recorder initialized");
            handle
        })
        .clone()
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

pub(crate) fn endpoint_label<B>(request: &Request<B>) -> String {
    request.extensions().get::<MatchedPath>().map_or_else(
        || UNMATCHED_ENDPOINT.to_string(),
        |path| path.as_str().to_string(),
    )
}

/// Middleware that records request metrics.
///
/// Captures:
/// - `tandem_api_request_duration_seconds{endpoint, method, status_class}`
/// - `tandem_api_request_total{endpoint, method, status_class}`
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let path = endpoint_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let status_class = status_class(response.status());

    let labels = [
        ("endpoint", path.clone()),
        ("method", method.clone()),
        ("status_class", status_class.to_string()),
    ];

    histogram!(API_REQUEST_DURATION, &labels).record(duration);
    counter!(API_REQUEST_TOTAL, &labels).increment(1);

    // Log slow requests (> 1s)
    if duration > 1.0 {
        tracing::warn!(
            endpoint = %path,
            method = %method,
            status = %status,
            duration_secs = %duration,
            "Slow request detected"
        );
    }

    response
}

/// Returns the status class (2xx, 3xx, 4xx, 5xx) for a status code.
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

/// Handler for the `/metrics` endpoint.
///
/// Returns Prometheus-formatted metrics text.
pub async fn serve_metrics() -> impl IntoResponse {
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let metrics = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                metrics,
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use tower::Service;

    #[test]
    fn status_classes_cover_the_taxonomy() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::TOO_MANY_REQUESTS), "4xx");
        assert_eq!(status_class(StatusCode::BAD_GATEWAY), "5xx");
        assert_eq!(status_class(StatusCode::CONFLICT), "4xx");
    }

    #[test]
    fn unmatched_requests_get_a_bounded_label() {
        let request = Request::builder()
            .uri("/missing")
            .body(Body::empty())
            .unwrap();
        assert_eq!(endpoint_label(&request), UNMATCHED_ENDPOINT);
    }

    #[tokio::test]
    async fn request_metrics_use_the_route_template() {
        let handle = init_metrics();
        let app = Router::new()
            .route("/calls/:id", get(|| async { StatusCode::OK }))
            .route_layer(axum::middleware::from_fn(metrics_middleware));
        let request = Request::builder()
            .uri("/calls/42")
            .body(Body::empty())
            .unwrap();
        let mut service = app.into_service::<Body>();
        let _response = service.call(request).await.unwrap();

        let metrics = handle.render();
        assert!(metrics.contains("endpoint=\"/calls/:id\""));
        assert!(!metrics.contains("endpoint=\"/calls/42\""));
    }
}
