use std::future::ready;

use axum::routing::get;
use axum::Router;
use health::HealthRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::gateway::QueueGateway;
use crate::prometheus::track_metrics;
use crate::queues;

async fn index() -> &'static str {
    "queue-gateway"
}

/// `metrics` is only set when a global recorder was installed; `/metrics` is
/// left unrouted otherwise.
pub fn router(
    gateway: QueueGateway,
    liveness: HealthRegistry,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route(
            "/queues/:queue_name",
            get(queues::consume).post(queues::produce),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(gateway);

    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
