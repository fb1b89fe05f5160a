//! HTTP route handlers for the control plane's admin surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use fleetctl_core::Controller;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

async fn metrics(State(controller): State<Arc<Controller>>) -> Json<fleetctl_core::MetricsSnapshot> {
    Json(controller.snapshot())
}

async fn fec_snapshot(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    Json(controller.fec_snapshot())
}

#[derive(Debug, Serialize)]
struct DispatchSnapshot {
    health: std::collections::HashMap<usize, bool>,
    stats: DispatchStatsView,
}

#[derive(Debug, Serialize)]
struct DispatchStatsView {
    total_picks: u64,
    healthy_count: usize,
    total_count: usize,
}

async fn dispatch_snapshot(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    let stats = controller.dispatch_stats();
    Json(DispatchSnapshot {
        health: controller.dispatch.health_map(),
        stats: DispatchStatsView {
            total_picks: stats.total_picks,
            healthy_count: stats.healthy_count,
            total_count: stats.total_count,
        },
    })
}

async fn scale_up(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    controller.scaling.manual_scale_up();
    StatusCode::ACCEPTED
}

async fn scale_down(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    controller.scaling.manual_scale_down();
    StatusCode::ACCEPTED
}

#[derive(Debug, Deserialize)]
pub struct ForecastModeRequest {
    pub enabled: bool,
}

async fn forecast_mode(
    State(controller): State<Arc<Controller>>,
    Json(body): Json<ForecastModeRequest>,
) -> impl IntoResponse {
    controller.scaling.set_forecast_mode(body.enabled);
    StatusCode::ACCEPTED
}

pub fn routes(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/fec", get(fec_snapshot))
        .route("/dispatch", get(dispatch_snapshot))
        .route("/scale/up", post(scale_up))
        .route("/scale/down", post(scale_down))
        .route("/forecast/mode", post(forecast_mode))
        .with_state(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use fleetctl_core::Config;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let controller = Controller::new(Config::default(), "http://unreachable.invalid:1");
        let app = routes(controller);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_reports_initial_fleet() {
        let controller = Controller::new(Config::default(), "http://unreachable.invalid:1");
        let app = routes(controller);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["fleet"], 1);
    }

    #[tokio::test]
    async fn scale_up_endpoint_grows_fleet() {
        let controller = Controller::new(Config::default(), "http://unreachable.invalid:1");
        let app = routes(controller.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/scale/up")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(controller.scaling.fleet(), 2);
    }
}
