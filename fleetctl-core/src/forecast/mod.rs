//! Forecast Client: a caching request/response client to an external
//! prediction service, with a one-way latch that falls back to reactive
//! mode after a run of failures.
//!
//! The client is built the same way the webhook sender elsewhere in this
//! codebase builds its `reqwest::Client`: explicit timeout, a `User-Agent`
//! header, constructed once at startup.

pub mod wire;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::metrics::MetricRegistry;
use wire::{HealthResponse, PredictRequest, PredictResponse, RecordActualRequest};

/// `{point, lo, hi, horizon, quality, issued_at}`. `lo <= point <= hi` is
/// maintained by construction from a well-formed response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Forecast {
    pub point: f64,
    pub lo: f64,
    pub hi: f64,
    pub horizon: String,
    pub quality: f64,
    #[serde(skip)]
    pub issued_at: Instant,
    pub issued_at_wall: DateTime<Utc>,
}

impl Forecast {
    /// `now - issued_at > cache_ttl`.
    pub fn is_stale(&self, cache_ttl: Duration) -> bool {
        self.issued_at.elapsed() > cache_ttl
    }
}

#[derive(Debug, Clone)]
pub enum PredictResult {
    Forecast(Forecast),
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct PredictionContext {
    pub now: DateTime<Utc>,
    pub current_load: f64,
    pub historical_loads: Vec<f64>,
}

struct CacheEntry {
    forecast: Forecast,
}

pub struct ForecastClient {
    http: reqwest::Client,
    base_url: String,
    cache: Mutex<Option<CacheEntry>>,
    cache_ttl: Duration,
    health_timeout: Duration,
    latch_tripped: AtomicBool,
    failure_streak: AtomicU32,
    failure_streak_threshold: u32,
    metrics: Arc<MetricRegistry>,
}

impl ForecastClient {
    pub fn new(
        base_url: impl Into<String>,
        forecast_timeout: Duration,
        health_timeout: Duration,
        cache_ttl: Duration,
        failure_streak_threshold: u32,
        metrics: Arc<MetricRegistry>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(forecast_timeout)
            .user_agent(concat!("fleetctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build forecast http client");

        Self {
            http,
            base_url: base_url.into(),
            cache: Mutex::new(None),
            cache_ttl,
            health_timeout,
            latch_tripped: AtomicBool::new(false),
            failure_streak: AtomicU32::new(0),
            failure_streak_threshold,
            metrics,
        }
    }

    /// True once a streak of `Unavailable` results has tripped the one-way
    /// latch. Never resets for the lifetime of this client.
    pub fn latch_tripped(&self) -> bool {
        self.latch_tripped.load(Ordering::Relaxed)
    }

    /// Returns the cached forecast if it's fresh, else issues a request.
    /// Never panics; transport failure, protocol error, malformed response,
    /// and timeout all collapse to `Unavailable`.
    pub async fn predict(&self, ctx: PredictionContext) -> PredictResult {
        if let Some(cached) = self.fresh_cached_forecast() {
            return PredictResult::Forecast(cached);
        }

        let body = PredictRequest {
            current_time: ctx.now.to_rfc3339(),
            current_load: ctx.current_load,
            historical_loads: ctx.historical_loads.into_iter().take(24).collect(),
        };

        let url = format!("{}/predict", self.base_url);
        let response = self.http.post(&url).json(&body).send().await;

        let parsed = match response {
            Ok(resp) if resp.status().is_success() => resp.json::<PredictResponse>().await.ok(),
            _ => None,
        };

        match parsed {
            Some(p) if p.confidence_lower <= p.predicted_load && p.predicted_load <= p.confidence_upper => {
                self.failure_streak.store(0, Ordering::Relaxed);
                let forecast = Forecast {
                    point: p.predicted_load,
                    lo: p.confidence_lower,
                    hi: p.confidence_upper,
                    horizon: p.prediction_horizon,
                    quality: p.model_accuracy,
                    issued_at: Instant::now(),
                    issued_at_wall: Utc::now(),
                };
                *self.cache.lock().expect("forecast cache lock poisoned") = Some(CacheEntry {
                    forecast: forecast.clone(),
                });
                PredictResult::Forecast(forecast)
            }
            _ => {
                self.record_failure();
                PredictResult::Unavailable
            }
        }
    }

    fn fresh_cached_forecast(&self) -> Option<Forecast> {
        let cache = self.cache.lock().expect("forecast cache lock poisoned");
        cache
            .as_ref()
            .filter(|entry| !entry.forecast.is_stale(self.cache_ttl))
            .map(|entry| entry.forecast.clone())
    }

    fn record_failure(&self) {
        let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= self.failure_streak_threshold {
            if !self.latch_tripped.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    streak,
                    "forecast service failure streak tripped the one-way reactive latch"
                );
            }
        }
    }

    /// Cheap liveness probe on a separate endpoint, short timeout.
    pub async fn is_service_up(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).timeout(self.health_timeout).send().await;
        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthResponse>().await {
                Ok(body) => body.status == "healthy",
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Fire-and-forget report of the realized load, mirroring the
    /// non-terminal webhook send pattern used elsewhere: spawned, errors
    /// logged, never surfaced to the caller. The local metric update,
    /// unlike the network call, happens synchronously.
    pub fn record_actual(self: &Arc<Self>, forecast: Forecast, observed: f64) {
        self.metrics.record_forecast_outcome(forecast.clone(), observed);

        let client = Arc::clone(self);
        tokio::spawn(async move {
            let url = format!("{}/record_actual", client.base_url);
            let body = RecordActualRequest {
                predicted_load: forecast.point,
                actual_load: observed,
            };
            if let Err(err) = client.http.post(&url).json(&body).send().await {
                tracing::debug!(error = %err, "record_actual delivery failed (best-effort)");
            }
        });
    }

    /// Per the caching law, neither this nor `record_actual` evict the
    /// cache; only TTL expiry does. This is intentionally a no-op.
    pub fn invalidate_cache(&self) {
        tracing::trace!("invalidate_cache called; cache eviction is TTL-only and was not performed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> PredictionContext {
        PredictionContext {
            now: Utc::now(),
            current_load: 450.0,
            historical_loads: vec![400.0, 410.0, 420.0],
        }
    }

    fn client(base_url: String) -> Arc<ForecastClient> {
        Arc::new(ForecastClient::new(
            base_url,
            Duration::from_secs(10),
            Duration::from_secs(5),
            Duration::from_secs(300),
            3,
            Arc::new(MetricRegistry::new()),
        ))
    }

    #[tokio::test]
    async fn cache_hit_avoids_second_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "predicted_load": 820.0,
                "confidence_lower": 780.0,
                "confidence_upper": 860.0,
                "prediction_horizon": "30_minutes",
                "model_accuracy": 0.89
            })))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(server.uri());
        let first = c.predict(ctx()).await;
        let second = c.predict(ctx()).await;
        assert!(matches!(first, PredictResult::Forecast(_)));
        assert!(matches!(second, PredictResult::Forecast(_)));
    }

    #[tokio::test]
    async fn repeated_failures_trip_latch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let c = client(server.uri());
        for _ in 0..3 {
            let outcome = c.predict(ctx()).await;
            assert!(matches!(outcome, PredictResult::Unavailable));
        }
        assert!(c.latch_tripped());
    }

    #[tokio::test]
    async fn is_service_up_reflects_health_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "healthy",
                "model_loaded": true
            })))
            .mount(&server)
            .await;

        let c = client(server.uri());
        assert!(c.is_service_up().await);
    }

    #[tokio::test]
    async fn record_actual_updates_metrics_synchronously() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/record_actual"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let c = client(server.uri());
        let forecast = Forecast {
            point: 100.0,
            lo: 90.0,
            hi: 110.0,
            horizon: "30_minutes".to_string(),
            quality: 0.9,
            issued_at: Instant::now(),
            issued_at_wall: Utc::now(),
        };
        c.record_actual(forecast, 95.0);
        assert_eq!(c.metrics.forecast_record_count(), 1);
    }
}
