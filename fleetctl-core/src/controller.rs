//! The constructed `Controller` value: owns one instance of each component,
//! built once at process start and threaded explicitly to callers, per the
//! re-architecture away from module-level singletons.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatch::{DispatchError, DispatchStats, HealthAwareDispatcher};
use crate::fec::{Cancelled, FairExclusionCoordinator, FecGuard, FecSnapshot};
use crate::forecast::ForecastClient;
use crate::metrics::MetricRegistry;
use crate::probe::{AlwaysUpProbe, WorkerProbe};
use crate::scaling::ScalingController;

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub fleet: usize,
    pub scale_ups_total: u64,
    pub scale_downs_total: u64,
    pub scale_ups_by_cause: std::collections::HashMap<String, u64>,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub ci_hit_rate: f64,
    pub mean_wait_ms: f64,
    pub max_wait_ms: f64,
    pub total_admissions: u64,
    pub waiting_now: usize,
}

pub struct Controller {
    pub fec: FairExclusionCoordinator,
    pub dispatch: Arc<HealthAwareDispatcher>,
    pub forecast: Arc<ForecastClient>,
    pub scaling: Arc<ScalingController>,
    pub metrics: Arc<MetricRegistry>,
}

impl Controller {
    pub fn new(config: Config, forecast_base_url: impl Into<String>) -> Arc<Self> {
        Self::with_probe(config, forecast_base_url, Box::new(AlwaysUpProbe))
    }

    pub fn with_probe(
        config: Config,
        forecast_base_url: impl Into<String>,
        probe: Box<dyn WorkerProbe>,
    ) -> Arc<Self> {
        let metrics = Arc::new(MetricRegistry::new());
        let fec = FairExclusionCoordinator::new(config.starvation_warn);
        let dispatch = Arc::new(HealthAwareDispatcher::new(
            config.health_ttl,
            probe,
            config.probe_failure_policy,
            config.latency_sim,
        ));
        let forecast = Arc::new(ForecastClient::new(
            forecast_base_url,
            config.forecast_timeout,
            config.health_timeout,
            config.cache_ttl,
            config.forecast_failure_streak,
            Arc::clone(&metrics),
        ));
        let scaling = ScalingController::new(
            config,
            Arc::clone(&dispatch),
            Arc::clone(&forecast),
            Arc::clone(&metrics),
        );

        Arc::new(Self {
            fec,
            dispatch,
            forecast,
            scaling,
            metrics,
        })
    }

    pub fn start(&self) {
        self.scaling.start();
    }

    pub async fn stop(&self) {
        self.scaling.stop().await;
    }

    /// The protected-operation entry point: callers obtain a guard, execute
    /// protected work, and call `record_operation` inside it. The FEC makes
    /// no assumptions about what that work does.
    pub async fn enter_protected(
        &self,
        name: impl Into<String>,
        cancel: Option<CancellationToken>,
    ) -> Result<FecGuard<'_>, Cancelled> {
        self.fec.enter_scoped(name, cancel).await
    }

    pub async fn pick_dispatch_target(&self, n: usize) -> Result<usize, DispatchError> {
        self.dispatch.pick(n).await
    }

    pub fn fec_snapshot(&self) -> FecSnapshot {
        self.fec.snapshot()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatch.stats()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let fec = self.fec.snapshot();
        let parts = self.scaling.snapshot();
        MetricsSnapshot {
            fleet: parts.fleet,
            scale_ups_total: parts.scale_ups_total,
            scale_downs_total: parts.scale_downs_total,
            scale_ups_by_cause: parts.scale_ups_by_cause,
            rmse: parts.rmse,
            mae: parts.mae,
            mape: parts.mape,
            ci_hit_rate: parts.ci_hit_rate,
            mean_wait_ms: fec.mean_wait_ms,
            max_wait_ms: fec.max_wait_ms,
            total_admissions: fec.total_admissions,
            waiting_now: fec.waiting.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn controller_starts_at_fleet_min_with_empty_history() {
        let controller = Controller::new(Config::default(), "http://unreachable.invalid:1");
        let snap = controller.snapshot();
        assert_eq!(snap.fleet, 1);
        assert_eq!(snap.scale_ups_total, 0);
        assert_eq!(snap.total_admissions, 0);
    }

    #[tokio::test]
    async fn protected_operation_round_trip() {
        let controller = Controller::new(Config::default(), "http://unreachable.invalid:1");
        {
            let _guard = controller.enter_protected("caller-1", None).await.unwrap();
            controller.scaling.record_operation();
        }
        assert_eq!(controller.fec_snapshot().held_by, None);
    }
}
