//! Scaling Controller: the one periodic task that evaluates load and
//! forecasts and grows or shrinks the fleet.
//!
//! The loop itself, and its shutdown handshake, follow the same
//! `watch::channel<bool>` plus `tokio::select!` race used for graceful
//! shutdown elsewhere in this codebase: a single task loops `{sleep
//! EVAL_PERIOD; tick}` and exits early when the shutdown watch flips.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::{Config, ForecastMode};
use crate::dispatch::HealthAwareDispatcher;
use crate::forecast::{Forecast, ForecastClient, PredictionContext, PredictResult};
use crate::load::LoadHistory;
use crate::metrics::{MetricRegistry, ScaleCause, ScaleDecision};

pub struct ScalingController {
    config: Config,
    dispatcher: Arc<HealthAwareDispatcher>,
    forecast_client: Arc<ForecastClient>,
    metrics: Arc<MetricRegistry>,
    fleet: std::sync::atomic::AtomicUsize,
    ops_counter: AtomicU64,
    tick_started_at: std::sync::Mutex<Instant>,
    history: std::sync::Mutex<LoadHistory>,
    last_forecast: std::sync::Mutex<Option<Forecast>>,
    forecast_mode: std::sync::Mutex<ForecastMode>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ScalingController {
    pub fn new(
        config: Config,
        dispatcher: Arc<HealthAwareDispatcher>,
        forecast_client: Arc<ForecastClient>,
        metrics: Arc<MetricRegistry>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let history_len = config.history_len;
        let forecast_mode = config.forecast_mode;
        let fleet_min = config.fleet_min;
        Arc::new(Self {
            config,
            dispatcher,
            forecast_client,
            metrics,
            fleet: std::sync::atomic::AtomicUsize::new(fleet_min),
            ops_counter: AtomicU64::new(0),
            tick_started_at: std::sync::Mutex::new(Instant::now()),
            history: std::sync::Mutex::new(LoadHistory::new(history_len)),
            last_forecast: std::sync::Mutex::new(None),
            forecast_mode: std::sync::Mutex::new(forecast_mode),
            running: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            handle: AsyncMutex::new(None),
        })
    }

    pub fn fleet(&self) -> usize {
        self.fleet.load(Ordering::SeqCst)
    }

    /// Hot-path: O(1), non-blocking.
    pub fn record_operation(&self) {
        self.ops_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Idempotent: a second call while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let eval_period = this.config.eval_period;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(eval_period) => {
                        this.tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        // handle stashed without blocking the caller; `stop` awaits it.
        if let Ok(mut guard) = self.handle.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Signals the loop to exit; blocks up to `SHUTDOWN_GRACE` for the
    /// current tick to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(self.config.shutdown_grace, handle).await;
        }
    }

    pub fn manual_scale_up(&self) {
        if self.try_grow() {
            self.metrics.record_decision(&ScaleDecision::Up { cause: ScaleCause::Manual });
        }
    }

    pub fn manual_scale_down(&self) {
        if self.try_shrink() {
            self.metrics.record_decision(&ScaleDecision::Down { cause: ScaleCause::Manual });
        }
    }

    /// Grows the fleet by one, re-checking `fleet_max` against the live
    /// value on every CAS retry rather than a value read earlier — the
    /// only way to keep the bound honest when `manual_scale_up`/`_down` and
    /// the tick loop can race each other through the same atomic. Returns
    /// whether the fleet actually grew.
    fn try_grow(&self) -> bool {
        loop {
            let current = self.fleet.load(Ordering::SeqCst);
            if current >= self.config.fleet_max {
                return false;
            }
            if self
                .fleet
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.dispatcher.set_health(current, true);
                return true;
            }
        }
    }

    /// Shrinks the fleet by one, re-checking `fleet_min` on every CAS
    /// retry. Returns whether the fleet actually shrank.
    fn try_shrink(&self) -> bool {
        loop {
            let current = self.fleet.load(Ordering::SeqCst);
            if current <= self.config.fleet_min {
                return false;
            }
            if self
                .fleet
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.dispatcher.set_health(current - 1, false);
                return true;
            }
        }
    }

    /// Respects the one-way latch: rejected once the forecast client has
    /// tripped into reactive mode.
    pub fn set_forecast_mode(&self, enabled: bool) {
        if enabled && self.forecast_client.latch_tripped() {
            tracing::warn!("rejected re-enabling proactive mode: forecast latch has tripped");
            return;
        }
        let mut mode = self.forecast_mode.lock().expect("forecast mode lock poisoned");
        *mode = if enabled { ForecastMode::Auto } else { ForecastMode::ForceReactive };
    }

    fn forecasting_enabled(&self) -> bool {
        let mode = *self.forecast_mode.lock().expect("forecast mode lock poisoned");
        mode == ForecastMode::Auto && !self.forecast_client.latch_tripped()
    }

    pub fn snapshot(&self) -> MetricsSnapshotParts {
        MetricsSnapshotParts {
            fleet: self.fleet(),
            scale_ups_total: self.metrics.scale_ups_total(),
            scale_downs_total: self.metrics.scale_downs_total(),
            scale_ups_by_cause: self.metrics.scale_ups_by_cause(),
            rmse: self.metrics.rmse(),
            mae: self.metrics.mae(),
            mape: self.metrics.mape(),
            ci_hit_rate: self.metrics.ci_hit_rate(),
        }
    }

    /// One iteration of the control loop: sample load, normalize to
    /// utilization, fold into the rolling average, branch proactive or
    /// reactive, apply the resulting decision, record it.
    pub async fn tick(&self) {
        // Step 1: instantaneous load.
        let elapsed_ms = {
            let mut started = self.tick_started_at.lock().expect("tick timer lock poisoned");
            let elapsed = started.elapsed().as_millis().max(1) as f64;
            *started = Instant::now();
            elapsed
        };
        let ops = self.ops_counter.swap(0, Ordering::Relaxed);
        let mut ops_per_sec = ops as f64 * 1000.0 / elapsed_ms;
        if self.config.simulation_noise {
            let jitter = rand::Rng::gen_range(&mut rand::thread_rng(), -0.05..=0.05);
            ops_per_sec = (ops_per_sec * (1.0 + jitter)).max(0.0);
        }

        // Step 2: normalize to utilization.
        let fleet = self.fleet();
        let capacity_ops = fleet as f64 * self.config.per_slot_capacity;
        let u = (ops_per_sec / capacity_ops.max(f64::EPSILON)).min(1.0);

        // Step 3: append to ring, compute average.
        let avg_u = {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.push(u);
            history.average()
        };

        // Step 4: approximate requests/hour.
        let req_per_hour = avg_u * fleet as f64 * self.config.per_slot_capacity * 3600.0;

        // Step 5: branch on mode.
        let decision = if self.forecasting_enabled() {
            self.evaluate_proactive(req_per_hour, fleet).await
        } else {
            self.evaluate_reactive(avg_u, fleet)
        };

        // Step 6: effect the decision. A decision computed against a
        // `fleet` snapshot taken before an `.await` (the proactive branch)
        // can be stale by the time it's applied; `apply_decision` re-checks
        // bounds at the point of mutation rather than trusting it.
        let applied = self.apply_decision(decision);

        // Step 7: record metrics, but only for decisions that actually
        // took effect — a decision rejected at mutation time didn't happen.
        if applied {
            self.metrics.record_decision(&decision);
        }
    }

    async fn evaluate_proactive(&self, req_per_hour: f64, fleet: usize) -> ScaleDecision {
        let historical = {
            let history = self.history.lock().expect("history lock poisoned");
            history.recent_for_forecast(fleet as f64 * self.config.per_slot_capacity * 3600.0)
        };
        let ctx = PredictionContext {
            now: Utc::now(),
            current_load: req_per_hour,
            historical_loads: historical,
        };

        match self.forecast_client.predict(ctx).await {
            PredictResult::Forecast(forecast) => {
                let capacity = fleet as f64 * self.config.per_slot_capacity * 3600.0;
                let decision = if forecast.point > self.config.scale_up_ratio * capacity
                    && fleet < self.config.fleet_max
                {
                    ScaleDecision::Up { cause: ScaleCause::Proactive }
                } else if forecast.point < self.config.scale_down_ratio * capacity
                    && fleet > self.config.fleet_min
                {
                    ScaleDecision::Down { cause: ScaleCause::Proactive }
                } else {
                    ScaleDecision::Hold
                };

                let previous = {
                    let mut last = self.last_forecast.lock().expect("last forecast lock poisoned");
                    let previous = last.clone();
                    *last = Some(forecast);
                    previous
                };
                if let Some(previous) = previous {
                    if !previous.is_stale(self.config.cache_ttl) {
                        self.forecast_client.record_actual(previous, req_per_hour);
                    }
                }

                decision
            }
            PredictResult::Unavailable => self.evaluate_reactive(
                {
                    let history = self.history.lock().expect("history lock poisoned");
                    history.average()
                },
                fleet,
            ),
        }
    }

    fn evaluate_reactive(&self, avg_u: f64, fleet: usize) -> ScaleDecision {
        if avg_u > self.config.scale_up_ratio && fleet < self.config.fleet_max {
            ScaleDecision::Up { cause: ScaleCause::Reactive }
        } else if avg_u < self.config.scale_down_ratio && fleet > self.config.fleet_min {
            ScaleDecision::Down { cause: ScaleCause::Reactive }
        } else {
            ScaleDecision::Hold
        }
    }

    /// Returns whether the decision was actually applied. `Up`/`Down` defer
    /// to the same bound-checked CAS loop `manual_scale_up`/`_down` use, so
    /// a decision that's gone stale against a concurrent manual call or
    /// another tick never pushes the fleet outside `[fleet_min, fleet_max]`.
    fn apply_decision(&self, decision: ScaleDecision) -> bool {
        match decision {
            ScaleDecision::Up { .. } => self.try_grow(),
            ScaleDecision::Down { .. } => self.try_shrink(),
            ScaleDecision::Hold => true,
        }
    }
}

/// Fields `ScalingController` is responsible for in the merged
/// `MetricsSnapshot`; FEC/HAD contribute the rest (see
/// [`crate::controller::Controller::snapshot`]).
pub struct MetricsSnapshotParts {
    pub fleet: usize,
    pub scale_ups_total: u64,
    pub scale_downs_total: u64,
    pub scale_ups_by_cause: std::collections::HashMap<String, u64>,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub ci_hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::AlwaysUpProbe;
    use std::time::Duration as StdDuration;

    fn controller_parts() -> (Arc<HealthAwareDispatcher>, Arc<ForecastClient>, Arc<MetricRegistry>) {
        let metrics = Arc::new(MetricRegistry::new());
        let dispatcher = Arc::new(HealthAwareDispatcher::new(
            StdDuration::from_secs(10),
            Box::new(AlwaysUpProbe),
            crate::config::ProbeFailurePolicy::OptimisticUp,
            None,
        ));
        let forecast = Arc::new(ForecastClient::new(
            "http://unreachable.invalid:1".to_string(),
            StdDuration::from_millis(50),
            StdDuration::from_millis(50),
            StdDuration::from_secs(300),
            3,
            Arc::clone(&metrics),
        ));
        (dispatcher, forecast, metrics)
    }

    #[tokio::test]
    async fn bounds_respected_on_manual_scale_up() {
        let (dispatcher, forecast, metrics) = controller_parts();
        let mut config = Config::default();
        config.fleet_min = 1;
        config.fleet_max = 5;
        let sc = ScalingController::new(config, dispatcher, forecast, metrics);
        for _ in 0..1 {
            sc.manual_scale_up();
        }
        for _ in 0..10 {
            sc.manual_scale_up();
        }
        assert_eq!(sc.fleet(), 5);
    }

    #[tokio::test]
    async fn manual_scale_up_noop_past_max_does_not_increment_counter() {
        let (dispatcher, forecast, metrics) = controller_parts();
        let mut config = Config::default();
        config.fleet_max = 2;
        let sc = ScalingController::new(config, dispatcher, forecast, metrics);
        sc.manual_scale_up(); // 1 -> 2
        assert_eq!(sc.fleet(), 2);
        let before = sc.metrics.scale_ups_total();
        sc.manual_scale_up(); // no-op, at max
        sc.manual_scale_up();
        assert_eq!(sc.fleet(), 2);
        assert_eq!(sc.metrics.scale_ups_total(), before);
    }

    #[tokio::test]
    async fn reactive_scale_down_scenario() {
        let (dispatcher, forecast, metrics) = controller_parts();
        let mut config = Config::default();
        config.forecast_mode = ForecastMode::ForceReactive;
        let sc = ScalingController::new(config, dispatcher, forecast, metrics);
        sc.manual_scale_up(); // fleet = 2
        assert_eq!(sc.fleet(), 2);

        {
            let mut history = sc.history.lock().unwrap();
            for rate in [0.10, 0.15, 0.12, 0.11, 0.13] {
                history.push(rate);
            }
        }
        let decision = sc.evaluate_reactive(0.122, sc.fleet());
        assert!(matches!(decision, ScaleDecision::Down { cause: ScaleCause::Reactive }));
        assert!(sc.apply_decision(decision));
        assert_eq!(sc.fleet(), 1);
    }

    /// Guards against applying a `Down` decision computed against a fleet
    /// snapshot that's since dropped to `fleet_min` (e.g. a concurrent
    /// manual scale-down won the race) — the decision must be rejected,
    /// not pushed below the bound.
    #[tokio::test]
    async fn stale_down_decision_does_not_cross_fleet_min() {
        let (dispatcher, forecast, metrics) = controller_parts();
        let config = Config::default(); // fleet_min = 1
        let sc = ScalingController::new(config, dispatcher, forecast, metrics);
        assert_eq!(sc.fleet(), 1);

        let stale_decision = ScaleDecision::Down { cause: ScaleCause::Proactive };
        let applied = sc.apply_decision(stale_decision);
        assert!(!applied);
        assert_eq!(sc.fleet(), 1);
    }

    /// Symmetric case: an `Up` decision computed while the fleet still had
    /// room, applied after a concurrent event already grew it to max.
    #[tokio::test]
    async fn stale_up_decision_does_not_cross_fleet_max() {
        let (dispatcher, forecast, metrics) = controller_parts();
        let mut config = Config::default();
        config.fleet_max = 1;
        let sc = ScalingController::new(config, dispatcher, forecast, metrics);
        assert_eq!(sc.fleet(), 1);

        let stale_decision = ScaleDecision::Up { cause: ScaleCause::Reactive };
        let applied = sc.apply_decision(stale_decision);
        assert!(!applied);
        assert_eq!(sc.fleet(), 1);
    }

    #[tokio::test]
    async fn start_stop_is_idempotent_and_graceful() {
        let (dispatcher, forecast, metrics) = controller_parts();
        let mut config = Config::default();
        config.eval_period = StdDuration::from_millis(10);
        config.shutdown_grace = StdDuration::from_secs(1);
        let sc = ScalingController::new(config, dispatcher, forecast, metrics);
        sc.start();
        sc.start(); // no-op, already running
        tokio::time::sleep(StdDuration::from_millis(25)).await;
        sc.stop().await;
        sc.stop().await; // no-op, already stopped
    }
}
