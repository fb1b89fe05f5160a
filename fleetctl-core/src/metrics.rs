//! Metric Registry: monotonic counters plus a rolling forecast-accuracy
//! window of forecast/observed pairs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::forecast::Forecast;

const FORECAST_HISTORY_CAP: usize = 1000;

/// Why a scaling decision happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleCause {
    Proactive,
    Reactive,
    Manual,
}

impl ScaleCause {
    fn index(self) -> usize {
        match self {
            ScaleCause::Proactive => 0,
            ScaleCause::Reactive => 1,
            ScaleCause::Manual => 2,
        }
    }
}

/// `{UP | DOWN | HOLD}` tagged with a cause and a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleDecision {
    Up { cause: ScaleCause },
    Down { cause: ScaleCause },
    Hold,
}

#[derive(Debug)]
pub struct MetricRegistry {
    scale_ups_total: AtomicU64,
    scale_downs_total: AtomicU64,
    scale_ups_by_cause: [AtomicU64; 3],
    forecast_history: Mutex<VecDeque<(Forecast, f64)>>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            scale_ups_total: AtomicU64::new(0),
            scale_downs_total: AtomicU64::new(0),
            scale_ups_by_cause: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            forecast_history: Mutex::new(VecDeque::with_capacity(64)),
        }
    }

    pub fn record_decision(&self, decision: &ScaleDecision) {
        match decision {
            ScaleDecision::Up { cause } => {
                self.scale_ups_total.fetch_add(1, Ordering::Relaxed);
                self.scale_ups_by_cause[cause.index()].fetch_add(1, Ordering::Relaxed);
            }
            ScaleDecision::Down { .. } => {
                self.scale_downs_total.fetch_add(1, Ordering::Relaxed);
            }
            ScaleDecision::Hold => {}
        }
    }

    pub fn scale_ups_total(&self) -> u64 {
        self.scale_ups_total.load(Ordering::Relaxed)
    }

    pub fn scale_downs_total(&self) -> u64 {
        self.scale_downs_total.load(Ordering::Relaxed)
    }

    /// Fold a `(forecast, observed)` pair into the rolling window. The
    /// window is capped at 1000 entries, oldest dropped first.
    pub fn record_forecast_outcome(&self, forecast: Forecast, observed: f64) {
        let mut history = self.forecast_history.lock().expect("forecast history lock poisoned");
        if history.len() == FORECAST_HISTORY_CAP {
            history.pop_front();
        }
        history.push_back((forecast, observed));
    }

    pub fn forecast_record_count(&self) -> usize {
        self.forecast_history
            .lock()
            .expect("forecast history lock poisoned")
            .len()
    }

    /// RMSE over the current window; 0 when empty.
    pub fn rmse(&self) -> f64 {
        let history = self.forecast_history.lock().expect("forecast history lock poisoned");
        if history.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = history
            .iter()
            .map(|(f, observed)| (f.point - observed).powi(2))
            .sum();
        (sum_sq / history.len() as f64).sqrt()
    }

    /// MAE over the current window; 0 when empty.
    pub fn mae(&self) -> f64 {
        let history = self.forecast_history.lock().expect("forecast history lock poisoned");
        if history.is_empty() {
            return 0.0;
        }
        history.iter().map(|(f, observed)| (f.point - observed).abs()).sum::<f64>()
            / history.len() as f64
    }

    /// MAPE over the current window, excluding `observed == 0`; 0 when empty.
    pub fn mape(&self) -> f64 {
        let history = self.forecast_history.lock().expect("forecast history lock poisoned");
        let contributing: Vec<_> = history.iter().filter(|(_, observed)| *observed != 0.0).collect();
        if contributing.is_empty() {
            return 0.0;
        }
        contributing
            .iter()
            .map(|(f, observed)| (f.point - observed).abs() / observed)
            .sum::<f64>()
            / contributing.len() as f64
    }

    /// Fraction of pairs where `lo <= observed <= hi`; 0 when empty.
    pub fn ci_hit_rate(&self) -> f64 {
        let history = self.forecast_history.lock().expect("forecast history lock poisoned");
        if history.is_empty() {
            return 0.0;
        }
        let hits = history
            .iter()
            .filter(|(f, observed)| f.lo <= *observed && *observed <= f.hi)
            .count();
        hits as f64 / history.len() as f64
    }

    pub fn scale_ups_by_cause(&self) -> std::collections::HashMap<String, u64> {
        let mut map = std::collections::HashMap::new();
        map.insert(
            "proactive".to_string(),
            self.scale_ups_by_cause[ScaleCause::Proactive.index()].load(Ordering::Relaxed),
        );
        map.insert(
            "reactive".to_string(),
            self.scale_ups_by_cause[ScaleCause::Reactive.index()].load(Ordering::Relaxed),
        );
        map.insert(
            "manual".to_string(),
            self.scale_ups_by_cause[ScaleCause::Manual.index()].load(Ordering::Relaxed),
        );
        map
    }
}
