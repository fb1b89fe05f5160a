//! Tunables for the control plane, injected at construction.
//!
//! Every option from the configuration surface gets a `Config` field and an
//! environment-variable override, following the same
//! `std::env::var(...).ok().and_then(|s| s.parse().ok()).unwrap_or(default)`
//! idiom used for webhook tunables elsewhere in this codebase.

use std::time::Duration;

/// How the dispatcher should treat a worker probe that fails to execute
/// (as opposed to a probe that executes and reports `DOWN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailurePolicy {
    /// Assume the slot is healthy. Matches the default in the source system;
    /// avoids cascading false negatives from transient probe faults.
    OptimisticUp,
    /// Assume the slot is unhealthy. Safer but can amplify a noisy probe.
    PessimisticDown,
}

impl Default for ProbeFailurePolicy {
    fn default() -> Self {
        ProbeFailurePolicy::OptimisticUp
    }
}

/// Forecast mode override, as accepted by `set_forecast_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    /// Use the forecast service when the one-way latch has not tripped.
    Auto,
    /// Always use reactive (observed-load) decisions.
    ForceReactive,
}

impl Default for ForecastMode {
    fn default() -> Self {
        ForecastMode::Auto
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub fleet_min: usize,
    pub fleet_max: usize,
    pub per_slot_capacity: f64,
    pub eval_period: Duration,
    pub health_ttl: Duration,
    pub cache_ttl: Duration,
    pub forecast_timeout: Duration,
    pub health_timeout: Duration,
    pub history_len: usize,
    pub starvation_warn: Duration,
    pub scale_up_ratio: f64,
    pub scale_down_ratio: f64,
    /// `None` disables simulated dispatch latency; `Some((min_ms, max_ms))` enables it.
    pub latency_sim: Option<(u64, u64)>,
    pub forecast_mode: ForecastMode,
    pub probe_failure_policy: ProbeFailurePolicy,
    /// Number of consecutive `Unavailable` forecasts that trips the one-way latch.
    pub forecast_failure_streak: u32,
    /// Gate on the ±5% load-normalization jitter; off by default, a demo
    /// artifact carried over from the source's load sampling.
    pub simulation_noise: bool,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fleet_min: 1,
            fleet_max: 5,
            per_slot_capacity: 10.0,
            eval_period: Duration::from_secs(15),
            health_ttl: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(5 * 60),
            forecast_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
            history_len: 10,
            starvation_warn: Duration::from_secs(5),
            scale_up_ratio: 0.75,
            scale_down_ratio: 0.30,
            latency_sim: None,
            forecast_mode: ForecastMode::Auto,
            probe_failure_policy: ProbeFailurePolicy::OptimisticUp,
            forecast_failure_streak: 3,
            simulation_noise: false,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Build a `Config` from environment variables, falling back to spec
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fleet_min: env_parse("FLEETCTL_FLEET_MIN", defaults.fleet_min),
            fleet_max: env_parse("FLEETCTL_FLEET_MAX", defaults.fleet_max),
            per_slot_capacity: env_parse(
                "FLEETCTL_PER_SLOT_CAPACITY",
                defaults.per_slot_capacity,
            ),
            eval_period: env_parse_secs("FLEETCTL_EVAL_PERIOD_SECS", defaults.eval_period),
            health_ttl: env_parse_secs("FLEETCTL_HEALTH_TTL_SECS", defaults.health_ttl),
            cache_ttl: env_parse_secs("FLEETCTL_CACHE_TTL_SECS", defaults.cache_ttl),
            forecast_timeout: env_parse_secs(
                "FLEETCTL_FORECAST_TIMEOUT_SECS",
                defaults.forecast_timeout,
            ),
            health_timeout: env_parse_secs(
                "FLEETCTL_HEALTH_TIMEOUT_SECS",
                defaults.health_timeout,
            ),
            history_len: env_parse("FLEETCTL_HISTORY_LEN", defaults.history_len),
            starvation_warn: env_parse_secs(
                "FLEETCTL_STARVATION_WARN_SECS",
                defaults.starvation_warn,
            ),
            scale_up_ratio: env_parse("FLEETCTL_SCALE_UP_RATIO", defaults.scale_up_ratio),
            scale_down_ratio: env_parse("FLEETCTL_SCALE_DOWN_RATIO", defaults.scale_down_ratio),
            latency_sim: defaults.latency_sim,
            forecast_mode: defaults.forecast_mode,
            probe_failure_policy: defaults.probe_failure_policy,
            forecast_failure_streak: env_parse(
                "FLEETCTL_FORECAST_FAILURE_STREAK",
                defaults.forecast_failure_streak,
            ),
            simulation_noise: std::env::var("FLEETCTL_SIMULATION_NOISE")
                .ok()
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.simulation_noise),
            shutdown_grace: env_parse_secs(
                "FLEETCTL_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_parse_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.fleet_min, 1);
        assert_eq!(cfg.fleet_max, 5);
        assert_eq!(cfg.per_slot_capacity, 10.0);
        assert_eq!(cfg.eval_period, Duration::from_secs(15));
        assert_eq!(cfg.health_ttl, Duration::from_secs(10));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.scale_up_ratio, 0.75);
        assert_eq!(cfg.scale_down_ratio, 0.30);
        assert!(cfg.latency_sim.is_none());
        assert!(!cfg.simulation_noise);
        assert_eq!(cfg.probe_failure_policy, ProbeFailurePolicy::OptimisticUp);
    }

    #[test]
    fn from_env_falls_back_when_unset() {
        std::env::remove_var("FLEETCTL_FLEET_MAX");
        let cfg = Config::from_env();
        assert_eq!(cfg.fleet_max, 5);
    }
}
