//! Health-Aware Dispatcher: cyclic pick over healthy slots, with a cached,
//! TTL-bounded liveness check per slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::ProbeFailurePolicy;
use crate::probe::{ProbeOutcome, WorkerProbe};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no healthy targets among {0} candidates")]
    NoHealthyTargets(usize),
    #[error("invalid fleet size: must be >= 1")]
    InvalidFleet,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SlotHealth {
    pub healthy: bool,
    #[serde(skip)]
    pub last_probed_at: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchStats {
    pub total_picks: u64,
    pub healthy_count: usize,
    pub total_count: usize,
}

/// `DashMap<usize, SlotHealth>` plus an atomic cursor, the same concurrent
/// per-key-state shape used for prediction bookkeeping elsewhere in this
/// codebase.
pub struct HealthAwareDispatcher {
    health: DashMap<usize, SlotHealth>,
    cursor: AtomicUsize,
    total_picks: AtomicUsize,
    health_ttl: Duration,
    probe: Box<dyn WorkerProbe>,
    probe_failure_policy: ProbeFailurePolicy,
    latency_sim: Option<(u64, u64)>,
}

impl HealthAwareDispatcher {
    pub fn new(
        health_ttl: Duration,
        probe: Box<dyn WorkerProbe>,
        probe_failure_policy: ProbeFailurePolicy,
        latency_sim: Option<(u64, u64)>,
    ) -> Self {
        Self {
            health: DashMap::new(),
            cursor: AtomicUsize::new(0),
            total_picks: AtomicUsize::new(0),
            health_ttl,
            probe,
            probe_failure_policy,
            latency_sim,
        }
    }

    /// Returns a healthy slot index in `[0, n)`, advancing an internal
    /// cursor each attempt. Fails after inspecting all `n` candidates.
    pub async fn pick(&self, n: usize) -> Result<usize, DispatchError> {
        if n == 0 {
            return Err(DispatchError::InvalidFleet);
        }

        if let Some((min_ms, max_ms)) = self.latency_sim {
            let delay_ms = if max_ms > min_ms {
                rand::Rng::gen_range(&mut rand::thread_rng(), min_ms..=max_ms)
            } else {
                min_ms
            };
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        self.total_picks.fetch_add(1, Ordering::Relaxed);

        for _ in 0..n {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            if self.is_healthy(idx) {
                return Ok(idx);
            }
        }
        Err(DispatchError::NoHealthyTargets(n))
    }

    fn is_healthy(&self, idx: usize) -> bool {
        let now = Instant::now();
        if let Some(entry) = self.health.get(&idx) {
            if now.duration_since(entry.last_probed_at) < self.health_ttl {
                return entry.healthy;
            }
        } else {
            // Unknown slot: materialize an implicit default of healthy.
            self.health.insert(
                idx,
                SlotHealth {
                    healthy: true,
                    last_probed_at: now,
                },
            );
            return true;
        }

        // Stale: refresh via probe. Execution failure (not a `Down` result)
        // is routed through the configured failure policy rather than
        // treated as a health outcome itself.
        match self.probe.probe(&idx.to_string()) {
            Ok(outcome) => {
                let healthy = matches!(outcome, ProbeOutcome::Up);
                self.health.insert(
                    idx,
                    SlotHealth {
                        healthy,
                        last_probed_at: now,
                    },
                );
                healthy
            }
            Err(err) => {
                tracing::warn!(slot = idx, error = %err, "probe execution failed");
                self.mark_probe_failure(idx)
            }
        }
    }

    /// Explicit override used by the scaling controller when adding/removing
    /// slots, and by manual test hooks.
    pub fn set_health(&self, i: usize, healthy: bool) {
        self.health.insert(
            i,
            SlotHealth {
                healthy,
                last_probed_at: Instant::now(),
            },
        );
    }

    pub fn health_map(&self) -> HashMap<usize, bool> {
        self.health.iter().map(|e| (*e.key(), e.value().healthy)).collect()
    }

    pub fn stats(&self) -> DispatchStats {
        let healthy_count = self.health.iter().filter(|e| e.value().healthy).count();
        DispatchStats {
            total_picks: self.total_picks.load(Ordering::Relaxed) as u64,
            healthy_count,
            total_count: self.health.len(),
        }
    }

    /// A probe failing to execute is mapped to this policy's outcome; logged
    /// so the optimistic default is never silently applied. Returns the
    /// resulting health so callers needing the bool don't have to re-read
    /// the map.
    pub fn mark_probe_failure(&self, idx: usize) -> bool {
        let healthy = match self.probe_failure_policy {
            ProbeFailurePolicy::OptimisticUp => {
                tracing::warn!(slot = idx, "probe execution failed, assuming healthy (optimistic policy)");
                true
            }
            ProbeFailurePolicy::PessimisticDown => {
                tracing::warn!(slot = idx, "probe execution failed, assuming unhealthy (pessimistic policy)");
                false
            }
        };
        self.set_health(idx, healthy);
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::AlwaysUpProbe;

    fn dispatcher() -> HealthAwareDispatcher {
        HealthAwareDispatcher::new(
            Duration::from_secs(10),
            Box::new(AlwaysUpProbe),
            ProbeFailurePolicy::OptimisticUp,
            None,
        )
    }

    #[tokio::test]
    async fn pick_zero_is_invalid() {
        let d = dispatcher();
        assert_eq!(d.pick(0).await, Err(DispatchError::InvalidFleet));
    }

    #[tokio::test]
    async fn all_unhealthy_fails_then_recovers() {
        let d = dispatcher();
        d.set_health(0, false);
        d.set_health(1, false);
        assert_eq!(d.pick(2).await, Err(DispatchError::NoHealthyTargets(2)));
        d.set_health(0, true);
        assert_eq!(d.pick(2).await, Ok(0));
    }

    #[tokio::test]
    async fn round_robin_fair_over_full_cycles() {
        let d = dispatcher();
        let n = 3;
        let mut counts = [0u32; 3];
        for _ in 0..(n * 4) {
            let idx = d.pick(n).await.unwrap();
            counts[idx] += 1;
        }
        assert_eq!(counts, [4, 4, 4]);
    }

    #[tokio::test]
    async fn unhealthy_slot_excluded_until_reset() {
        let d = dispatcher();
        d.set_health(1, false);
        for _ in 0..10 {
            assert_ne!(d.pick(3).await.unwrap(), 1);
        }
        d.set_health(1, true);
        let picks: Vec<_> = futures::future::join_all((0..3).map(|_| d.pick(3))).await;
        assert!(picks.iter().any(|p| *p == Ok(1)));
    }

    struct FailingProbe;

    impl WorkerProbe for FailingProbe {
        fn probe(&self, _display_name: &str) -> Result<ProbeOutcome, crate::probe::ProbeError> {
            Err(crate::probe::ProbeError("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn stale_probe_execution_failure_uses_optimistic_policy() {
        let d = HealthAwareDispatcher::new(
            Duration::from_millis(0),
            Box::new(FailingProbe),
            ProbeFailurePolicy::OptimisticUp,
            None,
        );
        // First access materializes an implicit healthy default with
        // `last_probed_at = now`; force it stale so the next access probes.
        d.set_health(0, true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(d.pick(1).await, Ok(0));
    }

    #[tokio::test]
    async fn stale_probe_execution_failure_uses_pessimistic_policy() {
        let d = HealthAwareDispatcher::new(
            Duration::from_millis(0),
            Box::new(FailingProbe),
            ProbeFailurePolicy::PessimisticDown,
            None,
        );
        d.set_health(0, true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(d.pick(1).await, Err(DispatchError::NoHealthyTargets(1)));
    }

    #[tokio::test]
    async fn stats_reflect_health_map() {
        let d = dispatcher();
        d.set_health(0, true);
        d.set_health(1, false);
        let stats = d.stats();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.healthy_count, 1);
    }
}
