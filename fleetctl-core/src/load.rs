//! Rolling window of observed load, shared by the scaling controller.

use std::collections::VecDeque;
use std::time::Instant;

/// One tick's observed load, expressed as ops/sec at the time it was sampled.
#[derive(Debug, Clone, Copy)]
pub struct LoadSample {
    pub observed_at: Instant,
    pub rate: f64,
}

/// Append-only ring buffer capped at `HISTORY_LEN`; oldest dropped first.
#[derive(Debug)]
pub struct LoadHistory {
    capacity: usize,
    samples: VecDeque<LoadSample>,
}

impl LoadHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, rate: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(LoadSample {
            observed_at: Instant::now(),
            rate,
        });
    }

    /// Arithmetic mean of the current window; 0.0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.rate).sum::<f64>() / self.samples.len() as f64
    }

    /// Up to the last 24 samples' rates, oldest first, as required by the
    /// forecast request's `historical_loads` field.
    pub fn recent_for_forecast(&self, req_per_hour_scale: f64) -> Vec<f64> {
        self.samples
            .iter()
            .rev()
            .take(24)
            .rev()
            .map(|s| s.rate * req_per_hour_scale)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
