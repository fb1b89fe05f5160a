//! fleetctl-core: predictive auto-scaling control plane for a small fleet
//! of storage/compute workers behind a health-aware request router.

mod version;

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod fec;
pub mod forecast;
pub mod load;
pub mod metrics;
pub mod probe;
pub mod scaling;

pub use config::{Config, ForecastMode, ProbeFailurePolicy};
pub use controller::{Controller, MetricsSnapshot};
pub use dispatch::{DispatchError, DispatchStats, HealthAwareDispatcher, SlotHealth};
pub use fec::{Cancelled, FairExclusionCoordinator, FecGuard, FecSnapshot, Ticket, TryEnterError};
pub use forecast::{Forecast, ForecastClient, PredictResult, PredictionContext};
pub use load::{LoadHistory, LoadSample};
pub use metrics::{MetricRegistry, ScaleCause, ScaleDecision};
pub use probe::{AlwaysUpProbe, ProbeError, ProbeOutcome, WorkerProbe};
pub use scaling::ScalingController;
pub use version::{FLEETCTL_VERSION, VersionInfo};
