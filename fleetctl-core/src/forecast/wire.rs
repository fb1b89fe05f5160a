//! Wire types for the forecast service's HTTP/JSON protocol.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub current_time: String,
    pub current_load: f64,
    pub historical_loads: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictResponse {
    pub predicted_load: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub prediction_horizon: String,
    pub model_accuracy: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordActualRequest {
    pub predicted_load: f64,
    pub actual_load: f64,
}
