//! Version information for fleetctl.

/// fleetctl-core version from Cargo.toml
pub const FLEETCTL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information for the running control plane.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// fleetctl-core version.
    pub fleetctl: &'static str,
    /// Forecast service version, if it reports one via `/health`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast_service: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            fleetctl: FLEETCTL_VERSION,
            forecast_service: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forecast_service(mut self, version: String) -> Self {
        self.forecast_service = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_fleetctl_version() {
        let info = VersionInfo::new();
        assert_eq!(info.fleetctl, FLEETCTL_VERSION);
        assert!(info.forecast_service.is_none());
    }

    #[test]
    fn version_info_builder_pattern() {
        let info = VersionInfo::new().with_forecast_service("1.2.0".to_string());
        assert_eq!(info.forecast_service, Some("1.2.0".to_string()));
    }

    #[test]
    fn version_info_serializes_without_optional_field() {
        let info = VersionInfo {
            fleetctl: "0.1.0",
            forecast_service: None,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value, serde_json::json!({ "fleetctl": "0.1.0" }));
    }
}
