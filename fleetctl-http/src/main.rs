use fleetctl_core::{Config, Controller};
use fleetctl_http::{serve, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = Config::from_env();
    let forecast_base_url =
        std::env::var("FLEETCTL_FORECAST_URL").unwrap_or_else(|_| "http://localhost:9000".to_string());
    let controller = Controller::new(config, forecast_base_url);

    let server_config = ServerConfig {
        host: std::env::var("FLEETCTL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port: std::env::var("FLEETCTL_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080),
    };

    serve(server_config, controller).await
}
