//! Binary entrypoint.

use tracing::error;
use tracing_subscriber::EnvFilter;

use edgemux::config::load_config;
use edgemux::gateway::Gateway;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());

    let config = match load_config(&path).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path, error = %e, "failed to load configuration");
            std::process::exit(1);
        },
    };

    let mut gateway = Gateway::new(config);
    if let Err(e) = gateway.run().await {
        error!(error = %e, "gateway terminated");
        std::process::exit(1);
    }
}
