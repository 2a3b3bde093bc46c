use copyforge::models::AppConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("COPYFORGE_CONFIG") {
        Ok(path) => match AppConfig::load(std::path::Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load config from {}: {}", path, e);
                std::process::exit(1);
            }
        },
        Err(_) => AppConfig::from_env(),
    };

    if let Err(e) = copyforge::run(config).await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
