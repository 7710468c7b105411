use mock_postgrest::MockConfig;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let config = MockConfig {
        api_key: std::env::var("POSTGREST_API_KEY").ok().filter(|k| !k.is_empty()),
        ..MockConfig::default()
    };

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, auth = config.api_key.is_some(), "mock postgrest listening");
    mock_postgrest::run_with(listener, config).await
}
