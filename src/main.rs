use axum::serve;
use log::info;
use tokio::net::TcpListener;
use transit_changesets::build_app_from_config;
use transit_changesets::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let config = AppConfig::load()?;
    info!(
        "Configuration loaded: server={}:{} storage={:?}",
        config.server.host, config.server.port, config.storage.backend
    );

    let app = build_app_from_config(&config).await?;

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("Transit changeset server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
