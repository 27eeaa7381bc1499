use tenant_migrate::api::{self, AppState};
use tenant_migrate::settings::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = AppConfig::load()?;
    let bind_addr = settings.server.bind_addr.clone();
    let app = api::router(AppState::new(settings));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!("tenant-migrate listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
