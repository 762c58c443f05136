use tracing::{info, Level};

use meshctl_server::auth::AuthConfig;
use meshctl_server::state::{AppState, TokenPepper, WebhookSecret};
use meshctl_store::db::DatabaseConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let db_config = DatabaseConfig::from_env()?;
    let pool = meshctl_store::db::create_pool(&db_config).await?;
    meshctl_store::db::run_migrations(&pool).await?;
    meshctl_store::db::health_check(&pool).await?;

    let token_pepper = TokenPepper::from_env()?;
    let webhook_secret = WebhookSecret::from_env()?;
    let auth_config = AuthConfig::from_env()?;

    let state = AppState::new(pool.clone(), token_pepper, webhook_secret, auth_config);

    meshctl_server::rate_limit::spawn_cleanup_task(state.rate_limiter.clone());
    meshctl_scheduler::spawn(pool, meshctl_scheduler::SchedulerSettings::default());

    let app = meshctl_server::create_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = format!("0.0.0.0:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "meshctl-server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
