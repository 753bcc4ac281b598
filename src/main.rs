use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursehub::{
    api,
    config::Settings,
    payments::HmacRedirectGateway,
    ratelimit::FixedWindowLimiter,
    service::{CheckoutPolicy, ServiceContext},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursehub=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!(
        "Starting Coursehub server on {}:{}",
        settings.server.host,
        settings.server.port
    );

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    // Payment gateway + purchase rate limiter
    let gateway = Arc::new(HmacRedirectGateway::new(settings.gateway.clone()));
    let limiter = Arc::new(FixedWindowLimiter::new(
        Duration::from_secs(settings.checkout.rate_limit_window_secs),
        settings.checkout.rate_limit_max_attempts,
    ));

    let service_context = Arc::new(ServiceContext::new(
        db_pool.clone(),
        gateway,
        limiter,
        CheckoutPolicy {
            platform_fee_percent: settings.checkout.platform_fee_percent,
        },
    ));

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        settings.server.host, settings.server.port
    ))
    .await?;

    tracing::info!(
        "Server listening on http://{}:{}",
        settings.server.host,
        settings.server.port
    );

    axum::serve(listener, app).await?;

    Ok(())
}
