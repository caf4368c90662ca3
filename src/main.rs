use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orchard_classifier::utils::ensure_model_files;
use orchard_classifier::{create_router, AppState, ServiceConfig};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("orchard_classifier=info,tower_http=info"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServiceConfig::from_env()?;
    ensure_model_files(&config).await?;

    let state = AppState::load(&config).context("failed to load models")?;
    let app = create_router(Arc::new(state), config.body_limit_bytes);

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr()))?;

    info!(
        %addr,
        environment = %config.environment,
        production = config.is_production(),
        treatment = config.include_treatment,
        "starting orchard-classifier"
    );
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
