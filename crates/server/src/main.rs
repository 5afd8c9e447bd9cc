use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use persistence::HttpPersistence;
use server::{build_router, config::load_settings, health, AppState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(err) => {
            tracing_subscriber::fmt().with_env_filter("info").init();
            error!(error = %format!("{err:#}"), "invalid configuration");
            return Err(err);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .context("building log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let metrics = health::install_recorder()?;
    let persistence = HttpPersistence::new(
        settings.persistence_base_url()?,
        Duration::from_millis(settings.persistence_timeout_ms),
    )
    .context("building persistence client")?;
    info!(base_url = %persistence.base_url(), "persistence client ready");

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid server_bind '{}'", settings.server_bind))?;
    let state = AppState::new(settings, Arc::new(persistence), Some(metrics));
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "relay listening");
    axum::serve(listener, app).await?;
    Ok(())
}
