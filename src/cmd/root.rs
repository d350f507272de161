//! Main daemon command: wires up the container host, record store, image
//! lifecycle manager, invocation engine, and HTTP router, then serves.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use clowdy_daemon::auth::JwksCache;
use clowdy_daemon::config::Configuration;
use clowdy_daemon::container::DockerContainerHost;
use clowdy_daemon::database::Database;
use clowdy_daemon::gateway::RouteCache;
use clowdy_daemon::image::ImageManager;
use clowdy_daemon::invoke::InvocationEngine;
use clowdy_daemon::router::{self, AppState};

/// Runs the daemon: load config, connect to the container engine (a fatal
/// startup error if none can be found), open the record store, and serve
/// the HTTP surface until a shutdown signal arrives.
pub async fn run(config_path: &str) -> Result<()> {
    info!("loading configuration from {}", config_path);
    let config = Configuration::load(config_path)?;
    let config = Arc::new(config);

    info!(
        host = %config.api.host,
        port = config.api.port,
        base_image = %config.container.base_image,
        "configuration loaded"
    );

    let host = Arc::new(
        DockerContainerHost::connect(config.container.endpoint.as_deref())
            .context("could not reach a container engine; this dependency is not optional")?,
    );

    let db = Arc::new(Database::open(&config.database.path)?);
    let images = Arc::new(ImageManager::new(
        host.clone(),
        db.clone(),
        config.container.base_image.clone(),
    ));
    let engine = Arc::new(InvocationEngine::new(host, db.clone(), images));

    let state = Arc::new(AppState {
        db,
        engine,
        route_cache: RouteCache::new(),
        jwks: JwksCache::new(config.identity.jwks_url.clone()),
        config: config.clone(),
    });

    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .context("invalid api.host/api.port in configuration")?;

    info!("listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    tracing::warn!("received shutdown signal, draining in-flight invocations");
}
