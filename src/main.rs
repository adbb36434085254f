use mimalloc::MiMalloc;
use phase_bridge::config::{CONFIG, ConnectionMode};
use phase_bridge::db::{Connector, DirectConnector, PhaseQuery, PooledConnector};
use phase_bridge::router::{PhaseState, phase_router};
use phase_bridge::{PhaseService, vault};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &*CONFIG;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.listen_addr,
        mode = ?cfg.connection.mode,
        key_path = %cfg.vault.key_path.display(),
        blob_path = %cfg.vault.blob_path.display(),
        table = %cfg.query.table,
        column = %cfg.query.column,
        loglevel = %cfg.loglevel
    );

    if vault::shares_directory(&cfg.vault.key_path, &cfg.vault.blob_path) {
        warn!("key file and encrypted config share a directory; store the key separately");
    }

    let query = PhaseQuery::from_settings(&cfg.query)?;
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.listen_addr);

    match cfg.connection.mode {
        ConnectionMode::Pooled => {
            // Decrypted once; a bad key or blob stops startup here.
            let profile = vault::load_profile(&cfg.vault)?;
            let connector = PooledConnector::connect_lazy(&profile, &cfg.connection)?;
            let pool = connector.pool().clone();
            serve(listener, PhaseService::new(connector, query, &cfg.connection)).await?;
            pool.close().await;
        }
        ConnectionMode::PerRequest => {
            let connector = DirectConnector::new(cfg.vault.clone());
            let closing = connector.clone();
            serve(listener, PhaseService::new(connector, query, &cfg.connection)).await?;
            let closed = closing.drain().await;
            info!(closed, "released connections closed");
        }
    }

    info!("HTTP server stopped");
    Ok(())
}

async fn serve<C: Connector>(listener: TcpListener, service: PhaseService<C>) -> std::io::Result<()> {
    let app = phase_router(PhaseState::new(service));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
