mod bridge;
mod handlers;
mod monitor;
mod state;

use anyhow::{Context, Result};
use common::{MembershipEvent, TaskCatalog};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::state::{AppState, MasterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,common=debug,axum=info")),
        )
        .init();

    let config = MasterConfig::from_env();
    let state = AppState::new(config.clone(), TaskCatalog::builtin());

    // altas y bajas de workers al log
    let mut events = state.pool.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MembershipEvent::WorkerConnected(name)) => info!("worker:{} - se unió al cluster", name),
                Ok(MembershipEvent::WorkerDisconnected(name)) => info!("worker:{} - dejó el cluster", name),
                Err(RecvError::Lagged(n)) => warn!("se perdieron {} eventos de membresía", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // router HTTP
    let app = handlers::build_router(state.clone());

    // monitor de workers caídos en segundo plano
    let monitor_state = state.clone();
    tokio::spawn(async move {
        monitor::monitor_workers(monitor_state).await;
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", config.bind_addr))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
