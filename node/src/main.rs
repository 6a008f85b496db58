mod worker;

use anyhow::Result;
use common::node::NodeWorkerPool;
use common::{MembershipEvent, NodeRegisterRequest, NodeRegisterResponse, TaskCatalog};
use reqwest::Client;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::worker::{NodeConfig, Unreported, WorkerContext};

type Workers = JoinSet<(usize, Option<Unreported>)>;

/// Se registra en el master hasta que conteste; devuelve la clave del nodo.
async fn register(client: &Client, config: &NodeConfig, hostname: &str) -> String {
    let url = format!("{}/api/v1/nodes/register", config.master_url);
    let mut backoff = Duration::from_secs(1);

    loop {
        let attempt = async {
            let resp = client
                .post(&url)
                .json(&NodeRegisterRequest {
                    hostname: hostname.to_string(),
                    cores: config.cores,
                })
                .send()
                .await?
                .error_for_status()?;
            let NodeRegisterResponse { node_key } = resp.json().await?;
            anyhow::Ok(node_key)
        }
        .await;

        match attempt {
            Ok(node_key) => return node_key,
            Err(e) => {
                warn!("no se pudo registrar el nodo en {}: {:#}", url, e);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_backoff);
            }
        }
    }
}

/// Un loop por nombre habilitado. El índice permite pasarle a cada worker
/// nuevo la unidad sin reportar de su antecesor.
fn spawn_workers(
    pool: &NodeWorkerPool<AbortHandle>,
    ctx: &Arc<WorkerContext>,
    workers: &mut Workers,
    node_key: &str,
    mut held: HashMap<usize, Unreported>,
) -> Result<()> {
    for (index, name) in pool.enable_workers(node_key).into_iter().enumerate() {
        let ctx = ctx.clone();
        let carried = held.remove(&index);
        let worker_name = name.clone();
        let handle = workers.spawn(async move { (index, worker::run(ctx, worker_name, carried).await) });
        pool.on_worker_authenticated(&name, handle)?;
    }
    Ok(())
}

/// Corta todos los loops y junta lo que hayan dejado sin reportar.
async fn stop_workers(
    pool: &NodeWorkerPool<AbortHandle>,
    workers: &mut Workers,
    held: &mut HashMap<usize, Unreported>,
) {
    for name in pool.connected() {
        if let Some(handle) = pool.on_worker_disconnected(&name) {
            handle.abort();
        }
    }
    while let Some(joined) = workers.join_next().await {
        if let Ok((index, Some(unit))) = joined {
            held.insert(index, unit);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("node=debug,common=info,reqwest=info")),
        )
        .init();

    let config = NodeConfig::from_env();
    let client = Client::new();

    // Nombre de host (solo para info)
    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let pool: Arc<NodeWorkerPool<AbortHandle>> = Arc::new(NodeWorkerPool::new(config.cores));

    let mut events = pool.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MembershipEvent::WorkerConnected(name)) => info!("worker:{} - arrancó", name),
                Ok(MembershipEvent::WorkerDisconnected(name)) => info!("worker:{} - detenido", name),
                Err(RecvError::Lagged(n)) => warn!("se perdieron {} eventos de membresía", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!(
        "nodo {} con {} núcleos, master en {}",
        hostname, config.cores, config.master_url
    );
    let ctx = Arc::new(WorkerContext {
        client,
        config,
        catalog: Arc::new(TaskCatalog::builtin()),
    });

    let mut node_key = register(&ctx.client, &ctx.config, &hostname).await;
    info!("nodo registrado con clave {}", node_key);

    let mut workers: Workers = JoinSet::new();
    spawn_workers(&pool, &ctx, &mut workers, &node_key, HashMap::new())?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            Some(joined) = workers.join_next() => {
                let (index, unit) = match joined {
                    Ok(exit) => exit,
                    Err(e) => {
                        if !e.is_cancelled() {
                            warn!("un worker terminó de forma inesperada: {}", e);
                        }
                        continue;
                    }
                };

                // el master se reinició o nos dio de baja: clave nueva para todos
                warn!("el master ya no reconoce la clave {}, registrando el nodo de nuevo", node_key);
                let mut held = HashMap::new();
                if let Some(unit) = unit {
                    held.insert(index, unit);
                }
                stop_workers(&pool, &mut workers, &mut held).await;

                node_key = register(&ctx.client, &ctx.config, &hostname).await;
                info!("nodo registrado con clave {}", node_key);
                spawn_workers(&pool, &ctx, &mut workers, &node_key, held)?;
            }
        }
    }

    info!("apagando el nodo");
    let names = pool.connected();
    stop_workers(&pool, &mut workers, &mut HashMap::new()).await;
    for name in names {
        if let Err(e) = worker::disconnect(&ctx, &name).await {
            warn!("worker:{} - no se pudo avisar la baja: {:#}", name, e);
        }
    }

    Ok(())
}
