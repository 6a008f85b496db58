use anyhow::{Context, Result};
use common::config::env_or;
use common::node::detect_cores;
use common::{
    AckResponse, Reconciliation, TaskCatalog, WorkOutcome, WorkRequest, WorkerCompleteRequest,
    WorkerConnectRequest, WorkerConnectResponse, WorkerDisconnectRequest, WorkerFailedRequest,
    WorkerHeartbeatRequest, WorkerName, WorkerNextRequest, WorkerNextResponse, WorkerStatusCode,
    WorkerStatusReport,
};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub master_url: String,
    pub cores: usize,
    /// Espera entre pedidos cuando el master no tiene nada
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub max_backoff: Duration,
}

impl NodeConfig {
    /// MASTER_URL, NODE_CORES, NODE_POLL_MS, HEARTBEAT_SECS
    pub fn from_env() -> Self {
        Self {
            master_url: env_or("MASTER_URL", "http://localhost:8080".to_string()),
            cores: detect_cores(),
            poll_interval: Duration::from_millis(env_or("NODE_POLL_MS", 1_000)),
            heartbeat_interval: Duration::from_secs(env_or("HEARTBEAT_SECS", 5)),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Lo que comparten todos los workers de este nodo.
pub struct WorkerContext {
    pub client: Client,
    pub config: NodeConfig,
    pub catalog: Arc<TaskCatalog>,
}

impl WorkerContext {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.master_url, path)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.url(path);
        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}", url))
    }
}

/// Una unidad terminada que no se pudo reportar al master. Sólo se usa
/// para anunciarse como FINISHED al reconectar; el resultado no se guarda.
#[derive(Debug, Clone)]
pub struct Unreported {
    request: WorkRequest,
}

/// Cómo terminó una conexión con el master.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    /// Volver a conectarse con el mismo nombre
    Reconnect,
    /// El master no conoce este nombre (se reinició, o el nodo fue dado de baja)
    Unprovisioned,
}

fn status_report(held: &Option<Unreported>) -> WorkerStatusReport {
    match held {
        Some(u) => WorkerStatusReport {
            status: WorkerStatusCode::Finished,
            task_key: Some(u.request.subtask_key.clone()),
            work_unit_id: Some(u.request.work_unit_id),
        },
        None => WorkerStatusReport::idle(),
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Loop de un worker lógico: conectarse, pedir trabajo, ejecutar, reportar.
/// Ante errores con el master se reconecta con espera creciente.
///
/// Sólo vuelve cuando el master rechaza el nombre: el nodo tiene que
/// registrarse de nuevo. Devuelve la unidad sin reportar, si la había.
pub async fn run(
    ctx: Arc<WorkerContext>,
    name: WorkerName,
    mut held: Option<Unreported>,
) -> Option<Unreported> {
    let mut backoff = ctx.config.poll_interval;

    loop {
        match session(&ctx, &name, &mut held).await {
            Ok(SessionEnd::Reconnect) => backoff = ctx.config.poll_interval,
            Ok(SessionEnd::Unprovisioned) => {
                warn!("worker:{} - el master no reconoce este nombre", name);
                return held;
            }
            Err(e) => {
                warn!("worker:{} - error con el master: {:#}, reintento en {:?}", name, e, backoff);
                sleep(backoff).await;
                backoff = next_backoff(backoff, ctx.config.max_backoff);
            }
        }
    }
}

/// Una conexión con el master. Termina con `Ok` cuando hay que volver a
/// conectarse (el master perdió al worker o no pudo reconciliarlo).
async fn session(
    ctx: &WorkerContext,
    name: &str,
    held: &mut Option<Unreported>,
) -> Result<SessionEnd> {
    let resp = ctx
        .post(
            "/api/v1/workers/connect",
            &WorkerConnectRequest {
                name: name.to_string(),
                status: status_report(held),
            },
        )
        .await?;
    if resp.status() == StatusCode::FORBIDDEN {
        return Ok(SessionEnd::Unprovisioned);
    }
    let WorkerConnectResponse { reconciliation } = resp.error_for_status()?.json().await?;

    if !matches!(reconciliation, Reconciliation::Registered) {
        // el master todavía no sabe qué hacer con lo pendiente: se descarta
        // (el master ya re-encoló la unidad) y se vuelve a entrar libre
        warn!(
            "worker:{} - reconciliación sin resolver ({:?}), se descarta el resultado guardado",
            name, reconciliation
        );
        *held = None;
        let _ = ctx
            .post(
                "/api/v1/workers/disconnect",
                &WorkerDisconnectRequest {
                    name: name.to_string(),
                },
            )
            .await;
        return Ok(SessionEnd::Reconnect);
    }
    *held = None;
    info!("worker:{} - conectado a {}", name, ctx.config.master_url);

    loop {
        let resp = ctx
            .post(
                "/api/v1/workers/next",
                &WorkerNextRequest {
                    name: name.to_string(),
                },
            )
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            info!("worker:{} - el master no lo reconoce, reconectando", name);
            return Ok(SessionEnd::Reconnect);
        }
        let WorkerNextResponse { work } = resp.error_for_status()?.json().await?;

        let Some(work) = work else {
            sleep(ctx.config.poll_interval).await;
            continue;
        };

        info!(
            "worker:{} - tengo la unidad {} ({})",
            name, work.work_unit_id, work.subtask_key
        );
        let outcome = execute(ctx, name, &work).await;

        if let Err(e) = report(ctx, name, &work, &outcome).await {
            *held = Some(Unreported { request: work });
            return Err(e);
        }
    }
}

/// Corre la unidad en un hilo de bloqueo, mandando heartbeats mientras tanto.
async fn execute(ctx: &WorkerContext, name: &str, work: &WorkRequest) -> WorkOutcome {
    let catalog = ctx.catalog.clone();
    let key = work.subtask_key.clone();
    let payload = work.payload.clone();
    let mut job = tokio::task::spawn_blocking(move || catalog.execute(&key, &payload));

    let mut ticker = tokio::time::interval(ctx.config.heartbeat_interval);
    // el primer tick es inmediato
    ticker.tick().await;

    let joined = loop {
        tokio::select! {
            res = &mut job => break res,
            _ = ticker.tick() => {
                if let Err(e) = heartbeat(ctx, name).await {
                    debug!("worker:{} - heartbeat falló: {:#}", name, e);
                }
            }
        }
    };

    match joined {
        Ok(Ok(results)) => WorkOutcome::Completed(results),
        Ok(Err(e)) => {
            warn!("worker:{} - unidad {} falló: {}", name, work.work_unit_id, e);
            WorkOutcome::Failed(e.to_string())
        }
        Err(e) => WorkOutcome::Failed(format!("la ejecución se cortó: {}", e)),
    }
}

async fn heartbeat(ctx: &WorkerContext, name: &str) -> Result<()> {
    ctx.post(
        "/api/v1/workers/heartbeat",
        &WorkerHeartbeatRequest {
            name: name.to_string(),
        },
    )
    .await?
    .error_for_status()?;
    Ok(())
}

async fn report(ctx: &WorkerContext, name: &str, work: &WorkRequest, outcome: &WorkOutcome) -> Result<()> {
    let resp = match outcome {
        WorkOutcome::Completed(results) => {
            ctx.post(
                "/api/v1/workers/complete",
                &WorkerCompleteRequest {
                    name: name.to_string(),
                    work_unit_id: work.work_unit_id,
                    results: results.clone(),
                },
            )
            .await?
        }
        WorkOutcome::Failed(reason) => {
            ctx.post(
                "/api/v1/workers/failed",
                &WorkerFailedRequest {
                    name: name.to_string(),
                    work_unit_id: work.work_unit_id,
                    reason: reason.clone(),
                },
            )
            .await?
        }
    };

    let AckResponse { ok } = resp.error_for_status()?.json().await?;
    if !ok {
        // el master ya la había dado por perdida
        warn!(
            "worker:{} - el master ignoró el reporte de la unidad {}",
            name, work.work_unit_id
        );
    }
    Ok(())
}

/// Avisa al master que este worker se va.
pub async fn disconnect(ctx: &WorkerContext, name: &str) -> Result<()> {
    ctx.post(
        "/api/v1/workers/disconnect",
        &WorkerDisconnectRequest {
            name: name.to_string(),
        },
    )
    .await?
    .error_for_status()?;
    Ok(())
}
