use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::pool::WorkerSummary;
use common::{
    AckResponse, CatalogError, CatalogExecutor, JobInfo, JobOutcome, JobRequest,
    NodeRegisterRequest, NodeRegisterResponse, ParallelJob, Record, RemoteDispatch, TaskStatus,
    WorkOutcome, WorkerCompleteRequest, WorkerConnectRequest, WorkerConnectResponse,
    WorkerDisconnectRequest, WorkerFailedRequest, WorkerHeartbeatRequest, WorkerNextRequest,
    WorkerNextResponse,
};
use glob::glob;
use serde_json::json;
use std::{
    sync::{Arc, PoisonError},
    time::SystemTime,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::state::{AppState, JobEntry, NodeMeta};

type ApiError = (StatusCode, String);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/register", post(register_node))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/connect", post(connect_worker))
        .route("/api/v1/workers/next", post(next_work))
        .route("/api/v1/workers/complete", post(complete_work))
        .route("/api/v1/workers/failed", post(fail_work))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/workers/disconnect", post(disconnect_worker))
        .route("/api/v1/jobs", post(create_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Alta de un nodo: se le da la clave con la que nombra a sus workers
async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<NodeRegisterRequest>,
) -> Json<NodeRegisterResponse> {
    let node_key = uuid::Uuid::new_v4().to_string();

    state
        .nodes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(
            node_key.clone(),
            NodeMeta {
                hostname: req.hostname.clone(),
                cores: req.cores,
                registered_at: SystemTime::now(),
            },
        );

    info!(
        "nodo registrado: {} (host={}, cores={})",
        node_key, req.hostname, req.cores
    );
    Json(NodeRegisterResponse { node_key })
}

async fn list_nodes(State(state): State<AppState>) -> Json<Vec<serde_json::Value>> {
    let now = SystemTime::now();
    let nodes = state.nodes.lock().unwrap_or_else(PoisonError::into_inner);

    let mut out: Vec<serde_json::Value> = nodes
        .iter()
        .map(|(key, meta)| {
            let age_secs = now
                .duration_since(meta.registered_at)
                .unwrap_or_default()
                .as_secs();
            json!({
                "node_key": key,
                "hostname": meta.hostname,
                "cores": meta.cores,
                "registered_secs_ago": age_secs,
            })
        })
        .collect();
    out.sort_by(|a, b| a["node_key"].as_str().cmp(&b["node_key"].as_str()));
    Json(out)
}

/// "<node_key>:<i>" con un nodo registrado e i dentro de sus núcleos.
fn is_provisioned(state: &AppState, name: &str) -> bool {
    let Some((node_key, index)) = name.rsplit_once(':') else {
        return false;
    };
    let Ok(index) = index.parse::<usize>() else {
        return false;
    };

    state
        .nodes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(node_key)
        .map(|node| index < node.cores)
        .unwrap_or(false)
}

async fn connect_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerConnectRequest>,
) -> Result<Json<WorkerConnectResponse>, ApiError> {
    if !is_provisioned(&state, &req.name) {
        warn!("worker:{} - intento de conexión sin nodo registrado", req.name);
        return Err((
            StatusCode::FORBIDDEN,
            format!("worker {} no fue habilitado por ningún nodo", req.name),
        ));
    }

    let connection = state.bridge.open(&req.name, req.status.clone());
    match state.pool.on_worker_authenticated(&req.name, connection).await {
        Ok(reconciliation) => {
            if !reconciliation.is_handled() {
                warn!(
                    "worker:{} - reconciliación sin resolver: {:?}",
                    req.name, reconciliation
                );
            }
            Ok(Json(WorkerConnectResponse { reconciliation }))
        }
        Err(e) => {
            state.bridge.close(&req.name);
            warn!("worker:{} - no se pudo reconciliar: {}", req.name, e);
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

// El worker viene a buscar trabajo; 404 si tiene que volver a conectarse
async fn next_work(
    State(state): State<AppState>,
    Json(req): Json<WorkerNextRequest>,
) -> Result<Json<WorkerNextResponse>, ApiError> {
    match state.bridge.next(&req.name) {
        Some(work) => {
            if let Some(ref w) = work {
                debug!(
                    "worker:{} - se lleva la unidad {} ({})",
                    req.name, w.work_unit_id, w.subtask_key
                );
            }
            Ok(Json(WorkerNextResponse { work }))
        }
        None => Err((
            StatusCode::NOT_FOUND,
            format!("worker {} no está conectado", req.name),
        )),
    }
}

async fn complete_work(
    State(state): State<AppState>,
    Json(req): Json<WorkerCompleteRequest>,
) -> Json<AckResponse> {
    let ok = state.bridge.resolve(
        &req.name,
        req.work_unit_id,
        WorkOutcome::Completed(req.results),
    );
    if !ok {
        warn!(
            "worker:{} - resultado de la unidad {} que nadie esperaba",
            req.name, req.work_unit_id
        );
    }
    Json(AckResponse { ok })
}

async fn fail_work(
    State(state): State<AppState>,
    Json(req): Json<WorkerFailedRequest>,
) -> Json<AckResponse> {
    info!(
        "worker:{} - la unidad {} falló: {}",
        req.name, req.work_unit_id, req.reason
    );
    let ok = state
        .bridge
        .resolve(&req.name, req.work_unit_id, WorkOutcome::Failed(req.reason));
    Json(AckResponse { ok })
}

async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<AckResponse>, StatusCode> {
    if state.bridge.touch(&req.name) {
        Ok(Json(AckResponse { ok: true }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn disconnect_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerDisconnectRequest>,
) -> Json<AckResponse> {
    state.bridge.close(&req.name);
    let ok = state.pool.on_worker_disconnected(&req.name).is_some();
    Json(AckResponse { ok })
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerSummary>> {
    Json(state.pool.list())
}

/// Un item {"path": ...} por cada archivo que matchee el patrón.
fn expand_glob(pattern: &str) -> anyhow::Result<Vec<Record>> {
    let mut items = Vec::new();
    for entry in glob(pattern)? {
        let path = entry?;
        if path.is_file() {
            items.push(json!({ "path": path.to_string_lossy() }));
        }
    }
    Ok(items)
}

// Crea un job del catálogo y lo arranca
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobInfo>, ApiError> {
    let catalog_error = |e: CatalogError| match e {
        CatalogError::UnknownJob(_) => (StatusCode::NOT_FOUND, e.to_string()),
        _ => (StatusCode::BAD_REQUEST, e.to_string()),
    };
    let task = state.catalog.instantiate(&req.task).map_err(catalog_error)?;
    let combiner = state.catalog.combiner(&req.task).map_err(catalog_error)?;

    let mut items = req.items;
    if let Some(pattern) = &req.input_glob {
        let files = expand_glob(pattern).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("input_glob inválido {}: {}", pattern, e),
            )
        })?;
        info!("input_glob {} -> {} archivos", pattern, files.len());
        items.extend(files);
    }

    let remote: Arc<dyn RemoteDispatch> = state.pool.clone();
    let local = Arc::new(CatalogExecutor::new(state.catalog.clone()));
    let job = ParallelJob::new(
        task,
        items,
        combiner,
        remote,
        local,
        state.config.scheduler.clone(),
    )
    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let info = JobInfo {
        id: job_id.clone(),
        task: req.task.clone(),
        status: TaskStatus::Running,
        total_units: job.snapshot().total,
        pending: 0,
        in_progress: 0,
        completed: 0,
        progress: 0.0,
        submitted_at: Utc::now(),
        finished_at: None,
        result: None,
    };

    let entry = JobEntry::running(info, job.clone());
    let response = entry.current();
    state
        .jobs
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(job_id.clone(), entry);

    info!(
        "job {} ({}) creado con {} elementos",
        job_id, req.task, response.total_units
    );

    let handle = job.start();
    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        let outcome = handle.wait().await;

        let mut jobs = jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        entry.finish();
        match outcome {
            JobOutcome::Complete(result) => {
                info!("job {} completo", job_id);
                entry.info.status = TaskStatus::Complete;
                entry.info.result = Some(result);
            }
            JobOutcome::Cancelled => {
                info!("job {} cancelado", job_id);
                entry.info.status = TaskStatus::Cancelled;
            }
        }
    });

    Ok(Json(response))
}

// Devuelve info de un job con el avance actual
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, StatusCode> {
    let jobs = state.jobs.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(entry) = jobs.get(&id) {
        Ok(Json(entry.current()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Pide la cancelación; se aplica en el próximo chequeo del scheduler
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, StatusCode> {
    let jobs = state.jobs.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = jobs.get(&id).ok_or(StatusCode::NOT_FOUND)?;

    if let Some(job) = &entry.job {
        info!("cancelando job {}", id);
        job.cancel();
    }
    Ok(Json(entry.current()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MasterConfig;
    use axum::body::Body;
    use axum::http::Request;
    use common::config::SchedulerConfig;
    use common::{TaskCatalog, WorkRequest};
    use serde_json::Value;
    use std::fs;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = MasterConfig {
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_millis(20),
                retry_warn_threshold: 3,
            },
            ..MasterConfig::default()
        };
        build_router(AppState::new(config, TaskCatalog::builtin()))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register_node(app: &Router, cores: usize) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/api/v1/nodes/register",
            Some(json!({"hostname": "test", "cores": cores})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["node_key"].as_str().unwrap().to_string()
    }

    async fn connect(app: &Router, name: &str) -> (StatusCode, Value) {
        call(
            app,
            "POST",
            "/api/v1/workers/connect",
            Some(json!({"name": name, "status": {"status": "IDLE"}})),
        )
        .await
    }

    async fn wait_for_job(app: &Router, id: &str, status: &str) -> Value {
        for _ in 0..200 {
            let (_, job) = call(app, "GET", &format!("/api/v1/jobs/{}", id), None).await;
            if job["status"] == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("el job {} nunca llegó a {}", id, status);
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let app = test_app();
        let (status, _) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn workers_need_a_registered_node() {
        let app = test_app();
        let (status, _) = connect(&app, "sin-nodo:0").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let key = register_node(&app, 2).await;
        let (_, nodes) = call(&app, "GET", "/api/v1/nodes", None).await;
        assert_eq!(nodes[0]["node_key"], key.as_str());
        assert_eq!(nodes[0]["cores"], 2);

        let (status, body) = connect(&app, &format!("{}:1", key)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reconciliation"]["kind"], "registered");

        let (status, _) = connect(&app, &format!("{}:2", key)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, workers) = call(&app, "GET", "/api/v1/workers", None).await;
        assert_eq!(workers, json!([{"name": format!("{}:1", key), "state": "IDLE"}]));
    }

    #[tokio::test]
    async fn reconnecting_as_finished_is_reported_unhandled() {
        let app = test_app();
        let key = register_node(&app, 1).await;
        let name = format!("{}:0", key);

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/workers/connect",
            Some(json!({
                "name": name,
                "status": {"status": "FINISHED", "task_key": "WordCount.subtask", "work_unit_id": 4}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reconciliation"]["kind"], "results_pending");
        assert_eq!(body["reconciliation"]["work_unit_id"], 4);

        let (_, workers) = call(&app, "GET", "/api/v1/workers", None).await;
        assert_eq!(workers[0]["state"], "WORKING");
    }

    #[tokio::test]
    async fn unknown_jobs_and_workers_are_404() {
        let app = test_app();
        let (status, _) = call(&app, "POST", "/api/v1/jobs", Some(json!({"task": "Nope"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/api/v1/jobs/no-existe", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "POST", "/api/v1/jobs/no-existe/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/workers/next",
            Some(json!({"name": "nadie:0"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_glob_is_rejected() {
        let app = test_app();
        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({"task": "WordCount", "input_glob": "[oops"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_job_completes_with_empty_counts() {
        let app = test_app();
        let (status, job) = call(&app, "POST", "/api/v1/jobs", Some(json!({"task": "WordCount"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["total_units"], 0);

        let id = job["id"].as_str().unwrap().to_string();
        let done = wait_for_job(&app, &id, "COMPLETE").await;
        assert_eq!(done["progress"], 100.0);
        assert_eq!(done["result"], json!({"items": 0, "counts": {}}));
        assert!(!done["finished_at"].is_null());
    }

    #[tokio::test]
    async fn input_glob_runs_locally_without_workers() {
        let dir = std::env::temp_dir().join("master_glob_job_test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.txt"), "uno dos\ndos").unwrap();
        fs::write(dir.join("b.txt"), "tres dos").unwrap();

        let app = test_app();
        let pattern = format!("{}/*.txt", dir.to_string_lossy());
        let (_, job) = call(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({"task": "WordCount", "input_glob": pattern})),
        )
        .await;
        assert_eq!(job["total_units"], 2);

        let id = job["id"].as_str().unwrap().to_string();
        let done = wait_for_job(&app, &id, "COMPLETE").await;
        assert_eq!(
            done["result"],
            json!({"items": 2, "counts": {"dos": 3, "tres": 1, "uno": 1}})
        );
    }

    #[tokio::test]
    async fn remote_worker_shares_the_job_and_failures_are_retried() {
        let app = test_app();
        let key = register_node(&app, 1).await;
        let name = format!("{}:0", key);
        connect(&app, &name).await;

        let items: Vec<Value> = ["a b", "b c", "c c", "d", "a"]
            .iter()
            .map(|t| json!({"text": t}))
            .collect();
        let (_, job) = call(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({"task": "WordCount", "items": items})),
        )
        .await;
        let id = job["id"].as_str().unwrap().to_string();

        // el "nodo": la primera unidad la reporta como fallida
        let catalog = TaskCatalog::builtin();
        let mut failed_once = false;
        for _ in 0..300 {
            let (status, next) = call(
                &app,
                "POST",
                "/api/v1/workers/next",
                Some(json!({"name": name})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);

            if next["work"].is_null() {
                let (_, job) = call(&app, "GET", &format!("/api/v1/jobs/{}", id), None).await;
                if job["status"] == "COMPLETE" {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }

            let work: WorkRequest = serde_json::from_value(next["work"].clone()).unwrap();
            if !failed_once {
                failed_once = true;
                let (_, ack) = call(
                    &app,
                    "POST",
                    "/api/v1/workers/failed",
                    Some(json!({"name": name, "work_unit_id": work.work_unit_id, "reason": "prueba"})),
                )
                .await;
                assert_eq!(ack["ok"], true);
                continue;
            }

            let results = catalog
                .execute(&work.subtask_key, &work.payload)
                .unwrap();
            let (_, ack) = call(
                &app,
                "POST",
                "/api/v1/workers/complete",
                Some(json!({"name": name, "work_unit_id": work.work_unit_id, "results": results})),
            )
            .await;
            assert_eq!(ack["ok"], true);
        }

        assert!(failed_once);
        let done = wait_for_job(&app, &id, "COMPLETE").await;
        assert_eq!(
            done["result"],
            json!({"items": 5, "counts": {"a": 2, "b": 2, "c": 3, "d": 1}})
        );
        assert_eq!(done["completed"], 5);

        let (_, workers) = call(&app, "GET", "/api/v1/workers", None).await;
        assert_eq!(workers[0]["state"], "IDLE");
    }

    #[tokio::test]
    async fn finished_jobs_keep_only_their_final_info() {
        let state = AppState::new(
            MasterConfig {
                scheduler: SchedulerConfig {
                    poll_interval: Duration::from_millis(20),
                    retry_warn_threshold: 3,
                },
                ..MasterConfig::default()
            },
            TaskCatalog::builtin(),
        );
        let app = build_router(state.clone());

        let (_, job) = call(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({"task": "WordCount", "items": [{"text": "x y x"}]})),
        )
        .await;
        let id = job["id"].as_str().unwrap().to_string();
        let done = wait_for_job(&app, &id, "COMPLETE").await;

        {
            let jobs = state.jobs.lock().unwrap();
            let entry = jobs.get(&id).unwrap();
            assert!(entry.job.is_none());
            assert_eq!(entry.info.completed, 1);
        }

        // lo que se lee después sigue siendo el estado final
        let (_, again) = call(&app, "GET", &format!("/api/v1/jobs/{}", id), None).await;
        assert_eq!(again, done);
        assert_eq!(again["progress"], 100.0);
        assert!(again["finished_at"].is_string());

        // cancelar algo ya terminado no cambia nada
        let (status, after) = call(&app, "POST", &format!("/api/v1/jobs/{}/cancel", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(after["status"], "COMPLETE");
    }

    #[tokio::test]
    async fn restarted_master_rejects_old_names_until_the_node_registers_again() {
        let app = test_app();
        let old_key = register_node(&app, 1).await;
        let old_name = format!("{}:0", old_key);
        let (status, _) = connect(&app, &old_name).await;
        assert_eq!(status, StatusCode::OK);

        // master nuevo, sin nodos registrados
        let restarted = test_app();
        let finished = json!({
            "name": old_name,
            "status": {"status": "FINISHED", "task_key": "WordCount.subtask", "work_unit_id": 3}
        });
        let (status, _) = call(&restarted, "POST", "/api/v1/workers/connect", Some(finished)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // el nodo se registra otra vez y su worker entra con la unidad pendiente
        let new_key = register_node(&restarted, 1).await;
        assert_ne!(new_key, old_key);
        let (status, body) = call(
            &restarted,
            "POST",
            "/api/v1/workers/connect",
            Some(json!({
                "name": format!("{}:0", new_key),
                "status": {"status": "FINISHED", "task_key": "WordCount.subtask", "work_unit_id": 3}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reconciliation"]["kind"], "results_pending");
    }

    #[tokio::test]
    async fn cancelled_job_skips_aggregation() {
        let app = test_app();
        let key = register_node(&app, 1).await;
        let name = format!("{}:0", key);
        connect(&app, &name).await;

        // el worker remoto nunca contesta, así que el job no puede terminar
        let items: Vec<Value> = (0..3).map(|i| json!({"text": format!("w{}", i)})).collect();
        let (_, job) = call(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({"task": "WordCount", "items": items})),
        )
        .await;
        let id = job["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "POST", &format!("/api/v1/jobs/{}/cancel", id), None).await;
        assert_eq!(status, StatusCode::OK);

        let done = wait_for_job(&app, &id, "CANCELLED").await;
        assert!(done["result"].is_null());
    }

    #[tokio::test]
    async fn disconnect_removes_the_worker() {
        let app = test_app();
        let key = register_node(&app, 1).await;
        let name = format!("{}:0", key);
        connect(&app, &name).await;

        let (_, ack) = call(
            &app,
            "POST",
            "/api/v1/workers/disconnect",
            Some(json!({"name": name})),
        )
        .await;
        assert_eq!(ack["ok"], true);

        let (_, workers) = call(&app, "GET", "/api/v1/workers", None).await;
        assert_eq!(workers, json!([]));

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/workers/heartbeat",
            Some(json!({"name": name})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
