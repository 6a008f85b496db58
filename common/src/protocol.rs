use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::WorkUnitId;
use crate::pool::Reconciliation;
use crate::task::TaskStatus;

pub type JobId = String;

/// Nombre de worker con formato "<node-key>:<core-index>".
pub type WorkerName = String;

/// Registro genérico de datos. JSON para poder mandar cualquier cosa.
pub type Record = serde_json::Value;

pub fn worker_name(node_key: &str, core: usize) -> WorkerName {
    format!("{}:{}", node_key, core)
}

/* --------- Unidades de trabajo --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPayload {
    pub data: Record,
}

/// Lo que se despacha a un worker: qué subtarea correr, con qué dato
/// y con qué id de unidad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub subtask_key: String,
    pub payload: WorkPayload,
    pub work_unit_id: WorkUnitId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum WorkOutcome {
    Completed(Record),
    Failed(String),
}

/* --------- Estado que reporta un worker al conectarse --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatusCode {
    Working,
    Finished,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatusReport {
    pub status: WorkerStatusCode,
    /// Subtarea en la que estaba (WORKING / FINISHED)
    #[serde(default)]
    pub task_key: Option<String>,
    /// Unidad que terminó sin poder reportar (FINISHED)
    #[serde(default)]
    pub work_unit_id: Option<WorkUnitId>,
}

impl WorkerStatusReport {
    pub fn idle() -> Self {
        Self {
            status: WorkerStatusCode::Idle,
            task_key: None,
            work_unit_id: None,
        }
    }
}

/* --------- Nodos --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegisterRequest {
    pub hostname: String,
    pub cores: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegisterResponse {
    pub node_key: String,
}

/* --------- Workers --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConnectRequest {
    pub name: WorkerName,
    pub status: WorkerStatusReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConnectResponse {
    pub reconciliation: Reconciliation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNextRequest {
    pub name: WorkerName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNextResponse {
    pub work: Option<WorkRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCompleteRequest {
    pub name: WorkerName,
    pub work_unit_id: WorkUnitId,
    pub results: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFailedRequest {
    pub name: WorkerName,
    pub work_unit_id: WorkUnitId,
    pub reason: String,
}

/// Señal de vida mientras el worker está ocupado y no pide trabajo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatRequest {
    pub name: WorkerName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDisconnectRequest {
    pub name: WorkerName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

/* --------- Jobs --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Nombre del job en el catálogo, ej: "WordCount"
    pub task: String,

    /// Elementos de entrada, en orden
    #[serde(default)]
    pub items: Vec<Record>,

    /// Patrón de archivos; cada archivo se vuelve un item {"path": ...}
    #[serde(default)]
    pub input_glob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub task: String,
    pub status: TaskStatus,

    pub total_units: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    /// Porcentaje 0-100
    pub progress: f64,

    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Resultado agregado, sólo cuando el job está COMPLETE
    pub result: Option<Record>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_names_join_node_key_and_core() {
        assert_eq!(worker_name("abc", 0), "abc:0");
        assert_eq!(worker_name("abc", 7), "abc:7");
    }

    #[test]
    fn work_request_wire_shape() {
        let req = WorkRequest {
            subtask_key: "WordCount.subtask".to_string(),
            payload: WorkPayload {
                data: serde_json::json!({"text": "hola"}),
            },
            work_unit_id: 3,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["payload"]["data"]["text"], "hola");
        assert_eq!(v["work_unit_id"], 3);
    }

    #[test]
    fn status_report_defaults_optional_fields() {
        let report: WorkerStatusReport = serde_json::from_str(r#"{"status":"IDLE"}"#).unwrap();
        assert_eq!(report, WorkerStatusReport::idle());
    }

    #[test]
    fn job_request_accepts_only_a_glob() {
        let req: JobRequest =
            serde_json::from_str(r#"{"task":"WordCount","input_glob":"/data/*.txt"}"#).unwrap();
        assert!(req.items.is_empty());
        assert_eq!(req.input_glob.as_deref(), Some("/data/*.txt"));
    }
}
