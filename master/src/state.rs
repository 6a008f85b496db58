// master/src/state.rs

use common::config::{env_or, PoolConfig, SchedulerConfig};
use common::{JobId, JobInfo, ParallelJob, TaskCatalog, WorkerPool};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use crate::bridge::Bridge;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: String,
    /// Un worker que no pide trabajo ni manda heartbeat en este tiempo se da por caído
    pub worker_timeout: Duration,
    pub monitor_interval: Duration,
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            worker_timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            monitor_interval: Duration::from_secs(5),
            scheduler: SchedulerConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl MasterConfig {
    /// BIND_ADDR, WORKER_TIMEOUT_SECS y las variables de scheduler y pool.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", DEFAULT_BIND_ADDR.to_string()),
            worker_timeout: Duration::from_secs(env_or(
                "WORKER_TIMEOUT_SECS",
                DEFAULT_WORKER_TIMEOUT_SECS,
            )),
            monitor_interval: Duration::from_secs(5),
            scheduler: SchedulerConfig::from_env(),
            pool: PoolConfig::from_env(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MasterConfig>,
    pub catalog: Arc<TaskCatalog>,
    pub pool: Arc<WorkerPool>,
    pub bridge: Bridge,
    pub nodes: Arc<Mutex<HashMap<String, NodeMeta>>>,
    pub jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
}

impl AppState {
    pub fn new(config: MasterConfig, catalog: TaskCatalog) -> Self {
        let pool = Arc::new(WorkerPool::new(config.pool.clone()));
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            pool,
            bridge: Bridge::new(),
            nodes: Arc::new(Mutex::new(HashMap::new())),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub hostname: String,
    pub cores: usize,
    pub registered_at: SystemTime,
}

/// Un job mientras corre tiene su scheduler; al terminar sólo queda el
/// JobInfo final con el resultado.
pub struct JobEntry {
    pub info: JobInfo,
    pub job: Option<Arc<ParallelJob>>,
}

impl JobEntry {
    pub fn running(info: JobInfo, job: Arc<ParallelJob>) -> Self {
        Self {
            info,
            job: Some(job),
        }
    }

    /// JobInfo con los contadores del ledger al momento.
    pub fn current(&self) -> JobInfo {
        let mut info = self.info.clone();
        if let Some(job) = &self.job {
            let snap = job.snapshot();
            info.total_units = snap.total;
            info.pending = snap.pending;
            info.in_progress = snap.in_progress;
            info.completed = snap.completed;
            info.progress = job.progress();
        }
        info
    }

    /// Congela los contadores y suelta el scheduler (ledger, combinador, items).
    pub fn finish(&mut self) {
        self.info = self.current();
        self.info.finished_at = Some(chrono::Utc::now());
        self.job = None;
    }
}
