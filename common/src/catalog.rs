//! Catálogo de jobs conocidos por el cluster.
//!
//! Master y nodos cargan el mismo catálogo: el master lo usa para armar el
//! árbol de cada job y su combinador, y los workers para encontrar, a partir
//! de la clave punteada que llega con cada unidad, qué hoja ejecutar.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, TaskNotFoundError};
use crate::protocol::{Record, WorkOutcome, WorkPayload, WorkRequest};
use crate::scheduler::{LocalExecutor, WorkCombiner};
use crate::task::{Task, TaskDef};
use crate::wordcount::{count_item, WordCountCombiner};

pub type LeafHandler = Arc<dyn Fn(&Record) -> Result<Record> + Send + Sync>;
pub type CombinerFactory = Arc<dyn Fn() -> Box<dyn WorkCombiner> + Send + Sync>;

struct JobEntry {
    def: TaskDef,
    // árbol de referencia para resolver claves; cada job arma el suyo
    template: Arc<Task>,
    combiner: CombinerFactory,
}

#[derive(Default)]
pub struct TaskCatalog {
    jobs: HashMap<String, JobEntry>,
    handlers: HashMap<String, LeafHandler>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catálogo con los jobs que trae el cluster de fábrica.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register_job(
            TaskDef::parallel("WordCount", TaskDef::leaf("CountWords")),
            || Box::new(WordCountCombiner::default()),
        );
        catalog.register_handler("CountWords", count_item);
        catalog
    }

    pub fn register_job<F>(&mut self, def: TaskDef, combiner: F)
    where
        F: Fn() -> Box<dyn WorkCombiner> + Send + Sync + 'static,
    {
        let name = def.name().to_string();
        let template = Task::build(&def);
        self.jobs.insert(
            name.clone(),
            JobEntry {
                def,
                template,
                combiner: Arc::new(combiner),
            },
        );
        info!("job registrado en el catálogo: {}", name);
    }

    pub fn register_handler<F>(&mut self, leaf: &str, handler: F)
    where
        F: Fn(&Record) -> Result<Record> + Send + Sync + 'static,
    {
        self.handlers.insert(leaf.to_string(), Arc::new(handler));
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }

    fn entry(&self, job: &str) -> Result<&JobEntry, CatalogError> {
        self.jobs
            .get(job)
            .ok_or_else(|| CatalogError::UnknownJob(job.to_string()))
    }

    /// Árbol nuevo para un job, con su propio estado.
    pub fn instantiate(&self, job: &str) -> Result<Arc<Task>, CatalogError> {
        Ok(Task::build(&self.entry(job)?.def))
    }

    pub fn combiner(&self, job: &str) -> Result<Box<dyn WorkCombiner>, CatalogError> {
        Ok((self.entry(job)?.combiner)())
    }

    /// Clave punteada -> hoja ejecutable. El primer segmento es el job.
    pub fn resolve(&self, subtask_key: &str) -> Result<Arc<Task>, CatalogError> {
        let root = subtask_key.split('.').next().unwrap_or_default();
        let entry = self.jobs.get(root).ok_or_else(|| TaskNotFoundError {
            path: subtask_key.to_string(),
        })?;

        let task = entry.template.find(subtask_key)?;
        if !task.is_leaf() {
            return Err(CatalogError::NotLeaf(subtask_key.to_string()));
        }
        Ok(task)
    }

    pub fn execute(&self, subtask_key: &str, payload: &WorkPayload) -> Result<Record, CatalogError> {
        let leaf = self.resolve(subtask_key)?;
        let handler = self
            .handlers
            .get(leaf.name())
            .ok_or_else(|| CatalogError::NoHandler(leaf.name().to_string()))?;

        debug!("ejecutando {} ({})", subtask_key, leaf.name());
        handler(&payload.data).map_err(|e| CatalogError::Handler {
            task: subtask_key.to_string(),
            message: format!("{:#}", e),
        })
    }
}

/// Corre las unidades locales resolviendo la subtarea en el catálogo,
/// en un hilo de bloqueo.
#[derive(Clone)]
pub struct CatalogExecutor {
    catalog: Arc<TaskCatalog>,
}

impl CatalogExecutor {
    pub fn new(catalog: Arc<TaskCatalog>) -> Self {
        Self { catalog }
    }
}

impl LocalExecutor for CatalogExecutor {
    fn start(&self, request: WorkRequest) -> oneshot::Receiver<WorkOutcome> {
        let (tx, rx) = oneshot::channel();
        let catalog = self.catalog.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = match catalog.execute(&request.subtask_key, &request.payload) {
                Ok(results) => WorkOutcome::Completed(results),
                Err(e) => {
                    warn!("unidad local {} falló: {}", request.work_unit_id, e);
                    WorkOutcome::Failed(e.to_string())
                }
            };
            let _ = tx.send(outcome);
        });

        rx
    }
}
