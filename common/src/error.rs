use thiserror::Error;

/// Ruta que no corresponde a ningún nodo del árbol de tareas.
/// Siempre recuperable: el llamador suele responder "no existe la tarea".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task not found: {path}")]
pub struct TaskNotFoundError {
    pub path: String,
}

impl TaskNotFoundError {
    pub fn new(path: &[&str]) -> Self {
        Self {
            path: path.join("."),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} is not a parallel task")]
    NotParallel(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker {0} did not answer the status request")]
    StatusUnavailable(String),
    #[error("worker {0} timed out answering the status request")]
    StatusTimeout(String),
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("worker {0} was not provisioned on this node")]
    NotAuthorized(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    NotFound(#[from] TaskNotFoundError),
    #[error("task {0} is not a leaf task")]
    NotLeaf(String),
    #[error("no handler registered for task {0}")]
    NoHandler(String),
    #[error("unknown job {0}")]
    UnknownJob(String),
    #[error("task {task} failed: {message}")]
    Handler { task: String, message: String },
}
