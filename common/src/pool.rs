use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::ledger::WorkUnitId;
use crate::protocol::{WorkOutcome, WorkRequest, WorkerName, WorkerStatusCode, WorkerStatusReport};
use crate::scheduler::RemoteDispatch;

/// Operaciones remotas que se le pueden pedir a un worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Status {
        reply: oneshot::Sender<WorkerStatusReport>,
    },
    Run {
        request: WorkRequest,
        reply: oneshot::Sender<WorkOutcome>,
    },
}

/// Handle para hablar con un worker conectado. El transporte real vive
/// del otro lado del canal.
#[derive(Debug, Clone)]
pub struct WorkerConnection {
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerConnection {
    pub fn new(tx: mpsc::UnboundedSender<WorkerCommand>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// `None` si el worker ya no está del otro lado.
    pub async fn status(&self) -> Option<WorkerStatusReport> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(WorkerCommand::Status { reply }).ok()?;
        rx.await.ok()
    }

    /// Despacha una unidad. Si el canal está cerrado el receiver devuelve
    /// error enseguida, igual que si el worker se cayera a mitad.
    pub fn run(&self, request: WorkRequest) -> oneshot::Receiver<WorkOutcome> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(WorkerCommand::Run { request, reply });
        rx
    }

    pub fn same_as(&self, other: &WorkerConnection) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle,
    Working,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct Worker {
    pub name: WorkerName,
    pub connection: WorkerConnection,
    pub state: WorkerState,
}

/// Resultado de reconciliar el estado de un worker que se (re)conecta.
///
/// Sólo `Registered` está resuelto; los otros dos quedan expuestos para
/// que el llamador los detecte y los registre en el log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reconciliation {
    Registered,
    StillWorking {
        task_key: Option<String>,
    },
    ResultsPending {
        task_key: Option<String>,
        work_unit_id: Option<WorkUnitId>,
    },
}

impl Reconciliation {
    pub fn is_handled(&self) -> bool {
        matches!(self, Reconciliation::Registered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    WorkerConnected(WorkerName),
    WorkerDisconnected(WorkerName),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub name: WorkerName,
    pub state: WorkerState,
}

#[derive(Debug, Default)]
struct PoolState {
    workers: HashMap<WorkerName, Worker>,
    // un nombre está acá sólo si workers[nombre] está IDLE
    idle: VecDeque<WorkerName>,
}

fn lock_state(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Workers conectados al master: quién está, quién está libre.
pub struct WorkerPool {
    state: Arc<Mutex<PoolState>>,
    events: broadcast::Sender<MembershipEvent>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(PoolState::default())),
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: MembershipEvent) {
        // sin suscriptores no pasa nada
        let _ = self.events.send(event);
    }

    /// Un worker pasó la autenticación. Se le pregunta qué estaba haciendo
    /// (puede haberse reiniciado él, o el master) y se reconcilia.
    pub async fn on_worker_authenticated(
        &self,
        name: &str,
        connection: WorkerConnection,
    ) -> Result<Reconciliation, PoolError> {
        let report = match timeout(self.config.status_timeout, connection.status()).await {
            Ok(Some(report)) => report,
            Ok(None) => return Err(PoolError::StatusUnavailable(name.to_string())),
            Err(_) => return Err(PoolError::StatusTimeout(name.to_string())),
        };

        let reconciliation = match report.status {
            WorkerStatusCode::Working => {
                // era el coordinador local de algún job antes de reiniciarse
                info!("worker:{} - sigue trabajando ({:?})", name, report.task_key);
                self.register(name, connection, WorkerState::Working);
                Reconciliation::StillWorking {
                    task_key: report.task_key,
                }
            }
            WorkerStatusCode::Finished => {
                info!(
                    "worker:{} - había terminado la unidad {:?} sin poder reportarla",
                    name, report.work_unit_id
                );
                self.register(name, connection, WorkerState::Working);
                Reconciliation::ResultsPending {
                    task_key: report.task_key,
                    work_unit_id: report.work_unit_id,
                }
            }
            WorkerStatusCode::Idle => {
                self.register(name, connection, WorkerState::Idle);
                Reconciliation::Registered
            }
        };

        self.emit(MembershipEvent::WorkerConnected(name.to_string()));
        Ok(reconciliation)
    }

    fn register(&self, name: &str, connection: WorkerConnection, state: WorkerState) {
        let mut pool = lock_state(&self.state);
        pool.workers.insert(
            name.to_string(),
            Worker {
                name: name.to_string(),
                connection,
                state,
            },
        );

        let already_idle = pool.idle.iter().any(|n| n == name);
        match state {
            WorkerState::Idle if !already_idle => {
                pool.idle.push_back(name.to_string());
                info!("worker:{} - agregado a los workers libres", name);
            }
            WorkerState::Idle => {}
            _ => pool.idle.retain(|n| n != name),
        }
    }

    /// Saca un worker libre, lo marca ocupado y le despacha la unidad.
    /// `None` si no hay ninguno libre.
    pub fn request_worker(&self, request: WorkRequest) -> Option<oneshot::Receiver<WorkOutcome>> {
        let (name, connection) = {
            let mut pool = lock_state(&self.state);
            loop {
                let name = pool.idle.pop_front()?;
                if let Some(worker) = pool.workers.get_mut(&name) {
                    worker.state = WorkerState::Working;
                    break (name, worker.connection.clone());
                }
            }
        };

        debug!(
            "worker:{} - recibe la unidad {} ({})",
            name, request.work_unit_id, request.subtask_key
        );
        let unit_id = request.work_unit_id;
        let result = connection.run(request);

        let (tx, rx) = oneshot::channel();
        let state = self.state.clone();
        tokio::spawn(async move {
            let outcome = match result.await {
                Ok(outcome) => outcome,
                Err(_) => WorkOutcome::Failed(format!("worker {} desconectado", name)),
            };

            // vuelve a estar libre sólo si sigue siendo la misma conexión
            {
                let mut pool = lock_state(&state);
                let mut restored = false;
                if let Some(worker) = pool.workers.get_mut(&name) {
                    if worker.connection.same_as(&connection) && worker.state == WorkerState::Working {
                        worker.state = WorkerState::Idle;
                        restored = true;
                    }
                }
                if restored && !pool.idle.iter().any(|n| n == &name) {
                    pool.idle.push_back(name.clone());
                }
            }

            if tx.send(outcome).is_err() {
                debug!("worker:{} - nadie esperaba el resultado de {}", name, unit_id);
            }
        });

        Some(rx)
    }

    /// Devuelve el worker que se fue, marcado como DISCONNECTED.
    pub fn on_worker_disconnected(&self, name: &str) -> Option<Worker> {
        let removed = {
            let mut pool = lock_state(&self.state);
            let removed = pool.workers.remove(name);
            pool.idle.retain(|n| n != name);
            removed
        };

        match removed {
            Some(mut worker) => {
                info!("worker:{} - desconectado", name);
                worker.state = WorkerState::Disconnected;
                self.emit(MembershipEvent::WorkerDisconnected(name.to_string()));
                Some(worker)
            }
            None => {
                warn!("worker:{} - desconexión de un worker desconocido", name);
                None
            }
        }
    }

    pub fn idle_count(&self) -> usize {
        lock_state(&self.state).idle.len()
    }

    pub fn idle_names(&self) -> Vec<WorkerName> {
        lock_state(&self.state).idle.iter().cloned().collect()
    }

    pub fn state_of(&self, name: &str) -> Option<WorkerState> {
        lock_state(&self.state).workers.get(name).map(|w| w.state)
    }

    pub fn list(&self) -> Vec<WorkerSummary> {
        let pool = lock_state(&self.state);
        let mut out: Vec<WorkerSummary> = pool
            .workers
            .values()
            .map(|w| WorkerSummary {
                name: w.name.clone(),
                state: w.state,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl RemoteDispatch for WorkerPool {
    /// Workers libres más el slot local de quien corre el job.
    fn available_workers(&self) -> usize {
        self.idle_count() + 1
    }

    fn request_worker(&self, request: WorkRequest) -> Option<oneshot::Receiver<WorkOutcome>> {
        WorkerPool::request_worker(self, request)
    }
}
