// master/src/bridge.rs
//
// El pool habla con cada worker por un canal; los workers reales hablan
// HTTP y vienen a buscar trabajo. Acá se juntan las dos puntas: cada
// worker conectado tiene un buzón con las unidades que le despachó el
// pool y los oneshot donde hay que contestar.

use common::pool::{WorkerCommand, WorkerConnection};
use common::{WorkOutcome, WorkRequest, WorkUnitId, WorkerName, WorkerStatusReport};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

struct Mailbox {
    // distingue una reconexión con el mismo nombre
    generation: u64,
    queue: VecDeque<WorkRequest>,
    replies: HashMap<WorkUnitId, oneshot::Sender<WorkOutcome>>,
    last_seen: Instant,
}

#[derive(Default)]
struct BridgeState {
    mailboxes: HashMap<WorkerName, Mailbox>,
    next_generation: u64,
}

#[derive(Clone, Default)]
pub struct Bridge {
    state: Arc<Mutex<BridgeState>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Abre el buzón de un worker y devuelve la conexión que usa el pool.
    /// Si ya había uno con ese nombre se reemplaza: sus unidades pendientes
    /// quedan sin respuesta y el pool las da por fallidas.
    pub fn open(&self, name: &str, status: WorkerStatusReport) -> WorkerConnection {
        let (connection, rx) = WorkerConnection::channel();

        let generation = {
            let mut st = self.lock();
            st.next_generation += 1;
            let generation = st.next_generation;
            let old = st.mailboxes.insert(
                name.to_string(),
                Mailbox {
                    generation,
                    queue: VecDeque::new(),
                    replies: HashMap::new(),
                    last_seen: Instant::now(),
                },
            );
            if let Some(old) = old {
                if !old.replies.is_empty() {
                    warn!(
                        "worker:{} - reconectado con {} unidades sin reportar",
                        name,
                        old.replies.len()
                    );
                }
            }
            generation
        };

        tokio::spawn(self.clone().pump(name.to_string(), generation, status, rx));
        connection
    }

    /// Atiende los comandos del pool para un worker hasta que se suelte la conexión.
    async fn pump(
        self,
        name: WorkerName,
        generation: u64,
        status: WorkerStatusReport,
        mut rx: mpsc::UnboundedReceiver<WorkerCommand>,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WorkerCommand::Status { reply } => {
                    let _ = reply.send(status.clone());
                }
                WorkerCommand::Run { request, reply } => {
                    let mut st = self.lock();
                    match st.mailboxes.get_mut(&name) {
                        Some(mb) if mb.generation == generation => {
                            mb.replies.insert(request.work_unit_id, reply);
                            mb.queue.push_back(request);
                        }
                        _ => {
                            // al soltar `reply` el pool ve la unidad como fallida
                            debug!(
                                "worker:{} - conexión vieja, se descarta la unidad {}",
                                name, request.work_unit_id
                            );
                        }
                    }
                }
            }
        }
        debug!("worker:{} - conexión {} cerrada", name, generation);
    }

    /// Próxima unidad para el worker. `None` si el worker no tiene buzón
    /// (tiene que volver a conectarse).
    pub fn next(&self, name: &str) -> Option<Option<WorkRequest>> {
        let mut st = self.lock();
        let mb = st.mailboxes.get_mut(name)?;
        mb.last_seen = Instant::now();
        Some(mb.queue.pop_front())
    }

    pub fn touch(&self, name: &str) -> bool {
        match self.lock().mailboxes.get_mut(name) {
            Some(mb) => {
                mb.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Entrega el resultado de una unidad. `false` si nadie la esperaba
    /// (reporte tardío o duplicado).
    pub fn resolve(&self, name: &str, id: WorkUnitId, outcome: WorkOutcome) -> bool {
        let reply = {
            let mut st = self.lock();
            let Some(mb) = st.mailboxes.get_mut(name) else {
                return false;
            };
            mb.last_seen = Instant::now();
            mb.queue.retain(|r| r.work_unit_id != id);
            mb.replies.remove(&id)
        };

        match reply {
            Some(reply) => reply.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Cierra el buzón; lo que estaba en vuelo queda como fallido.
    pub fn close(&self, name: &str) -> bool {
        self.lock().mailboxes.remove(name).is_some()
    }

    /// Workers sin señales hace más de `timeout`.
    pub fn stale(&self, timeout: Duration) -> Vec<WorkerName> {
        let now = Instant::now();
        let mut names: Vec<WorkerName> = self
            .lock()
            .mailboxes
            .iter()
            .filter(|(_, mb)| now.duration_since(mb.last_seen) >= timeout)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn in_flight(&self, name: &str) -> usize {
        self.lock()
            .mailboxes
            .get(name)
            .map(|mb| mb.replies.len())
            .unwrap_or(0)
    }
}
