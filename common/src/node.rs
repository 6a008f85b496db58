use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sysinfo::{System, SystemExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::env_or;
use crate::error::NodeError;
use crate::pool::MembershipEvent;
use crate::protocol::{worker_name, WorkerName};

/// Núcleos de este equipo; NODE_CORES lo pisa.
pub fn detect_cores() -> usize {
    let mut sys = System::new();
    sys.refresh_cpu();
    let detected = sys.cpus().len().max(1);
    env_or("NODE_CORES", detected).max(1)
}

#[derive(Debug)]
struct NodeState<C> {
    node_key: Option<String>,
    authorized: BTreeSet<WorkerName>,
    workers: HashMap<WorkerName, C>,
}

/// Workers locales de un nodo. Un worker lógico por núcleo, habilitados
/// recién cuando el master le asignó su clave al nodo.
pub struct NodeWorkerPool<C> {
    cores: usize,
    state: Mutex<NodeState<C>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl<C> NodeWorkerPool<C> {
    pub fn new(cores: usize) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            cores,
            state: Mutex::new(NodeState {
                node_key: None,
                authorized: BTreeSet::new(),
                workers: HashMap::new(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn node_key(&self) -> Option<String> {
        self.lock().node_key.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Habilita "<node_key>:<i>" para cada núcleo. Si el nodo ya tenía otra
    /// clave, los nombres viejos dejan de estar autorizados.
    pub fn enable_workers(&self, node_key: &str) -> Vec<WorkerName> {
        let names: Vec<WorkerName> = (0..self.cores).map(|i| worker_name(node_key, i)).collect();

        let mut state = self.lock();
        if state.node_key.as_deref() != Some(node_key) {
            state.authorized.clear();
        }
        state.node_key = Some(node_key.to_string());
        for name in &names {
            debug!("habilitando worker: {}", name);
            state.authorized.insert(name.clone());
        }

        info!("nodo {}: {} workers habilitados", node_key, names.len());
        names
    }

    pub fn is_authorized(&self, name: &str) -> bool {
        self.lock().authorized.contains(name)
    }

    pub fn on_worker_authenticated(&self, name: &str, connection: C) -> Result<(), NodeError> {
        {
            let mut state = self.lock();
            if !state.authorized.contains(name) {
                warn!("worker {} no está habilitado en este nodo", name);
                return Err(NodeError::NotAuthorized(name.to_string()));
            }
            state.workers.insert(name.to_string(), connection);
        }

        let _ = self
            .events
            .send(MembershipEvent::WorkerConnected(name.to_string()));
        Ok(())
    }

    pub fn on_worker_disconnected(&self, name: &str) -> Option<C> {
        let removed = self.lock().workers.remove(name);

        if removed.is_some() {
            let _ = self
                .events
                .send(MembershipEvent::WorkerDisconnected(name.to_string()));
        }
        removed
    }

    pub fn connected(&self) -> Vec<WorkerName> {
        let mut names: Vec<WorkerName> = self.lock().workers.keys().cloned().collect();
        names.sort();
        names
    }
}
