use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Identificador de una unidad de trabajo. Empieza en 1 y nunca se reutiliza.
pub type WorkUnitId = u64;

/// Un elemento de entrada en vuelo, junto con su id.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit<T> {
    pub id: WorkUnitId,
    pub item: T,
}

#[derive(Debug)]
struct Entry<T> {
    item: T,
    failures: u32,
}

/// Los campos que siempre se modifican juntos.
#[derive(Debug)]
struct LedgerState<T> {
    pending: VecDeque<Entry<T>>,
    in_progress: HashMap<WorkUnitId, Entry<T>>,
    completed: usize,
    next_id: WorkUnitId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
}

/// Contabilidad de un job paralelo: cola de pendientes + mapa de asignados.
///
/// Cada elemento de entrada está, en todo momento, en `pending` o en
/// `in_progress` hasta que se completa. Todo cambio ocurre bajo un único lock.
#[derive(Debug)]
pub struct WorkLedger<T> {
    state: Mutex<LedgerState<T>>,
    total: usize,
}

impl<T: Clone> WorkLedger<T> {
    pub fn new(items: Vec<T>) -> Self {
        let total = items.len();
        let pending = items
            .into_iter()
            .map(|item| Entry { item, failures: 0 })
            .collect();

        Self {
            state: Mutex::new(LedgerState {
                pending,
                in_progress: HashMap::new(),
                completed: 0,
                next_id: 0,
            }),
            total,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saca la cabeza de `pending` y la registra como asignada.
    /// `None` si no queda nada por repartir.
    pub fn get_work_unit(&self) -> Option<WorkUnit<T>> {
        let mut state = self.lock();
        let entry = state.pending.pop_front()?;

        state.next_id += 1;
        let id = state.next_id;
        let item = entry.item.clone();
        state.in_progress.insert(id, entry);

        Some(WorkUnit { id, item })
    }

    /// Ejecuta `combine` con el elemento original y lo da por terminado,
    /// todo dentro de la misma sección crítica.
    ///
    /// Devuelve `false` si el id no está asignado (completado dos veces,
    /// o ya re-encolado por un fallo).
    pub fn complete<F>(&self, id: WorkUnitId, combine: F) -> bool
    where
        F: FnOnce(&T),
    {
        let mut state = self.lock();
        match state.in_progress.get(&id) {
            Some(entry) => {
                combine(&entry.item);
                state.in_progress.remove(&id);
                state.completed += 1;
                true
            }
            None => false,
        }
    }

    /// Fallo del worker: el elemento vuelve al final de `pending`.
    /// Devuelve cuántas veces ha fallado ya ese elemento.
    pub fn fail(&self, id: WorkUnitId) -> Option<u32> {
        let mut state = self.lock();
        let mut entry = state.in_progress.remove(&id)?;
        entry.failures += 1;
        let failures = entry.failures;
        state.pending.push_back(entry);
        Some(failures)
    }

    /// La unidad se sacó pero no se pudo despachar: vuelve a la cabeza.
    /// No cuenta como fallo.
    pub fn release(&self, id: WorkUnitId) -> bool {
        let mut state = self.lock();
        match state.in_progress.remove(&id) {
            Some(entry) => {
                state.pending.push_front(entry);
                true
            }
            None => false,
        }
    }

    /// Ejecuta `f` bajo el lock sólo si no queda nada pendiente ni asignado.
    pub fn when_drained<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R,
    {
        let state = self.lock();
        if state.pending.is_empty() && state.in_progress.is_empty() {
            Some(f())
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            total: self.total,
            pending: state.pending.len(),
            in_progress: state.in_progress.len(),
            completed: state.completed,
        }
    }

    /// Porcentaje 0-100 de elementos completados.
    pub fn progress(&self) -> f64 {
        let snap = self.snapshot();
        if snap.total == 0 {
            return 100.0;
        }
        snap.completed as f64 * 100.0 / snap.total as f64
    }

    /// Elementos pendientes en orden de reparto.
    pub fn pending_items(&self) -> Vec<T> {
        self.lock().pending.iter().map(|e| e.item.clone()).collect()
    }
}
