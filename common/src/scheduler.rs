use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::ledger::{LedgerSnapshot, WorkLedger, WorkUnit, WorkUnitId};
use crate::protocol::{Record, WorkOutcome, WorkPayload, WorkRequest};
use crate::task::{Task, TaskStatus};

/// Lógica propia de cada job: cómo juntar el resultado de una unidad
/// y cómo producir el resultado final cuando ya no queda nada.
pub trait WorkCombiner: Send + 'static {
    /// Se llama una vez por elemento completado, con el elemento original.
    fn work_unit_complete(&mut self, item: &Record, results: Record);

    /// Se llama una única vez, cuando el job quedó vacío.
    fn work_complete(&mut self) -> Record;
}

/// Lado remoto: de dónde salen los workers.
pub trait RemoteDispatch: Send + Sync + 'static {
    /// Capacidad disponible para un job nuevo, contando el slot local.
    fn available_workers(&self) -> usize;

    /// Despacha la unidad a un worker libre. `None` si no hay ninguno:
    /// no es un error, sólo "probar más tarde".
    fn request_worker(&self, request: WorkRequest) -> Option<oneshot::Receiver<WorkOutcome>>;
}

/// Ejecución en este mismo proceso de la plantilla de subtarea.
pub trait LocalExecutor: Send + Sync + 'static {
    fn start(&self, request: WorkRequest) -> oneshot::Receiver<WorkOutcome>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Complete(Record),
    Cancelled,
}

/// Se resuelve cuando el chequeo periódico termina el job.
#[derive(Debug)]
pub struct JobHandle {
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub async fn wait(self) -> JobOutcome {
        self.outcome.await.unwrap_or(JobOutcome::Cancelled)
    }
}

/// Un job paralelo en marcha: reparte el ledger entre workers remotos y
/// un slot local, reacciona a completados y fallos, y detecta el final
/// con un chequeo periódico.
pub struct ParallelJob {
    task: Arc<Task>,
    subtask_key: String,
    ledger: WorkLedger<Record>,
    combiner: Mutex<Box<dyn WorkCombiner>>,
    remote: Arc<dyn RemoteDispatch>,
    local: Arc<dyn LocalExecutor>,
    config: SchedulerConfig,

    available_workers: AtomicUsize,
    remote_busy: AtomicUsize,
    local_busy: AtomicUsize,
    stop: AtomicBool,
    finished: AtomicBool,
}

impl ParallelJob {
    pub fn new(
        task: Arc<Task>,
        items: Vec<Record>,
        combiner: Box<dyn WorkCombiner>,
        remote: Arc<dyn RemoteDispatch>,
        local: Arc<dyn LocalExecutor>,
        config: SchedulerConfig,
    ) -> Result<Arc<Self>, SchedulerError> {
        let subtask_key = task
            .subtask()
            .map(|sub| sub.get_key())
            .ok_or_else(|| SchedulerError::NotParallel(task.get_key()))?;

        Ok(Arc::new(Self {
            task,
            subtask_key,
            ledger: WorkLedger::new(items),
            combiner: Mutex::new(combiner),
            remote,
            local,
            config,
            available_workers: AtomicUsize::new(1),
            remote_busy: AtomicUsize::new(0),
            local_busy: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }))
    }

    /// Reparto inicial: N-1 unidades remotas, una local, y arranca el chequeo.
    /// Debe llamarse dentro de un runtime de tokio.
    pub fn start(self: &Arc<Self>) -> JobHandle {
        self.task.set_status(TaskStatus::Running);

        let available = self.remote.available_workers().max(1);
        self.available_workers.store(available, Ordering::SeqCst);
        info!(
            "job {} arrancando: {} unidades, {} workers disponibles",
            self.task.get_key(),
            self.ledger.total(),
            available
        );

        // con un solo worker (este) no hay nada que repartir afuera
        for i in 1..available {
            debug!("job {}: intentando asignar worker remoto {}", self.task.get_key(), i);
            self.assign_remote();
        }

        self.assign_local();
        debug!("job {}: reparto inicial hecho", self.task.get_key());

        let (tx, rx) = oneshot::channel();
        let job = self.clone();
        tokio::spawn(async move {
            job.watch(tx).await;
        });

        JobHandle { outcome: rx }
    }

    /// Marca el job para cancelar. Se aplica en el próximo chequeo.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn subtask_key(&self) -> &str {
        &self.subtask_key
    }

    pub fn available_workers(&self) -> usize {
        self.available_workers.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn progress(&self) -> f64 {
        self.ledger.progress()
    }

    pub fn get_work_unit(&self) -> Option<WorkUnit<Record>> {
        self.ledger.get_work_unit()
    }

    fn combiner(&self) -> MutexGuard<'_, Box<dyn WorkCombiner>> {
        self.combiner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_for(&self, unit: &WorkUnit<Record>) -> WorkRequest {
        WorkRequest {
            subtask_key: self.subtask_key.clone(),
            payload: WorkPayload {
                data: unit.item.clone(),
            },
            work_unit_id: unit.id,
        }
    }

    /// Toma una unidad y la manda a un worker remoto.
    /// Sin unidades es un no-op; sin workers la unidad vuelve a la cabeza.
    pub fn assign_remote(self: &Arc<Self>) -> bool {
        if self.finished.load(Ordering::SeqCst) {
            return false;
        }

        let Some(unit) = self.ledger.get_work_unit() else {
            debug!("job {}: no quedan unidades, slot remoto ocioso", self.task.get_key());
            return false;
        };

        let id = unit.id;
        let Some(reply) = self.remote.request_worker(self.request_for(&unit)) else {
            self.ledger.release(id);
            debug!(
                "job {}: no hay workers libres para la unidad {}, se reintenta en el próximo chequeo",
                self.task.get_key(),
                id
            );
            return false;
        };

        debug!("job {}: unidad {} asignada a worker remoto", self.task.get_key(), id);
        self.remote_busy.fetch_add(1, Ordering::SeqCst);

        // el slot se libera recién después de intentar reasignarlo
        let job = self.clone();
        tokio::spawn(async move {
            let outcome = reply.await;
            match outcome {
                Ok(WorkOutcome::Completed(results)) => job.on_remote_complete(results, id),
                Ok(WorkOutcome::Failed(reason)) => {
                    warn!("job {}: unidad {} falló: {}", job.task.get_key(), id, reason);
                    job.on_worker_failed(id);
                }
                Err(_) => {
                    warn!(
                        "job {}: se perdió la conexión del worker con la unidad {}",
                        job.task.get_key(),
                        id
                    );
                    job.on_worker_failed(id);
                }
            }
            job.remote_busy.fetch_sub(1, Ordering::SeqCst);
        });

        true
    }

    /// Igual que `assign_remote` pero corriendo la subtarea en este proceso.
    pub fn assign_local(self: &Arc<Self>) -> bool {
        if self.finished.load(Ordering::SeqCst) {
            return false;
        }

        let Some(unit) = self.ledger.get_work_unit() else {
            debug!("job {}: sin trabajo para el slot local, ocioso", self.task.get_key());
            return false;
        };

        let id = unit.id;
        debug!("job {}: unidad {} corriendo localmente", self.task.get_key(), id);
        self.local_busy.fetch_add(1, Ordering::SeqCst);
        let reply = self.local.start(self.request_for(&unit));

        let job = self.clone();
        tokio::spawn(async move {
            let outcome = reply.await;
            match outcome {
                Ok(WorkOutcome::Completed(results)) => job.on_local_complete(results, id),
                Ok(WorkOutcome::Failed(reason)) => {
                    warn!("job {}: unidad local {} falló: {}", job.task.get_key(), id, reason);
                    // el slot local se vuelve a llenar en el próximo chequeo
                    job.on_worker_failed(id);
                }
                Err(_) => {
                    warn!("job {}: la ejecución local de {} se cortó", job.task.get_key(), id);
                    job.on_worker_failed(id);
                }
            }
            job.local_busy.fetch_sub(1, Ordering::SeqCst);
        });

        true
    }

    fn record_completion(&self, results: Record, id: WorkUnitId) {
        let recorded = self
            .ledger
            .complete(id, |item| self.combiner().work_unit_complete(item, results));

        if !recorded {
            warn!(
                "job {}: completado de unidad desconocida {} (duplicado o ya re-encolada), se ignora",
                self.task.get_key(),
                id
            );
        }
    }

    pub fn on_remote_complete(self: &Arc<Self>, results: Record, id: WorkUnitId) {
        debug!("job {}: unidad remota {} completada", self.task.get_key(), id);
        self.record_completion(results, id);

        // puede que varios workers lleguen acá por la última unidad; los que
        // lleguen tarde simplemente no reciben trabajo
        if self.ledger.has_pending() {
            self.assign_remote();
        }
    }

    pub fn on_local_complete(self: &Arc<Self>, results: Record, id: WorkUnitId) {
        debug!("job {}: unidad local {} completada", self.task.get_key(), id);
        self.record_completion(results, id);

        if self.ledger.has_pending() {
            self.assign_local();
        }
    }

    /// El worker falló: el elemento vuelve al final de la cola.
    pub fn on_worker_failed(&self, id: WorkUnitId) {
        match self.ledger.fail(id) {
            Some(failures) if failures >= self.config.retry_warn_threshold => warn!(
                "job {}: el elemento de la unidad {} ya falló {} veces, re-encolado igual",
                self.task.get_key(),
                id,
                failures
            ),
            Some(_) => warn!(
                "job {}: fallo de worker en la unidad {}, re-encolada al final",
                self.task.get_key(),
                id
            ),
            None => debug!(
                "job {}: fallo de unidad {} que ya no estaba en curso",
                self.task.get_key(),
                id
            ),
        }
    }

    /// Vuelve a ocupar slots que quedaron libres por falta de workers o por fallos.
    fn refill(self: &Arc<Self>) {
        let remote_slots = self.available_workers().saturating_sub(1);
        while self.remote_busy.load(Ordering::SeqCst) < remote_slots && self.ledger.has_pending() {
            if !self.assign_remote() {
                break;
            }
        }

        if self.local_busy.load(Ordering::SeqCst) == 0 && self.ledger.has_pending() {
            self.assign_local();
        }
    }

    /// Chequeo periódico: cancelación, fin del job, o volver a esperar.
    async fn watch(self: Arc<Self>, done: oneshot::Sender<JobOutcome>) {
        loop {
            sleep(self.config.poll_interval).await;

            if self.stop.load(Ordering::SeqCst) {
                self.finished.store(true, Ordering::SeqCst);
                self.task.set_status(TaskStatus::Cancelled);
                info!("job {} cancelado, no se agregan resultados", self.task.get_key());
                let _ = done.send(JobOutcome::Cancelled);
                return;
            }

            if let Some(result) = self
                .ledger
                .when_drained(|| self.combiner().work_complete())
            {
                self.finished.store(true, Ordering::SeqCst);
                self.task.set_status(TaskStatus::Complete);
                info!("job {} completo", self.task.get_key());
                let _ = done.send(JobOutcome::Complete(result));
                return;
            }

            let snap = self.ledger.snapshot();
            debug!(
                "job {} sigue con trabajo: pendientes={} en_curso={} completados={}/{}",
                self.task.get_key(),
                snap.pending,
                snap.in_progress,
                snap.completed,
                snap.total
            );
            self.refill();
        }
    }
}
