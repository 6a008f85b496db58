use crate::state::AppState;
use common::WorkerName;
use tracing::info;

/// Loop en segundo plano: cada `monitor_interval` desconecta a los workers
/// que dejaron de dar señales.
pub async fn monitor_workers(state: AppState) {
    loop {
        tokio::time::sleep(state.config.monitor_interval).await;
        sweep(&state);
    }
}

/// Una pasada del monitor. Al cerrar el buzón, las unidades que tenía el
/// worker vuelven a la cola de su job.
pub fn sweep(state: &AppState) -> Vec<WorkerName> {
    let dead = state.bridge.stale(state.config.worker_timeout);

    for name in &dead {
        info!(
            "worker:{} - sin señales hace más de {:?}, se lo da por caído ({} unidades en vuelo)",
            name,
            state.config.worker_timeout,
            state.bridge.in_flight(name)
        );
        state.bridge.close(name);
        state.pool.on_worker_disconnected(name);
    }

    dead
}
