//! Núcleo compartido por master, nodos y cliente: direccionamiento de
//! tareas, ledger de unidades, scheduler paralelo y pools de workers.

pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod node;
pub mod pool;
pub mod protocol;
pub mod scheduler;
pub mod task;
pub mod wordcount;

pub use catalog::{CatalogExecutor, TaskCatalog};
pub use error::{CatalogError, NodeError, PoolError, SchedulerError, TaskNotFoundError};
pub use ledger::{LedgerSnapshot, WorkLedger, WorkUnit, WorkUnitId};
pub use pool::{MembershipEvent, Reconciliation, WorkerConnection, WorkerPool};
pub use protocol::*;
pub use scheduler::{JobHandle, JobOutcome, LocalExecutor, ParallelJob, RemoteDispatch, WorkCombiner};
pub use task::{Task, TaskDef, TaskStatus};
