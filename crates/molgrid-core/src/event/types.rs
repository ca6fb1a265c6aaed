//! Tipos de evento de un run y estructura `RunEvent`.
//!
//! Rol en el pipeline:
//! - El loop coordinador del dispatcher emite eventos a un `EventStore`
//!   append-only según transiciona estados de tasks.
//! - Los eventos son el contrato observable del dispatcher: los tests
//!   reconstruyen de ellos conteos de dispatch y concurrencia máxima sin
//!   instrumentar el loop.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tipos de eventos emitidos durante un run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEventKind {
    /// Emisión inicial de un run: fija el fingerprint del batch y el tamaño
    /// del grafo. Invariante: debe ser el primer evento de un `run_id`.
    RunInitialized { batch_fingerprint: String, task_count: usize },
    /// Task entregada a un worker (slot reservado). `attempt` es 1-indexed.
    TaskDispatched { task_id: String, attempt: u32 },
    /// Task terminó OK; su output quedó commiteado bajo `output`.
    TaskFinished { task_id: String, attempt: u32, output: String },
    /// Intento fallido (error del worker, crash o deadline excedido).
    /// `final_` marca presupuesto agotado o fallo de dependencia.
    TaskFailed {
        task_id: String,
        attempt: u32,
        error: String,
        final_: bool,
    },
    /// Reintento programado con backoff exponencial.
    RetryScheduled { task_id: String, attempt: u32, backoff_ms: u64 },
    /// Task satisfecha por cache: marcada succeeded sin dispatch.
    TaskSkippedByCache { task_id: String, output: String },
    /// Task cancelada antes de alcanzar estado terminal propio.
    TaskCancelled { task_id: String },
    /// Evento de cierre con el balance terminal del grafo.
    RunCompleted { succeeded: usize, failed: usize, cancelled: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64, // asignado por EventStore (orden append)
    pub run_id: Uuid,
    pub kind: RunEventKind,
    pub ts: DateTime<Utc>, // metadato (no entra en ningún fingerprint)
}
