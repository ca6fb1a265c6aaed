//! Task: unidad de trabajo del grafo.
//!
//! Las transiciones válidas de estado son:
//! - `Pending` -> `Ready` (todas las dependencias satisfechas)
//! - `Ready` -> `Dispatched`
//! - `Dispatched` -> `Succeeded` | `Failed`
//! - `Failed` -> `Ready` (quedan intentos; lleva `next_eligible_at` con el
//!   backoff exponencial) | `FailedFinal` (presupuesto agotado)
//! - cualquier no-terminal -> `Cancelled`
//!
//! No se permiten reversiones desde estados terminales. El único escritor de
//! transiciones es el loop coordinador del dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::Fingerprint;
use crate::stage::{StageKind, StageParams};

/// Identificador determinista de task (`{stage}-{índice:04}`); el orden
/// lexicográfico es el desempate de scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(stage: StageKind, index: usize) -> Self {
        Self(format!("{}-{:04}", stage.as_str(), index))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clase de capacidad que una task reserva en el pool de workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapacityClass {
    Cpu,
    Gpu,
}

/// Estado de una task en tiempo de ejecución.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Dependencias aún no satisfechas.
    Pending,
    /// Todas las dependencias satisfechas; elegible para dispatch.
    Ready,
    /// En vuelo en un worker, con slot reservado.
    Dispatched,
    /// Terminal OK. `by_cache` marca éxito sin dispatch (output ya cacheado).
    Succeeded { by_cache: bool },
    /// Fallo transitorio del intento en curso; el loop lo reencola a `Ready`
    /// o lo promueve a `FailedFinal` de inmediato.
    Failed,
    /// Terminal: presupuesto de reintentos agotado o dependencia fallida.
    FailedFinal,
    /// Terminal: batch cancelado antes de completar.
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. } | TaskStatus::FailedFinal | TaskStatus::Cancelled)
    }

    pub fn is_succeeded(self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. })
    }
}

/// Unidad de trabajo con sus aristas de dependencia expresadas dos veces:
/// por task (`deps`, gobierna readiness) y por fingerprint (`input_fps`,
/// gobierna la resolución de inputs contra la cache).
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub stage: StageKind,
    pub params: StageParams,
    /// Claves de los registros del shard, en orden estable de entrada.
    pub unit_keys: Vec<String>,
    /// Fingerprints de inputs: outputs de ancestros o entradas pre-cacheadas.
    pub input_fps: Vec<Fingerprint>,
    /// Fingerprint de salida, precomputado en build (permite cache-skip sin
    /// ejecutar nada).
    pub output_fp: Fingerprint,
    pub deps: Vec<TaskId>,
    pub attempts: u32,
    pub status: TaskStatus,
    /// Instante mínimo para el próximo intento (backoff). `None` = elegible.
    pub next_eligible_at: Option<Instant>,
}

impl Task {
    pub fn capacity_class(&self) -> CapacityClass {
        self.stage.capacity_class()
    }

    pub fn is_retry_eligible(&self, now: Instant) -> bool {
        self.status == TaskStatus::Ready && self.next_eligible_at.map_or(true, |t| t <= now)
    }
}
