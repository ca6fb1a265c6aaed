//! Contrato de submission hacia el pool de workers.
//!
//! El transporte concreto (pool local de procesos tokio vs. job queue
//! remota) es un colaborador externo detrás de `WorkerPool`: "submit task,
//! recibir completion o failure, consultar capacidad". Las completions
//! llegan asíncronas por el canal acotado que posee el dispatcher; el sobre
//! lleva el número de intento para descartar reportes de workers obsoletos.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::CoreError;
use crate::model::{Artifact, CapacityClass, TaskId};
use crate::stage::{StageKind, StageParams};

/// Sobre de dispatch entregado a un worker. Los inputs van resueltos (la
/// cache no cruza el borde del pool) y `deadline` es el límite wall-clock
/// del intento.
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub attempt: u32,
    pub stage: StageKind,
    pub params: StageParams,
    pub unit_keys: Vec<String>,
    pub inputs: Vec<Artifact>,
    pub deadline: Duration,
}

/// Resultado crudo de un intento, reportado por el worker.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success(Value),
    /// Fallo transitorio del worker (raise, crash, inalcanzable).
    Error(String),
    /// Deadline excedido: tratado idéntico a worker inalcanzable.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub task_id: TaskId,
    pub attempt: u32,
    pub outcome: TaskOutcome,
}

/// Abstracción del pool de cómputo.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Slots disponibles para una clase de capacidad. El dispatcher acota su
    /// tabla de slots con esto: nunca hay más tasks en vuelo por clase.
    fn capacity(&self, class: CapacityClass) -> usize;

    /// Entrega un intento al pool. La completion llega después por el canal;
    /// un `Err` aquí es fallo de submission (no consume intento de la task).
    async fn submit(&self, envelope: TaskEnvelope) -> Result<(), CoreError>;
}
