//! Pool local: ejecuta executors registrados en tasks tokio del mismo
//! proceso. Es la implementación de referencia del seam `WorkerPool`; una
//! job queue remota implementaría el mismo trait reportando por el mismo
//! canal de completions.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::errors::CoreError;
use crate::model::CapacityClass;
use crate::stage::{ExecutorRegistry, StageContext};

use super::pool::{TaskCompletion, TaskEnvelope, TaskOutcome, WorkerPool};

pub struct LocalWorkerPool {
    registry: Arc<ExecutorRegistry>,
    completions: mpsc::Sender<TaskCompletion>,
    cpu_slots: usize,
    gpu_slots: usize,
}

impl LocalWorkerPool {
    pub fn new(registry: Arc<ExecutorRegistry>,
               completions: mpsc::Sender<TaskCompletion>,
               cpu_slots: usize,
               gpu_slots: usize)
               -> Self {
        Self { registry, completions, cpu_slots, gpu_slots }
    }
}

#[async_trait]
impl WorkerPool for LocalWorkerPool {
    fn capacity(&self, class: CapacityClass) -> usize {
        match class {
            CapacityClass::Cpu => self.cpu_slots,
            CapacityClass::Gpu => self.gpu_slots,
        }
    }

    async fn submit(&self, envelope: TaskEnvelope) -> Result<(), CoreError> {
        let executor = self.registry
                           .get(envelope.stage)
                           .ok_or_else(|| CoreError::Internal(format!("no executor for stage '{}'",
                                                                      envelope.stage.as_str())))?;
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let task_id = envelope.task_id.clone();
            let attempt = envelope.attempt;
            let deadline = envelope.deadline;
            let ctx = StageContext { task_id: envelope.task_id,
                                     params: envelope.params,
                                     unit_keys: envelope.unit_keys,
                                     inputs: envelope.inputs };
            let work = tokio::task::spawn_blocking(move || executor.execute(&ctx));
            let outcome = match tokio::time::timeout(deadline, work).await {
                Err(_) => TaskOutcome::TimedOut,
                Ok(Err(join_err)) => TaskOutcome::Error(format!("worker crashed: {join_err}")),
                Ok(Ok(Err(exec_err))) => TaskOutcome::Error(exec_err.to_string()),
                Ok(Ok(Ok(payload))) => TaskOutcome::Success(payload),
            };
            if completions.send(TaskCompletion { task_id: task_id.clone(), attempt, outcome })
                          .await
                          .is_err()
            {
                // Run cancelado o dispatcher caído: no hay a quién reportar.
                warn!(task_id = %task_id, "completion channel closed, dropping result");
            }
        });
        Ok(())
    }
}
