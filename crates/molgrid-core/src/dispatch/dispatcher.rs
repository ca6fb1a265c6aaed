//! Loop coordinador del dispatcher.
//!
//! Modelo de concurrencia: un único loop es el escritor exclusivo de
//! transiciones de estado del grafo (sin locks sobre la estructura). Los
//! workers reportan completions asíncronas por un canal mpsc acotado; el
//! loop bloquea solo esperando al menos una completion pendiente, un timer
//! de retry o una cancelación, y reevalúa readiness del grafo completo en
//! cada despertar (re-scheduling dirigido por eventos, no polling por task).
//!
//! Política de scheduling: entre tasks ready, primero la que desbloquea más
//! tasks aguas abajo (descendientes transitivos); empates por orden de
//! `TaskId` para determinismo.
//!
//! Fallos: un intento fallido (error del worker o deadline excedido) se
//! reencola con backoff exponencial hasta `max_attempts`; agotado el
//! presupuesto la task pasa a failed-final y cada descendiente transitivo se
//! marca failed-final sin dispatch. El fallo queda acotado a la clausura de
//! dependencia: subgrafos hermanos siguen ejecutando.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cache::ArtifactCache;
use crate::errors::CoreError;
use crate::event::{EventStore, RunEventKind};
use crate::graph::TaskGraph;
use crate::model::{Artifact, CapacityClass, TaskId, TaskStatus};

use super::pool::{TaskCompletion, TaskEnvelope, TaskOutcome, WorkerPool};
use super::slots::SlotTable;

/// Canal acotado por el que los workers reportan completions al loop.
pub fn completion_channel(buffer: usize) -> (mpsc::Sender<TaskCompletion>, mpsc::Receiver<TaskCompletion>) {
    mpsc::channel(buffer)
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Intentos máximos por task (1 = sin reintentos).
    pub max_attempts: u32,
    /// Base del backoff exponencial entre intentos.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Deadline wall-clock de cada intento despachado.
    pub task_deadline: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_attempts: 3,
               backoff_base: Duration::from_millis(50),
               backoff_cap: Duration::from_secs(5),
               task_deadline: Duration::from_secs(30) }
    }
}

/// Token de cancelación de un batch. Clonable; `cancel` es idempotente
/// (cancelar un grafo ya terminal es no-op).
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

/// Balance terminal de un run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub dispatched: usize,
    pub cache_hits: usize,
    pub succeeded: usize,
    pub failed: Vec<TaskId>,
    pub cancelled: usize,
    /// Máximo de tasks simultáneamente en vuelo observado.
    pub max_in_flight: usize,
}

struct InFlight {
    attempt: u32,
    class: CapacityClass,
}

pub struct Dispatcher<P, E>
    where P: WorkerPool,
          E: EventStore
{
    pool: P,
    events: E,
    config: DispatcherConfig,
    completions: mpsc::Receiver<TaskCompletion>,
    cancel: CancelToken,
}

impl<P, E> Dispatcher<P, E>
    where P: WorkerPool,
          E: EventStore
{
    pub fn new(pool: P, events: E, config: DispatcherConfig, completions: mpsc::Receiver<TaskCompletion>) -> Self {
        Self { pool, events, config, completions, cancel: CancelToken::new() }
    }

    /// Token para cancelar el run en curso desde fuera del loop.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn event_store(&self) -> &E {
        &self.events
    }

    /// Ejecuta el grafo hasta que toda task alcance exactamente un estado
    /// terminal (o el batch sea cancelado). Termina para cualquier DAG: cada
    /// despertar del loop o bien despacha, o bien consume una completion, o
    /// bien espera un retry programado; nada queda sin resolución.
    pub async fn run(&mut self, graph: &mut TaskGraph, cache: &mut ArtifactCache) -> Result<RunReport, CoreError> {
        self.check_capacity(graph)?;
        let run_id = graph.run_id();
        let mut report = RunReport::default();
        self.append(run_id,
                    RunEventKind::RunInitialized { batch_fingerprint: graph.batch_fp().to_string(),
                                                   task_count: graph.len() });

        // Tasks pre-marcadas por el builder (output ya cacheado en build).
        for id in graph.ids() {
            if let Some(t) = graph.task(&id) {
                if t.status == (TaskStatus::Succeeded { by_cache: true }) {
                    let output = t.output_fp.to_string();
                    report.cache_hits += 1;
                    self.append(run_id, RunEventKind::TaskSkippedByCache { task_id: id.to_string(), output });
                }
            }
        }

        // Pins de por vida de task: cada input queda protegido de eviction
        // hasta que su consumidor alcance estado terminal. Los outputs de los
        // sinks quedan pinneados para el aggregator, que los libera al leer.
        for id in graph.ids() {
            let Some(t) = graph.task(&id) else { continue };
            if !t.status.is_terminal() {
                for fp in &t.input_fps {
                    cache.pin(fp);
                }
            }
        }
        for sink in graph.sinks() {
            if let Some(t) = graph.task(sink) {
                cache.pin(&t.output_fp);
            }
        }

        let mut slots = SlotTable::new(&[(CapacityClass::Cpu, self.pool.capacity(CapacityClass::Cpu)),
                                         (CapacityClass::Gpu, self.pool.capacity(CapacityClass::Gpu))]);
        let mut in_flight: HashMap<TaskId, InFlight> = HashMap::new();

        loop {
            if self.cancel.is_cancelled() {
                self.cancel_remaining(graph, cache, &mut slots, &mut in_flight);
                break;
            }

            self.settle(graph, cache, &mut report);
            self.dispatch_ready(graph, cache, &mut slots, &mut in_flight, &mut report).await?;

            if graph.all_terminal() {
                break;
            }

            let next_retry: Option<Instant> = graph.iter()
                                                   .filter(|t| t.status == TaskStatus::Ready)
                                                   .filter_map(|t| t.next_eligible_at)
                                                   .min();
            if in_flight.is_empty() && next_retry.is_none() {
                return Err(CoreError::Internal(
                    "dispatcher stalled: non-terminal tasks but nothing runnable".to_string(),
                ));
            }

            let cancel = self.cancel.clone();
            let mut received: Option<TaskCompletion> = None;
            let mut channel_closed = false;
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = async {
                    match next_retry {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
                maybe = self.completions.recv(), if !in_flight.is_empty() => {
                    match maybe {
                        Some(c) => received = Some(c),
                        None => channel_closed = true,
                    }
                }
            }
            if channel_closed {
                return Err(CoreError::Internal("completion channel closed with work in flight".to_string()));
            }
            if let Some(completion) = received {
                self.handle_completion(completion, graph, cache, &mut slots, &mut in_flight)?;
            }
        }

        for t in graph.iter() {
            match t.status {
                TaskStatus::Succeeded { .. } => report.succeeded += 1,
                TaskStatus::FailedFinal => report.failed.push(t.id.clone()),
                TaskStatus::Cancelled => report.cancelled += 1,
                _ => {}
            }
        }
        report.failed.sort();
        self.append(run_id,
                    RunEventKind::RunCompleted { succeeded: report.succeeded,
                                                 failed: report.failed.len(),
                                                 cancelled: report.cancelled });
        info!(run_id = %run_id, succeeded = report.succeeded, failed = report.failed.len(),
              cancelled = report.cancelled, dispatched = report.dispatched, "run completed");
        Ok(report)
    }

    /// Toda clase de capacidad requerida por el grafo debe existir en el
    /// pool; de otro modo el run se estancaría en vez de fallar rápido.
    fn check_capacity(&self, graph: &TaskGraph) -> Result<(), CoreError> {
        let classes: HashSet<CapacityClass> = graph.iter().map(|t| t.capacity_class()).collect();
        for class in classes {
            if self.pool.capacity(class) == 0 {
                return Err(CoreError::MalformedRequest(format!("worker pool has no {class:?} capacity")));
            }
        }
        Ok(())
    }

    /// Reevaluación de readiness hasta punto fijo:
    /// - output ya en cache ⇒ succeeded-by-cache sin dispatch;
    /// - dependencias todas succeeded ⇒ ready;
    /// - alguna dependencia failed-final/cancelled ⇒ failed-final.
    fn settle(&mut self, graph: &mut TaskGraph, cache: &mut ArtifactCache, report: &mut RunReport) {
        let run_id = graph.run_id();
        let mut changed = true;
        while changed {
            changed = false;
            for id in graph.ids() {
                let Some(task) = graph.task(&id) else { continue };
                if !matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
                    continue;
                }
                if cache.contains(&task.output_fp) {
                    let output = task.output_fp.to_string();
                    if let Some(t) = graph.task_mut(&id) {
                        t.status = TaskStatus::Succeeded { by_cache: true };
                        t.next_eligible_at = None;
                    }
                    release_inputs(graph, cache, &id);
                    report.cache_hits += 1;
                    self.append(run_id, RunEventKind::TaskSkippedByCache { task_id: id.to_string(), output });
                    changed = true;
                    continue;
                }
                if task.status != TaskStatus::Pending {
                    continue;
                }
                let dep_statuses: Vec<TaskStatus> =
                    task.deps.iter().filter_map(|d| graph.task(d).map(|t| t.status)).collect();
                if dep_statuses.iter().any(|s| matches!(s, TaskStatus::FailedFinal | TaskStatus::Cancelled)) {
                    self.fail_final(graph, cache, &id, "dependency failed".to_string());
                    changed = true;
                } else if dep_statuses.iter().all(|s| s.is_succeeded()) {
                    if let Some(t) = graph.task_mut(&id) {
                        t.status = TaskStatus::Ready;
                    }
                    changed = true;
                }
            }
        }
    }

    /// Despacha tasks ready elegibles mientras haya slot de su clase libre.
    async fn dispatch_ready(&mut self,
                            graph: &mut TaskGraph,
                            cache: &mut ArtifactCache,
                            slots: &mut SlotTable,
                            in_flight: &mut HashMap<TaskId, InFlight>,
                            report: &mut RunReport)
                            -> Result<(), CoreError> {
        let run_id = graph.run_id();
        let now = Instant::now();
        let mut candidates: Vec<(usize, TaskId)> = graph.iter()
                                                        .filter(|t| t.is_retry_eligible(now))
                                                        .map(|t| (graph.downstream_count(&t.id), t.id.clone()))
                                                        .collect();
        // más descendientes primero; empate por id para determinismo
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (_, id) in candidates {
            let Some(task) = graph.task(&id) else { continue };
            let class = task.capacity_class();
            if !slots.acquire(class) {
                continue;
            }

            // Los inputs están pinneados desde el arranque del run, así que
            // un miss aquí es violación de invariante, no una eviction.
            let mut inputs: Vec<Artifact> = Vec::with_capacity(task.input_fps.len());
            let input_fps = task.input_fps.clone();
            let mut missing = None;
            for fp in &input_fps {
                match cache.get(fp) {
                    Some(a) => inputs.push(a.clone()),
                    None => {
                        missing = Some(fp.clone());
                        break;
                    }
                }
            }
            if let Some(fp) = missing {
                slots.release(class);
                return Err(CoreError::Internal(format!("missing input artifact {fp} for task {id}")));
            }

            let (attempt, envelope) = {
                let t = graph.task_mut(&id).expect("candidate task exists");
                t.attempts += 1;
                t.status = TaskStatus::Dispatched;
                t.next_eligible_at = None;
                (t.attempts,
                 TaskEnvelope { task_id: t.id.clone(),
                                attempt: t.attempts,
                                stage: t.stage,
                                params: t.params.clone(),
                                unit_keys: t.unit_keys.clone(),
                                inputs,
                                deadline: self.config.task_deadline })
            };

            in_flight.insert(id.clone(), InFlight { attempt, class });
            report.dispatched += 1;
            report.max_in_flight = report.max_in_flight.max(in_flight.len());
            self.append(run_id, RunEventKind::TaskDispatched { task_id: id.to_string(), attempt });
            debug!(task_id = %id, attempt, "dispatched");
            self.pool.submit(envelope).await?;
        }
        Ok(())
    }

    fn handle_completion(&mut self,
                         completion: TaskCompletion,
                         graph: &mut TaskGraph,
                         cache: &mut ArtifactCache,
                         slots: &mut SlotTable,
                         in_flight: &mut HashMap<TaskId, InFlight>)
                         -> Result<(), CoreError> {
        let run_id = graph.run_id();
        let id = completion.task_id.clone();

        // Protección contra workers obsoletos: reportes de intentos viejos o
        // de tasks ya resueltas se descartan sin tocar estado.
        let stale = in_flight.get(&id).map_or(true, |e| e.attempt != completion.attempt);
        if stale {
            debug!(task_id = %id, attempt = completion.attempt, "stale completion ignored");
            return Ok(());
        }
        let entry = in_flight.remove(&id).expect("checked above");
        slots.release(entry.class);

        let (stage, output_fp, attempts) = {
            let t = graph.task(&id)
                         .ok_or_else(|| CoreError::Internal(format!("unknown task {id} completed")))?;
            (t.stage, t.output_fp.clone(), t.attempts)
        };

        match completion.outcome {
            TaskOutcome::Success(payload) => {
                let artifact = Artifact::new(stage.as_str(), output_fp.clone(), payload);
                match cache.put(artifact) {
                    Ok(_) => {
                        if let Some(t) = graph.task_mut(&id) {
                            t.status = TaskStatus::Succeeded { by_cache: false };
                        }
                        release_inputs(graph, cache, &id);
                        self.append(run_id,
                                    RunEventKind::TaskFinished { task_id: id.to_string(),
                                                                 attempt: completion.attempt,
                                                                 output: output_fp.to_string() });
                    }
                    Err(CoreError::Conflict { fingerprint }) => {
                        // Bug de fingerprinting: fatal para el write, el
                        // original se retiene y la task no se reintenta.
                        error!(task_id = %id, fingerprint = %fingerprint, "commit rejected by cache conflict");
                        self.fail_final(graph, cache, &id, format!("cache conflict for {fingerprint}"));
                    }
                    Err(e) => return Err(e),
                }
                cache.evict_to_budget();
            }
            TaskOutcome::Error(_) | TaskOutcome::TimedOut => {
                let reason = match completion.outcome {
                    TaskOutcome::TimedOut => "deadline exceeded".to_string(),
                    TaskOutcome::Error(r) => r,
                    TaskOutcome::Success(_) => unreachable!(),
                };
                if let Some(t) = graph.task_mut(&id) {
                    t.status = TaskStatus::Failed;
                }
                self.append(run_id,
                            RunEventKind::TaskFailed { task_id: id.to_string(),
                                                       attempt: completion.attempt,
                                                       error: reason.clone(),
                                                       final_: false });
                if attempts < self.config.max_attempts {
                    let backoff = backoff_delay(self.config.backoff_base, attempts, self.config.backoff_cap);
                    if let Some(t) = graph.task_mut(&id) {
                        t.status = TaskStatus::Ready;
                        t.next_eligible_at = Some(Instant::now() + backoff);
                    }
                    self.append(run_id,
                                RunEventKind::RetryScheduled { task_id: id.to_string(),
                                                               attempt: attempts,
                                                               backoff_ms: backoff.as_millis() as u64 });
                } else {
                    self.fail_final(graph, cache, &id, reason);
                }
            }
        }
        Ok(())
    }

    /// Marca la task failed-final y propaga transitivamente a toda su
    /// clausura de dependientes, sin despachar trabajo inalcanzable.
    fn fail_final(&mut self, graph: &mut TaskGraph, cache: &mut ArtifactCache, id: &TaskId, reason: String) {
        let run_id = graph.run_id();
        if let Some(t) = graph.task_mut(id) {
            if t.status.is_terminal() {
                return;
            }
            t.status = TaskStatus::FailedFinal;
            t.next_eligible_at = None;
        }
        release_inputs(graph, cache, id);
        self.append(run_id,
                    RunEventKind::TaskFailed { task_id: id.to_string(),
                                               attempt: graph.task(id).map_or(0, |t| t.attempts),
                                               error: reason.clone(),
                                               final_: true });
        for dep_id in graph.dependents_closure(id) {
            let Some(t) = graph.task_mut(&dep_id) else { continue };
            if t.status.is_terminal() {
                continue;
            }
            t.status = TaskStatus::FailedFinal;
            t.next_eligible_at = None;
            release_inputs(graph, cache, &dep_id);
            self.append(run_id,
                        RunEventKind::TaskFailed { task_id: dep_id.to_string(),
                                                   attempt: 0,
                                                   error: format!("dependency {id} failed"),
                                                   final_: true });
        }
    }

    /// Cancela todo lo no-terminal y libera los slots en vuelo. Idempotente:
    /// sobre un grafo ya terminal no toca nada.
    fn cancel_remaining(&mut self,
                        graph: &mut TaskGraph,
                        cache: &mut ArtifactCache,
                        slots: &mut SlotTable,
                        in_flight: &mut HashMap<TaskId, InFlight>) {
        let run_id = graph.run_id();
        for (_, entry) in in_flight.drain() {
            slots.release(entry.class);
        }
        for id in graph.ids() {
            let Some(t) = graph.task_mut(&id) else { continue };
            if t.status.is_terminal() {
                continue;
            }
            t.status = TaskStatus::Cancelled;
            t.next_eligible_at = None;
            release_inputs(graph, cache, &id);
            self.append(run_id, RunEventKind::TaskCancelled { task_id: id.to_string() });
        }
    }

    fn append(&mut self, run_id: Uuid, kind: RunEventKind) {
        let _ = self.events.append_kind(run_id, kind);
    }
}

/// Libera los pins de input de una task que acaba de alcanzar estado
/// terminal; sus inputs vuelven a ser elegibles para eviction.
fn release_inputs(graph: &TaskGraph, cache: &mut ArtifactCache, id: &TaskId) {
    if let Some(t) = graph.task(id) {
        for fp in &t.input_fps {
            cache.unpin(fp);
        }
    }
}

/// Backoff exponencial: `base * 2^(intento-1)`, acotado por `cap`.
fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(50);
        let cap = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 1, cap), Duration::from_millis(50));
        assert_eq!(backoff_delay(base, 2, cap), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3, cap), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 30, cap), cap);
    }

    #[test]
    fn cancel_token_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
