//! Soporte común de tests de integración: generación de batches de prueba y
//! un pool scripteado con completions síncronas y deterministas.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use molgrid_adapters::{default_registry, DomainRequestEncoder, SimpleRequestEncoder};
use molgrid_core::{completion_channel, ArtifactCache, CapacityClass, CoreError, Dispatcher, DispatcherConfig,
                   EventStore, ExecutorRegistry, GraphBuilder, GraphRequest, RunEvent, RunReport, StageContext,
                   TaskCompletion, TaskEnvelope, TaskGraph, TaskOutcome, WorkerPool};
use molgrid_domain::{BatchRequest, MoleculeRecord, PipelineConfig, StageSpec};
use tokio::sync::mpsc;

const SMILES_POOL: [&str; 5] = ["CCO", "c1ccccc1", "CC(=O)C", "CO", "CC(N)C(=O)O"];

/// Batch sintético de `n` registros válidos con claves estables.
pub fn batch(n: usize, stages: Vec<StageSpec>, shard_size: usize) -> BatchRequest {
    let records: Vec<MoleculeRecord> =
        (0..n).map(|i| {
                  let inchikey = format!("AAAAAAAAAAAA{i:02}-UHFFFAOYSA-N");
                  MoleculeRecord::new(&inchikey, SMILES_POOL[i % SMILES_POOL.len()], json!({ "i": i }))
                      .expect("test record is valid")
              })
              .collect();
    let pipeline = PipelineConfig::new(stages, shard_size).expect("test pipeline is valid");
    BatchRequest::new(records, pipeline).expect("test batch is valid")
}

pub fn request(n: usize, stages: Vec<StageSpec>, shard_size: usize) -> GraphRequest {
    SimpleRequestEncoder.encode_batch(&batch(n, stages, shard_size))
}

/// Pool scripteado: ejecuta los executors en línea y reporta la completion
/// de inmediato. Una task objetivo puede fallar con timeout un número fijo
/// de veces antes de comportarse normal (simula deadline excedido /
/// worker inalcanzable).
pub struct ScriptedPool {
    registry: Arc<ExecutorRegistry>,
    completions: mpsc::Sender<TaskCompletion>,
    cpu_slots: usize,
    gpu_slots: usize,
    timeout_target: Option<(String, u32)>,
    attempts_seen: Mutex<HashMap<String, u32>>,
}

impl ScriptedPool {
    pub fn new(registry: Arc<ExecutorRegistry>,
               completions: mpsc::Sender<TaskCompletion>,
               cpu_slots: usize,
               gpu_slots: usize)
               -> Self {
        Self { registry,
               completions,
               cpu_slots,
               gpu_slots,
               timeout_target: None,
               attempts_seen: Mutex::new(HashMap::new()) }
    }

    /// La task `task_id` reporta `TimedOut` en sus primeros `times` intentos.
    pub fn with_timeouts(mut self, task_id: &str, times: u32) -> Self {
        self.timeout_target = Some((task_id.to_string(), times));
        self
    }
}

#[async_trait]
impl WorkerPool for ScriptedPool {
    fn capacity(&self, class: CapacityClass) -> usize {
        match class {
            CapacityClass::Cpu => self.cpu_slots,
            CapacityClass::Gpu => self.gpu_slots,
        }
    }

    async fn submit(&self, envelope: TaskEnvelope) -> Result<(), CoreError> {
        let id = envelope.task_id.to_string();
        let should_timeout = match &self.timeout_target {
            Some((target, times)) if *target == id => {
                let mut seen = self.attempts_seen.lock().unwrap();
                let count = seen.entry(id.clone()).or_insert(0);
                *count += 1;
                *count <= *times
            }
            _ => false,
        };

        let outcome = if should_timeout {
            TaskOutcome::TimedOut
        } else {
            let executor = self.registry
                               .get(envelope.stage)
                               .ok_or_else(|| CoreError::Internal("unregistered stage".to_string()))?;
            let ctx = StageContext { task_id: envelope.task_id.clone(),
                                     params: envelope.params.clone(),
                                     unit_keys: envelope.unit_keys.clone(),
                                     inputs: envelope.inputs.clone() };
            match executor.execute(&ctx) {
                Ok(payload) => TaskOutcome::Success(payload),
                Err(e) => TaskOutcome::Error(e.to_string()),
            }
        };

        self.completions
            .send(TaskCompletion { task_id: envelope.task_id, attempt: envelope.attempt, outcome })
            .await
            .map_err(|_| CoreError::Internal("completion channel closed".to_string()))
    }
}

/// Parámetros de un run de prueba sobre el pool scripteado.
pub struct RunSetup {
    pub cpu_slots: usize,
    pub gpu_slots: usize,
    /// `(task_id, veces)` que debe reportar timeout antes de ejecutar.
    pub timeouts: Option<(String, u32)>,
    pub config: DispatcherConfig,
}

impl Default for RunSetup {
    fn default() -> Self {
        Self { cpu_slots: 4,
               gpu_slots: 1,
               timeouts: None,
               config: DispatcherConfig { max_attempts: 3,
                                          backoff_base: Duration::from_millis(1),
                                          backoff_cap: Duration::from_millis(10),
                                          task_deadline: Duration::from_secs(5) } }
    }
}

/// Construye el grafo desde `request`, lo corre contra un `ScriptedPool` y
/// devuelve el grafo terminal, el balance del run y sus eventos.
pub async fn run_graph(request: &GraphRequest,
                       cache: &mut ArtifactCache,
                       setup: RunSetup)
                       -> Result<(TaskGraph, RunReport, Vec<RunEvent>), CoreError> {
    let registry = Arc::new(default_registry());
    let mut graph = GraphBuilder::new(&registry).build(request, cache)?;

    let (tx, rx) = completion_channel(64);
    let mut pool = ScriptedPool::new(registry, tx, setup.cpu_slots, setup.gpu_slots);
    if let Some((task_id, times)) = &setup.timeouts {
        pool = pool.with_timeouts(task_id, *times);
    }
    let mut dispatcher = Dispatcher::new(pool, molgrid_core::InMemoryEventStore::default(), setup.config, rx);
    let report = dispatcher.run(&mut graph, cache).await?;
    let events = dispatcher.event_store().list(graph.run_id());
    Ok((graph, report, events))
}

/// Concurrencia máxima reconstruida del log de eventos: +1 por dispatch,
/// -1 por finished o failed del intento en vuelo. Solo considera tasks cuyo
/// id comience con `prefix`.
pub fn replay_max_concurrency(events: &[RunEvent], prefix: &str) -> usize {
    use molgrid_core::RunEventKind;
    let mut current: isize = 0;
    let mut max: isize = 0;
    for ev in events {
        match &ev.kind {
            RunEventKind::TaskDispatched { task_id, .. } if task_id.starts_with(prefix) => {
                current += 1;
                max = max.max(current);
            }
            RunEventKind::TaskFinished { task_id, .. } if task_id.starts_with(prefix) => current -= 1,
            // solo el reporte del intento en vuelo; los final_ de propagación
            // no corresponden a ningún dispatch
            RunEventKind::TaskFailed { task_id, final_: false, .. } if task_id.starts_with(prefix) => {
                current -= 1;
            }
            _ => {}
        }
    }
    max.max(0) as usize
}
