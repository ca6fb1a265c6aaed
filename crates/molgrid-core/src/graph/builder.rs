//! GraphBuilder: expansión determinista de un batch request al DAG de tasks.
//!
//! Todo fingerprint de salida se precomputa aquí, antes de ejecutar nada:
//! las decisiones de cache-skip no requieren cómputo. Reglas:
//! - shards asignados por orden estable de entrada (mismo request ⇒ misma
//!   membresía de shard, requisito para que los cache hits signifiquen algo
//!   entre runs);
//! - los registros crudos se siembran en la cache bajo su fingerprint de
//!   ingest (los featurize las referencian como entradas pre-existentes);
//! - tasks cuyo output ya está cacheado quedan pre-marcadas
//!   `Succeeded { by_cache: true }`;
//! - stage sin productor registrado, nombre desconocido, params inválidos o
//!   batch vacío ⇒ *MalformedRequest*.

use serde_json::json;
use uuid::Uuid;

use crate::cache::ArtifactCache;
use crate::constants::{ENGINE_VERSION, INGEST_STAGE};
use crate::errors::CoreError;
use crate::hashing::hash_value;
use crate::model::{Artifact, Fingerprint, Task, TaskFingerprintInput, TaskId, TaskStatus};
use crate::stage::{ExecutorRegistry, StageKind, StageParams};

use super::types::{GraphRequest, TaskGraph};

struct Shard {
    keys: Vec<String>,
    record_fps: Vec<Fingerprint>,
}

pub struct GraphBuilder<'a> {
    registry: &'a ExecutorRegistry,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a ExecutorRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, request: &GraphRequest, cache: &mut ArtifactCache) -> Result<TaskGraph, CoreError> {
        let stages = self.resolve_stages(request)?;
        if request.units.is_empty() {
            return Err(CoreError::MalformedRequest("batch has no input units".to_string()));
        }
        if request.shard_size == 0 {
            return Err(CoreError::MalformedRequest("shard_size must be >= 1".to_string()));
        }

        // Sembrar los registros crudos como entradas pre-existentes de cache.
        let mut record_fps: Vec<Fingerprint> = Vec::with_capacity(request.units.len());
        for unit in &request.units {
            let fp = Fingerprint::of_payload(INGEST_STAGE, &serde_json::Value::Null, &unit.payload);
            cache.put(Artifact::new(INGEST_STAGE, fp.clone(), unit.payload.clone()))?;
            record_fps.push(fp);
        }

        let batch_fp = batch_fingerprint(&record_fps, &stages, request.shard_size);
        let shards = make_shards(request, &record_fps);

        let mut tasks: Vec<Task> = Vec::new();
        // Referencias por shard al featurize y train más recientes, y al
        // checkpoint global si existe; gobiernan el cableado por kind.
        let mut featurize: Vec<(TaskId, Fingerprint)> = Vec::new();
        let mut train: Vec<(TaskId, Fingerprint)> = Vec::new();
        let mut model: Option<(TaskId, Fingerprint)> = None;
        let mut last_stage: Vec<TaskId> = Vec::new();

        for params in &stages {
            let kind = params.kind();
            last_stage.clear();
            match kind {
                StageKind::Featurize => {
                    for (i, shard) in shards.iter().enumerate() {
                        let task = make_task(kind, i, params, shard.keys.clone(),
                                             shard.record_fps.clone(), vec![], cache);
                        featurize.push((task.id.clone(), task.output_fp.clone()));
                        last_stage.push(task.id.clone());
                        tasks.push(task);
                    }
                }
                StageKind::TrainShard => {
                    if featurize.is_empty() {
                        return Err(CoreError::MalformedRequest(
                            "train-shard requires a featurize stage before it".to_string(),
                        ));
                    }
                    for (i, shard) in shards.iter().enumerate() {
                        let (dep, fp) = featurize[i].clone();
                        let task = make_task(kind, i, params, shard.keys.clone(), vec![fp], vec![dep], cache);
                        train.push((task.id.clone(), task.output_fp.clone()));
                        last_stage.push(task.id.clone());
                        tasks.push(task);
                    }
                }
                StageKind::AggregateModel => {
                    if train.is_empty() {
                        return Err(CoreError::MalformedRequest(
                            "aggregate-model requires a train-shard stage before it".to_string(),
                        ));
                    }
                    let deps: Vec<TaskId> = train.iter().map(|(id, _)| id.clone()).collect();
                    let inputs: Vec<Fingerprint> = train.iter().map(|(_, fp)| fp.clone()).collect();
                    let task = make_task(kind, 0, params, vec![], inputs, deps, cache);
                    model = Some((task.id.clone(), task.output_fp.clone()));
                    last_stage.push(task.id.clone());
                    tasks.push(task);
                }
                StageKind::Predict => {
                    if featurize.is_empty() {
                        return Err(CoreError::MalformedRequest(
                            "predict requires a featurize stage before it".to_string(),
                        ));
                    }
                    for (i, shard) in shards.iter().enumerate() {
                        let (feat_dep, feat_fp) = featurize[i].clone();
                        let mut deps = vec![feat_dep];
                        let mut inputs = vec![feat_fp];
                        if let Some((model_dep, model_fp)) = model.clone() {
                            deps.push(model_dep);
                            inputs.push(model_fp);
                        }
                        let task = make_task(kind, i, params, shard.keys.clone(), inputs, deps, cache);
                        last_stage.push(task.id.clone());
                        tasks.push(task);
                    }
                }
            }
        }

        let sinks = last_stage;
        Ok(TaskGraph::new(Uuid::new_v4(), batch_fp, tasks, sinks))
    }

    /// Resuelve y valida la lista de stages declarada. Kinds duplicados se
    /// rechazan (los ids de task dejarían de ser únicos) igual que un
    /// pipeline que no comienza featurizando.
    fn resolve_stages(&self, request: &GraphRequest) -> Result<Vec<StageParams>, CoreError> {
        if request.stages.is_empty() {
            return Err(CoreError::MalformedRequest("pipeline has no stages".to_string()));
        }
        let mut resolved: Vec<StageParams> = Vec::with_capacity(request.stages.len());
        for spec in &request.stages {
            let kind = StageKind::parse(&spec.name)?;
            if !self.registry.contains(kind) {
                return Err(CoreError::MalformedRequest(format!(
                    "no registered producer for stage '{}'",
                    kind.as_str()
                )));
            }
            if resolved.iter().any(|p| p.kind() == kind) {
                return Err(CoreError::MalformedRequest(format!(
                    "duplicate stage '{}' in pipeline",
                    kind.as_str()
                )));
            }
            resolved.push(StageParams::resolve(kind, &spec.params)?);
        }
        if resolved[0].kind() != StageKind::Featurize {
            return Err(CoreError::MalformedRequest(
                "pipeline must start with a featurize stage".to_string(),
            ));
        }
        Ok(resolved)
    }
}

fn make_shards(request: &GraphRequest, record_fps: &[Fingerprint]) -> Vec<Shard> {
    request.units
           .chunks(request.shard_size)
           .zip(record_fps.chunks(request.shard_size))
           .map(|(units, fps)| Shard { keys: units.iter().map(|u| u.key.clone()).collect(),
                                       record_fps: fps.to_vec() })
           .collect()
}

fn make_task(kind: StageKind,
             index: usize,
             params: &StageParams,
             unit_keys: Vec<String>,
             input_fps: Vec<Fingerprint>,
             deps: Vec<TaskId>,
             cache: &ArtifactCache)
             -> Task {
    let params_value = params.to_value();
    let mut sorted_inputs = input_fps.clone();
    sorted_inputs.sort();
    let output_fp = TaskFingerprintInput { engine_version: ENGINE_VERSION,
                                           stage: kind.as_str(),
                                           params: &params_value,
                                           input_fingerprints: &sorted_inputs,
                                           unit_keys: &unit_keys }.fingerprint();
    let status = if cache.contains(&output_fp) {
        TaskStatus::Succeeded { by_cache: true }
    } else {
        TaskStatus::Pending
    };
    Task { id: TaskId::new(kind, index),
           stage: kind,
           params: params.clone(),
           unit_keys,
           input_fps,
           output_fp,
           deps,
           attempts: 0,
           status,
           next_eligible_at: None }
}

fn batch_fingerprint(record_fps: &[Fingerprint], stages: &[StageParams], shard_size: usize) -> Fingerprint {
    let stages_value: Vec<serde_json::Value> = stages.iter()
                                                     .map(|p| json!({ "kind": p.kind().as_str(),
                                                                      "params": p.to_value() }))
                                                     .collect();
    Fingerprint::from_hex(hash_value(&json!({
        "engine_version": ENGINE_VERSION,
        "records": record_fps,
        "stages": stages_value,
        "shard_size": shard_size,
    })))
}

/// Fingerprint bajo el que se commitea el artifact agregado final: derivado
/// del fingerprint del batch completo + el stage de los sinks.
pub fn aggregate_fingerprint(batch_fp: &Fingerprint, sink_stage: StageKind) -> Fingerprint {
    Fingerprint::from_hex(hash_value(&json!({
        "engine_version": ENGINE_VERSION,
        "stage": crate::constants::AGGREGATE_STAGE,
        "batch": batch_fp,
        "sink_stage": sink_stage.as_str(),
    })))
}
