//! Stages del pipeline: conjunto cerrado y tipado.
//!
//! La configuración externa declara stages por nombre con params JSON libres;
//! aquí se resuelven a `StageKind` + `StageParams` tipados. Nombres o formas
//! desconocidos se rechazan en build-time (*MalformedRequest*), nunca en
//! dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CoreError;
use crate::model::{Artifact, CapacityClass, TaskId};

/// Conjunto cerrado de stages soportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Featurize,
    TrainShard,
    AggregateModel,
    Predict,
}

impl StageKind {
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        match name {
            "featurize" => Ok(StageKind::Featurize),
            "train-shard" => Ok(StageKind::TrainShard),
            "aggregate-model" => Ok(StageKind::AggregateModel),
            "predict" => Ok(StageKind::Predict),
            other => Err(CoreError::MalformedRequest(format!("unknown stage kind '{other}'"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Featurize => "featurize",
            StageKind::TrainShard => "train-shard",
            StageKind::AggregateModel => "aggregate-model",
            StageKind::Predict => "predict",
        }
    }

    /// Clase de slot que reservan las tasks del stage. El entrenamiento por
    /// shard es GPU-class; el resto corre en slots CPU.
    pub fn capacity_class(self) -> CapacityClass {
        match self {
            StageKind::TrainShard => CapacityClass::Gpu,
            _ => CapacityClass::Cpu,
        }
    }

    /// `true` para stages de reducción global (una sola task por batch, con
    /// dependencia sobre todas las tasks del stage anterior).
    pub fn is_global(self) -> bool {
        matches!(self, StageKind::AggregateModel)
    }
}

/// Parámetros tipados por stage. Los defaults son deterministas y entran al
/// fingerprint vía `to_value`, de modo que cambiar un default invalida la
/// cache igual que un override explícito.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageParams {
    Featurize(FeaturizeParams),
    TrainShard(TrainShardParams),
    AggregateModel(AggregateModelParams),
    Predict(PredictParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FeaturizeParams {
    pub max_atoms: usize,
    pub include_degree: bool,
}

impl Default for FeaturizeParams {
    fn default() -> Self { Self { max_atoms: 64, include_degree: true } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrainShardParams {
    pub learning_rate: f64,
    pub epochs: u32,
}

impl Default for TrainShardParams {
    fn default() -> Self { Self { learning_rate: 0.01, epochs: 1 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AggregateModelParams {
    pub strategy: String,
}

impl Default for AggregateModelParams {
    fn default() -> Self { Self { strategy: "mean".to_string() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PredictParams {
    pub threshold: f64,
}

impl Default for PredictParams {
    fn default() -> Self { Self { threshold: 0.5 } }
}

impl StageParams {
    /// Resuelve los params JSON declarados contra el record tipado del kind.
    /// `Null` toma los defaults; una forma inválida es *MalformedRequest*.
    pub fn resolve(kind: StageKind, raw: &Value) -> Result<Self, CoreError> {
        fn parse<T: Default + serde::de::DeserializeOwned>(kind: StageKind, raw: &Value) -> Result<T, CoreError> {
            if raw.is_null() {
                return Ok(T::default());
            }
            serde_json::from_value(raw.clone()).map_err(|e| {
                CoreError::MalformedRequest(format!("invalid params for stage '{}': {e}", kind.as_str()))
            })
        }
        Ok(match kind {
            StageKind::Featurize => StageParams::Featurize(parse(kind, raw)?),
            StageKind::TrainShard => StageParams::TrainShard(parse(kind, raw)?),
            StageKind::AggregateModel => StageParams::AggregateModel(parse(kind, raw)?),
            StageKind::Predict => StageParams::Predict(parse(kind, raw)?),
        })
    }

    pub fn kind(&self) -> StageKind {
        match self {
            StageParams::Featurize(_) => StageKind::Featurize,
            StageParams::TrainShard(_) => StageKind::TrainShard,
            StageParams::AggregateModel(_) => StageKind::AggregateModel,
            StageParams::Predict(_) => StageKind::Predict,
        }
    }

    /// Forma canonicalizable para fingerprints.
    pub fn to_value(&self) -> Value {
        match self {
            StageParams::Featurize(p) => serde_json::to_value(p),
            StageParams::TrainShard(p) => serde_json::to_value(p),
            StageParams::AggregateModel(p) => serde_json::to_value(p),
            StageParams::Predict(p) => serde_json::to_value(p),
        }
        .expect("stage params are always serializable")
    }
}

/// Contexto de ejecución que recibe un executor: inputs resueltos desde la
/// cache (en el orden de `input_fps`) + params tipados.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub task_id: TaskId,
    pub params: StageParams,
    pub unit_keys: Vec<String>,
    pub inputs: Vec<Artifact>,
}

/// Seam de cómputo. Implementaciones deben ser puras respecto a
/// inputs + params: mismo contexto ⇒ mismo payload (los re-cómputos por
/// carrera se deduplican vía `put` idempotente).
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> StageKind;
    fn execute(&self, ctx: &StageContext) -> Result<Value, CoreError>;
}

/// Registro de executors por stage kind. El builder rechaza stages sin
/// productor registrado.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    inner: HashMap<StageKind, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) {
        self.inner.insert(executor.stage(), executor);
    }

    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn StageExecutor>> {
        self.inner.get(&kind).cloned()
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.inner.contains_key(&kind)
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
         .field("stages", &self.inner.keys().map(|k| k.as_str()).collect::<Vec<_>>())
         .finish()
    }
}
