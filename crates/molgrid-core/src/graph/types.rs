//! TaskGraph: DAG de tasks para un batch request.
//!
//! El grafo posee exclusivamente sus tasks durante el run; el único escritor
//! de transiciones de estado es el loop coordinador del dispatcher. Las
//! aristas solo apuntan a stages anteriores, así que el grafo es acíclico
//! por construcción.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Fingerprint, Task, TaskId};

/// Unidad lógica de entrada, neutral: clave estable + payload JSON. Los
/// adapters convierten registros de dominio a esta forma.
#[derive(Debug, Clone)]
pub struct RequestUnit {
    pub key: String,
    pub payload: Value,
}

/// Stage declarado por nombre + params JSON sin resolver.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub name: String,
    pub params: Value,
}

/// Batch request neutral que consume el builder. El orden de `units` es
/// significativo: define la membresía de shards.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub units: Vec<RequestUnit>,
    pub stages: Vec<StageRequest>,
    pub shard_size: usize,
}

pub struct TaskGraph {
    run_id: Uuid,
    batch_fp: Fingerprint,
    /// Orden de inserción determinista (por stage, luego por shard).
    tasks: IndexMap<TaskId, Task>,
    sinks: Vec<TaskId>,
    /// Dependientes directos por task (aristas invertidas).
    dependents: HashMap<TaskId, Vec<TaskId>>,
    /// Cantidad de descendientes transitivos por task; prioridad de
    /// scheduling (maximizar throughput del critical path).
    downstream: HashMap<TaskId, usize>,
}

impl TaskGraph {
    pub fn new(run_id: Uuid, batch_fp: Fingerprint, tasks: Vec<Task>, sinks: Vec<TaskId>) -> Self {
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for t in &tasks {
            for dep in &t.deps {
                dependents.entry(dep.clone()).or_default().push(t.id.clone());
            }
        }
        let mut graph = Self { run_id,
                               batch_fp,
                               tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
                               sinks,
                               dependents,
                               downstream: HashMap::new() };
        graph.downstream = graph.tasks
                                .keys()
                                .map(|id| (id.clone(), graph.dependents_closure(id).len()))
                                .collect();
        graph
    }

    pub fn run_id(&self) -> Uuid { self.run_id }
    pub fn batch_fp(&self) -> &Fingerprint { &self.batch_fp }
    pub fn len(&self) -> usize { self.tasks.len() }
    pub fn is_empty(&self) -> bool { self.tasks.is_empty() }
    pub fn sinks(&self) -> &[TaskId] { &self.sinks }

    pub fn task(&self, id: &TaskId) -> Option<&Task> { self.tasks.get(id) }
    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> { self.tasks.get_mut(id) }

    pub fn ids(&self) -> Vec<TaskId> { self.tasks.keys().cloned().collect() }
    pub fn iter(&self) -> impl Iterator<Item = &Task> { self.tasks.values() }

    pub fn downstream_count(&self, id: &TaskId) -> usize {
        self.downstream.get(id).copied().unwrap_or(0)
    }

    /// Clausura transitiva de dependientes (excluye la propia task). Es el
    /// alcance de propagación de un failed-final.
    pub fn dependents_closure(&self, id: &TaskId) -> Vec<TaskId> {
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut stack: Vec<TaskId> = self.dependents.get(id).cloned().unwrap_or_default();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                if let Some(more) = self.dependents.get(&next) {
                    stack.extend(more.iter().cloned());
                }
            }
        }
        let mut out: Vec<TaskId> = seen.into_iter().collect();
        out.sort();
        out
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }
}
