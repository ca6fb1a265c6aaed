//! Result Aggregator: reduce los outputs de los sinks del grafo en un único
//! artifact commiteado bajo un fingerprint derivado del batch completo.
//!
//! La reducción es insensible al orden: los sinks se procesan ordenados por
//! fingerprint de output y los items combinados se ordenan por clave de
//! registro, así un re-run cálido reproduce un payload byte-idéntico.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::cache::ArtifactCache;
use crate::constants::AGGREGATE_STAGE;
use crate::errors::CoreError;
use crate::graph::{aggregate_fingerprint, TaskGraph};
use crate::model::{Artifact, TaskStatus};
use crate::stage::StageKind;

/// Combina los sinks terminales del grafo. Si algún sink quedó failed-final
/// o cancelled, falla con *IncompleteResult* nombrando el subconjunto exacto
/// de tasks fallidas (la clausura completa, para diagnóstico).
pub fn aggregate(graph: &TaskGraph, cache: &mut ArtifactCache) -> Result<Artifact, CoreError> {
    if graph.sinks().is_empty() {
        return Err(CoreError::Internal("graph has no sink tasks".to_string()));
    }
    for sink in graph.sinks() {
        let t = graph.task(sink)
                     .ok_or_else(|| CoreError::Internal(format!("unknown sink task {sink}")))?;
        if !t.status.is_terminal() {
            return Err(CoreError::Internal(format!("sink task {sink} is not terminal")));
        }
    }

    // El dispatcher dejó pinneados los outputs de los sinks para que
    // sobrevivan a la eviction hasta este punto; se liberan al consumirlos.
    for sink in graph.sinks() {
        if let Some(t) = graph.task(sink) {
            cache.unpin(&t.output_fp);
        }
    }

    let all_sinks_ok = graph.sinks()
                            .iter()
                            .all(|s| graph.task(s).map_or(false, |t| t.status.is_succeeded()));
    if !all_sinks_ok {
        let mut failed: Vec<String> =
            graph.iter()
                 .filter(|t| matches!(t.status, TaskStatus::FailedFinal | TaskStatus::Cancelled))
                 .map(|t| t.id.to_string())
                 .collect();
        failed.sort();
        return Err(CoreError::IncompleteResult { failed });
    }

    let sink_stage = graph.task(&graph.sinks()[0])
                          .map(|t| t.stage)
                          .ok_or_else(|| CoreError::Internal("empty sink set".to_string()))?;

    // Outputs de sinks ordenados por fingerprint: la reducción no depende
    // del orden de finalización.
    let mut sink_payloads: Vec<(String, Value)> = Vec::with_capacity(graph.sinks().len());
    for sink in graph.sinks() {
        let fp = &graph.task(sink).expect("checked above").output_fp;
        let artifact = cache.get(fp)
                            .ok_or_else(|| CoreError::Internal(format!("sink output {fp} missing from cache")))?;
        sink_payloads.push((fp.to_string(), artifact.payload.clone()));
    }
    sink_payloads.sort_by(|a, b| a.0.cmp(&b.0));

    let combined = reduce(sink_stage, sink_payloads.iter().map(|(_, p)| p))?;
    let output_fp = aggregate_fingerprint(graph.batch_fp(), sink_stage);
    let payload = json!({
        "batch": graph.batch_fp().to_string(),
        "sink_stage": sink_stage.as_str(),
        "result": combined,
    });
    let artifact = Artifact::new(AGGREGATE_STAGE, output_fp, payload);
    cache.put(artifact.clone())?;
    Ok(artifact)
}

/// Reducción por stage de los sinks.
fn reduce<'a, I>(stage: StageKind, payloads: I) -> Result<Value, CoreError>
    where I: Iterator<Item = &'a Value>
{
    match stage {
        // Colecciones por registro: unión ordenada por clave.
        StageKind::Featurize | StageKind::Predict => {
            let mut merged: BTreeMap<String, Value> = BTreeMap::new();
            for payload in payloads {
                for (key, item) in keyed_items(payload) {
                    merged.insert(key, item);
                }
            }
            let items: Vec<Value> = merged.into_values().collect();
            Ok(json!({ "count": items.len(), "items": items }))
        }
        // Estadísticas por shard: suma elemento a elemento.
        StageKind::TrainShard => {
            let mut gradients: Vec<f64> = Vec::new();
            let mut samples: u64 = 0;
            for payload in payloads {
                let shard_grads = f64_array(payload.get("gradients"));
                if gradients.is_empty() {
                    gradients = vec![0.0; shard_grads.len()];
                }
                for (acc, g) in gradients.iter_mut().zip(shard_grads) {
                    *acc += g;
                }
                samples += payload.get("samples").and_then(Value::as_u64).unwrap_or(0);
            }
            Ok(json!({ "gradients": gradients, "samples": samples }))
        }
        // Sink global: un único checkpoint, se reexpone tal cual.
        StageKind::AggregateModel => {
            let mut iter = payloads;
            let first = iter.next()
                            .ok_or_else(|| CoreError::Internal("no sink payloads to reduce".to_string()))?;
            Ok(first.clone())
        }
    }
}

fn keyed_items(payload: &Value) -> Vec<(String, Value)> {
    payload.get("items")
           .and_then(Value::as_array)
           .map(|arr| {
               arr.iter()
                  .filter_map(|item| {
                      item.get("key")
                          .and_then(Value::as_str)
                          .map(|k| (k.to_string(), item.clone()))
                  })
                  .collect()
           })
           .unwrap_or_default()
}

fn f64_array(value: Option<&Value>) -> Vec<f64> {
    value.and_then(Value::as_array)
         .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
         .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fingerprint, Task, TaskId};
    use crate::stage::{PredictParams, StageParams};
    use serde_json::json;
    use uuid::Uuid;

    fn sink_task(index: usize, status: TaskStatus, fp: &str) -> Task {
        Task { id: TaskId::new(StageKind::Predict, index),
               stage: StageKind::Predict,
               params: StageParams::Predict(PredictParams::default()),
               unit_keys: vec![],
               input_fps: vec![],
               output_fp: Fingerprint::from_hex(fp.to_string()),
               deps: vec![],
               attempts: 1,
               status,
               next_eligible_at: None }
    }

    #[test]
    fn failed_sink_yields_incomplete_result_naming_the_subset() {
        let batch_fp = Fingerprint::from_hex("batch".to_string());
        let tasks = vec![sink_task(0, TaskStatus::Succeeded { by_cache: false }, "s0"),
                         sink_task(1, TaskStatus::FailedFinal, "s1")];
        let sinks = tasks.iter().map(|t| t.id.clone()).collect();
        let graph = TaskGraph::new(Uuid::new_v4(), batch_fp, tasks, sinks);
        let mut cache = ArtifactCache::new(u64::MAX);

        let err = aggregate(&graph, &mut cache).unwrap_err();
        match err {
            CoreError::IncompleteResult { failed } => {
                assert_eq!(failed, vec!["predict-0001".to_string()]);
            }
            other => panic!("expected IncompleteResult, got {other:?}"),
        }
    }

    #[test]
    fn reduction_is_order_independent() {
        let a = json!({ "items": [ { "key": "KB", "score": 2.0 } ] });
        let b = json!({ "items": [ { "key": "KA", "score": 1.0 } ] });
        let forward = reduce(StageKind::Predict, vec![&a, &b].into_iter()).unwrap();
        let backward = reduce(StageKind::Predict, vec![&b, &a].into_iter()).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward["count"], 2);
        assert_eq!(forward["items"][0]["key"], "KA");
    }
}
