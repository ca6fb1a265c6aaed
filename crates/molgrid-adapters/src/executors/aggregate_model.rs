//! AggregateModelExecutor: reducción global de gradientes por shard a un
//! checkpoint. Insensible al orden: los inputs se ordenan por fingerprint
//! antes de sumar, así el checkpoint no depende del orden de finalización
//! de los shards.

use serde_json::{json, Value};

use molgrid_core::{Artifact, CoreError, StageContext, StageExecutor, StageKind, StageParams};

pub struct AggregateModelExecutor;

impl StageExecutor for AggregateModelExecutor {
    fn stage(&self) -> StageKind {
        StageKind::AggregateModel
    }

    fn execute(&self, ctx: &StageContext) -> Result<Value, CoreError> {
        let StageParams::AggregateModel(params) = &ctx.params else {
            return Err(CoreError::Internal("aggregate-model executor received wrong params".to_string()));
        };
        if ctx.inputs.is_empty() {
            return Err(CoreError::Internal("aggregate-model requires gradient inputs".to_string()));
        }
        let mut sorted: Vec<&Artifact> = ctx.inputs.iter().collect();
        sorted.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        let mut weights = [0.0f64; 3];
        let mut samples: u64 = 0;
        for shard in sorted {
            if let Some(grads) = shard.payload.get("gradients").and_then(Value::as_array) {
                for (w, g) in weights.iter_mut().zip(grads.iter().filter_map(Value::as_f64)) {
                    *w += g;
                }
            }
            samples += shard.payload.get("samples").and_then(Value::as_u64).unwrap_or(0);
        }
        if params.strategy == "mean" && samples > 0 {
            for w in weights.iter_mut() {
                *w /= samples as f64;
            }
        }
        Ok(json!({
            "weights": weights,
            "samples": samples,
            "strategy": params.strategy,
        }))
    }
}
