//! PredictExecutor: score por registro a partir de los features del shard
//! y, si el pipeline entrenó, del checkpoint agregado. Sin checkpoint usa
//! pesos fijos (scoring estructural puro).

use serde_json::{json, Value};

use molgrid_core::{CoreError, StageContext, StageExecutor, StageKind, StageParams};

/// Pesos usados cuando el pipeline no incluye stage de modelo.
const DEFAULT_WEIGHTS: [f64; 3] = [0.1, 0.2, 0.3];

pub struct PredictExecutor;

impl StageExecutor for PredictExecutor {
    fn stage(&self) -> StageKind {
        StageKind::Predict
    }

    fn execute(&self, ctx: &StageContext) -> Result<Value, CoreError> {
        let StageParams::Predict(params) = &ctx.params else {
            return Err(CoreError::Internal("predict executor received wrong params".to_string()));
        };
        let features = ctx.inputs
                          .first()
                          .ok_or_else(|| CoreError::Internal("predict requires a featurized input".to_string()))?;
        let weights: [f64; 3] = match ctx.inputs.get(1) {
            Some(checkpoint) => {
                let w = checkpoint.payload
                                  .get("weights")
                                  .and_then(Value::as_array)
                                  .ok_or_else(|| CoreError::Internal("checkpoint missing weights".to_string()))?;
                let mut out = [0.0f64; 3];
                for (slot, v) in out.iter_mut().zip(w.iter().filter_map(Value::as_f64)) {
                    *slot = v;
                }
                out
            }
            None => DEFAULT_WEIGHTS,
        };

        let items = features.payload
                            .get("items")
                            .and_then(Value::as_array)
                            .ok_or_else(|| CoreError::Internal("featurized payload missing items".to_string()))?;
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            let key = item.get("key")
                          .and_then(Value::as_str)
                          .ok_or_else(|| CoreError::Internal("featurized item missing key".to_string()))?;
            let degree_sum = item.get("degree_sum").and_then(Value::as_u64).unwrap_or(0) as f64;
            let atoms = item.get("atoms").and_then(Value::as_u64).unwrap_or(0) as f64;
            let bonds = item.get("bonds").and_then(Value::as_u64).unwrap_or(0) as f64;
            let score = weights[0] * degree_sum + weights[1] * atoms + weights[2] * bonds;
            out.push(json!({
                "key": key,
                "score": score,
                "label": score > params.threshold,
            }));
        }
        Ok(json!({ "items": out }))
    }
}
