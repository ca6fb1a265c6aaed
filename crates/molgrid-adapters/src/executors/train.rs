//! TrainShardExecutor: estadísticas de "gradiente" por shard a partir del
//! tensor featurizado. Stub determinista GPU-class: los valores son
//! funciones puras de los features + params, sin aleatoriedad.

use serde_json::{json, Value};

use molgrid_core::{CoreError, StageContext, StageExecutor, StageKind, StageParams};

pub struct TrainShardExecutor;

impl StageExecutor for TrainShardExecutor {
    fn stage(&self) -> StageKind {
        StageKind::TrainShard
    }

    fn execute(&self, ctx: &StageContext) -> Result<Value, CoreError> {
        let StageParams::TrainShard(params) = &ctx.params else {
            return Err(CoreError::Internal("train-shard executor received wrong params".to_string()));
        };
        let features = ctx.inputs
                          .first()
                          .ok_or_else(|| CoreError::Internal("train-shard requires a featurized input".to_string()))?;
        let items = features.payload
                            .get("items")
                            .and_then(Value::as_array)
                            .ok_or_else(|| CoreError::Internal("featurized payload missing items".to_string()))?;

        let scale = params.learning_rate * f64::from(params.epochs);
        let mut grad = [0.0f64; 3];
        for item in items {
            grad[0] += item.get("degree_sum").and_then(Value::as_u64).unwrap_or(0) as f64;
            grad[1] += item.get("atoms").and_then(Value::as_u64).unwrap_or(0) as f64;
            grad[2] += item.get("bonds").and_then(Value::as_u64).unwrap_or(0) as f64;
        }
        Ok(json!({
            "gradients": [grad[0] * scale, grad[1] * scale, grad[2] * scale],
            "samples": items.len(),
        }))
    }
}
