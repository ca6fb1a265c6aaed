//! Configuración de pipeline declarada por el usuario.
//!
//! En el borde externo los stages se nombran por string y llevan params JSON
//! libres; el core los resuelve contra un enum cerrado en build-time y
//! rechaza nombres desconocidos (*MalformedRequest*). Aquí solo validamos la
//! forma mínima.

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Declaración de un stage por nombre + parámetros JSON (sin interpretar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StageSpec {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), params: serde_json::Value::Null }
    }

    pub fn with_params(name: &str, params: serde_json::Value) -> Self {
        Self { name: name.to_string(), params }
    }
}

/// Pipeline nombrado: lista ordenada de stages + tamaño de shard para
/// particionar la colección de entrada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageSpec>,
    pub shard_size: usize,
}

impl PipelineConfig {
    pub fn new(stages: Vec<StageSpec>, shard_size: usize) -> Result<Self, DomainError> {
        if stages.is_empty() {
            return Err(DomainError::MalformedPipeline("pipeline has no stages".to_string()));
        }
        if shard_size == 0 {
            return Err(DomainError::MalformedPipeline("shard_size must be >= 1".to_string()));
        }
        Ok(Self { stages, shard_size })
    }
}
