use serde::{Deserialize, Serialize};

use crate::{DomainError, MoleculeRecord, PipelineConfig};

/// Solicitud de batch: colección de registros + pipeline nombrado.
/// El orden de `records` es significativo: el particionado en shards es por
/// orden estable de entrada (mismo request ⇒ misma membresía de shard).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    records: Vec<MoleculeRecord>,
    pipeline: PipelineConfig,
}

impl BatchRequest {
    pub fn new(records: Vec<MoleculeRecord>, pipeline: PipelineConfig) -> Result<Self, DomainError> {
        if records.is_empty() {
            return Err(DomainError::ValidationError("batch has no records".to_string()));
        }
        Ok(Self { records, pipeline })
    }

    pub fn records(&self) -> &[MoleculeRecord] { &self.records }
    pub fn pipeline(&self) -> &PipelineConfig { &self.pipeline }
}
