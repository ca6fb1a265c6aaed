//! Artifact neutral del pipeline.
//!
//! Un `Artifact` es la unidad de datos intercambiada entre tasks. Es neutral:
//! - `payload` es JSON genérico; el core no interpreta su semántica.
//! - `fingerprint` es la identidad content-addressable del artifact.
//! - `meta` anota stage productor, tamaño y timestamp; NO entra al hash, por
//!   lo que dos ejecuciones del mismo cómputo producen la misma identidad.
//!
//! Inmutable una vez commiteado en la cache: un artifact "cambiado" es una
//! entidad nueva con fingerprint nuevo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Fingerprint;
use crate::hashing::to_canonical_json;

/// Tipos neutrales de artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// JSON genérico sin semántica; la distinción se hace por el shape del
    /// payload y el stage productor en `meta`.
    GenericJson,
}

/// Metadatos del artifact (excluidos del fingerprint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Stage que lo produjo ("ingest", "featurize", ...).
    pub stage: String,
    /// Tamaño en bytes de la forma canónica del payload.
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub fingerprint: Fingerprint,
    pub payload: Value,
    pub meta: ArtifactMeta,
}

impl Artifact {
    /// Construye un artifact ya identificado. El tamaño se deriva de la
    /// forma canónica (la misma que gobierna el presupuesto de la cache).
    pub fn new(stage: &str, fingerprint: Fingerprint, payload: Value) -> Self {
        let size = to_canonical_json(&payload).len() as u64;
        Self { kind: ArtifactKind::GenericJson,
               fingerprint,
               payload,
               meta: ArtifactMeta { stage: stage.to_string(),
                                    size,
                                    created_at: Utc::now() } }
    }

    pub fn canonical_payload(&self) -> String {
        to_canonical_json(&self.payload)
    }
}
