//! Encoder Dominio → request neutral del core.
//!
//! Reglas clave:
//! - El `payload` de cada unidad debe ser JSON estable (mismos campos,
//!   mismo contenido) para que el fingerprint de ingest sea reproducible.
//! - La clave de unidad es el InChIKey: estable, normalizado y único dentro
//!   del batch.
//! - Este encoder NO calcula fingerprints (lo hace el builder al sembrar la
//!   cache).

use serde_json::json;

use molgrid_core::{GraphRequest, RequestUnit, StageRequest};
use molgrid_domain::BatchRequest;

/// Contrato de empaquetado dominio → request neutral.
pub trait DomainRequestEncoder {
    fn encode_batch(&self, batch: &BatchRequest) -> GraphRequest;
}

/// Implementación simple: payload = { inchikey, smiles, metadata }.
#[derive(Clone, Default)]
pub struct SimpleRequestEncoder;

impl DomainRequestEncoder for SimpleRequestEncoder {
    fn encode_batch(&self, batch: &BatchRequest) -> GraphRequest {
        let units = batch.records()
                         .iter()
                         .map(|r| RequestUnit { key: r.inchikey().to_string(),
                                                payload: json!({ "inchikey": r.inchikey(),
                                                                 "smiles": r.smiles(),
                                                                 "metadata": r.metadata() }) })
                         .collect();
        let stages = batch.pipeline()
                          .stages
                          .iter()
                          .map(|s| StageRequest { name: s.name.clone(), params: s.params.clone() })
                          .collect();
        GraphRequest { units, stages, shard_size: batch.pipeline().shard_size }
    }
}
