//! Constantes del core.
//!
//! Valores estáticos que participan en el cálculo de fingerprints. Un cambio
//! de `ENGINE_VERSION` invalida determinísticamente todos los fingerprints
//! (y por tanto la cache) aunque datos y parámetros no cambien. Mantener
//! estable mientras no haya cambios incompatibles en la featurización o en
//! el formato de artifacts.

/// Versión lógica del motor. Entra en `TaskFingerprintInput` y en el
/// fingerprint de batch.
pub const ENGINE_VERSION: &str = "G1.0";

/// Stage sintético bajo el que se siembran los registros crudos en la cache.
pub const INGEST_STAGE: &str = "ingest";

/// Stage sintético del artifact agregado final.
pub const AGGREGATE_STAGE: &str = "aggregate";
