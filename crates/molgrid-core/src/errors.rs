//! Errores del core. La taxonomía sigue el contrato observable del
//! dispatcher: lo transitorio (fallos de worker, cache miss) se resuelve
//! internamente y nunca llega aquí.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CoreError {
    /// Batch o pipeline mal formado: stage desconocido, params con forma
    /// inválida, colección vacía. Se reporta en build, nunca en dispatch.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    /// Colisión de fingerprint con contenido distinto. Señala un bug de
    /// fingerprinting, no una carrera normal: el write se descarta y el
    /// original se retiene.
    #[error("cache conflict for fingerprint {fingerprint}")]
    Conflict { fingerprint: String },
    /// La agregación no puede producir resultado: al menos un sink depende
    /// de tasks en estado failed-final o cancelled. `failed` nombra el
    /// subconjunto exacto (ordenado) para diagnóstico.
    #[error("incomplete result, failed tasks: {}", failed.join(", "))]
    IncompleteResult { failed: Vec<String> },
    #[error("internal: {0}")]
    Internal(String),
}
