use serde::{Deserialize, Serialize};

use crate::DomainError;
use std::fmt;

/// Registro molecular de entrada. Inmutable una vez construido: la identidad
/// lógica es el InChIKey normalizado (mayúsculas).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoleculeRecord {
    inchikey: String,
    smiles: String,
    metadata: serde_json::Value,
}

impl MoleculeRecord {
    /// Construye un registro validando el formato del InChIKey
    /// (27 caracteres, dos guiones). El SMILES no se interpreta aquí; la
    /// featurización vive en los executors.
    pub fn new(inchikey: &str, smiles: &str, metadata: serde_json::Value) -> Result<Self, DomainError> {
        let normalized_inchikey = inchikey.to_uppercase();
        if normalized_inchikey.len() != 27 || normalized_inchikey.matches('-').count() < 2 {
            return Err(DomainError::ValidationError("Invalid InChIKey format".to_string()));
        }
        if smiles.trim().is_empty() {
            return Err(DomainError::ValidationError("Empty SMILES".to_string()));
        }
        Ok(MoleculeRecord {
            inchikey: normalized_inchikey,
            smiles: smiles.to_string(),
            metadata,
        })
    }

    pub fn inchikey(&self) -> &str { &self.inchikey }
    pub fn smiles(&self) -> &str { &self.smiles }
    pub fn metadata(&self) -> &serde_json::Value { &self.metadata }
    pub fn compare(&self, other: &MoleculeRecord) -> bool { self.inchikey == other.inchikey }
}

impl fmt::Display for MoleculeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<record: {}, {}>", self.inchikey, self.smiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inchikey_is_normalized_and_validated() {
        let r = MoleculeRecord::new("lfqscwfljhtthz-uhfffaoysa-n", "CCO", json!({})).unwrap();
        assert_eq!(r.inchikey(), "LFQSCWFLJHTTHZ-UHFFFAOYSA-N");
        assert!(MoleculeRecord::new("not-a-key", "CCO", json!({})).is_err());
        assert!(MoleculeRecord::new("LFQSCWFLJHTTHZ-UHFFFAOYSA-N", "  ", json!({})).is_err());
    }
}
