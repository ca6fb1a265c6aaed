//! Fingerprint: identificador opaco derivado determinísticamente de la forma
//! canónica del input más los parámetros del stage que lo produce. Pares
//! (input, params) idénticos producen el mismo fingerprint; cualquier cambio
//! de parámetro produce uno distinto.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::hashing::hash_value;

/// Fingerprint hex de ancho fijo (blake3). Es la clave de la cache de
/// artifacts y la moneda de las aristas del grafo de tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: String) -> Self { Self(hex) }

    pub fn as_str(&self) -> &str { &self.0 }

    /// Fingerprint de un payload bajo un stage + params concretos. Pura:
    /// sin efectos, consultada nunca fuente de fallo salvo input malformado.
    pub fn of_payload(stage: &str, params: &Value, payload: &Value) -> Self {
        Self(hash_value(&serde_json::json!({
            "engine_version": crate::constants::ENGINE_VERSION,
            "stage": stage,
            "params": params,
            "payload": payload,
        })))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Insumos para calcular el fingerprint de salida de una task. NO es el
/// fingerprint final (string hash) sino el modelo previo a canonicalizar.
/// Se calcula antes de ejecutar nada, lo que permite decidir cache-skips
/// sin cómputo.
#[derive(Serialize)]
pub struct TaskFingerprintInput<'a> {
    pub engine_version: &'a str,
    pub stage: &'a str,
    pub params: &'a Value,
    pub input_fingerprints: &'a [Fingerprint], // ordenados lexicográficamente antes de construir
    pub unit_keys: &'a [String],
}

impl TaskFingerprintInput<'_> {
    pub fn fingerprint(&self) -> Fingerprint {
        let v = serde_json::to_value(self).expect("fingerprint input is always serializable");
        Fingerprint(hash_value(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_fingerprint_changes_with_params() {
        let payload = json!({"smiles": "c1ccccc1"});
        let a = Fingerprint::of_payload("featurize", &json!({"max_atoms": 64}), &payload);
        let b = Fingerprint::of_payload("featurize", &json!({"max_atoms": 64}), &payload);
        let c = Fingerprint::of_payload("featurize", &json!({"max_atoms": 32}), &payload);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn task_fingerprint_is_pure() {
        let inputs = vec![Fingerprint::from_hex("aa".into()), Fingerprint::from_hex("bb".into())];
        let keys = vec!["K1".to_string()];
        let params = json!({"epochs": 1});
        let make = || TaskFingerprintInput { engine_version: crate::constants::ENGINE_VERSION,
                                             stage: "train-shard",
                                             params: &params,
                                             input_fingerprints: &inputs,
                                             unit_keys: &keys }.fingerprint();
        assert_eq!(make(), make());
    }
}
