//! FeaturizeExecutor: registro molecular → tensor de grafo.
//!
//! Construye un grafo molecular mínimo a partir de un escaneo determinista
//! del SMILES (átomos, aristas de cadena/anillo/rama, grados por átomo).
//! N registros de entrada ⇒ N items de salida, en el orden del shard.

use std::collections::HashMap;

use serde_json::{json, Value};

use molgrid_core::{CoreError, StageContext, StageExecutor, StageKind, StageParams};

pub struct FeaturizeExecutor;

impl StageExecutor for FeaturizeExecutor {
    fn stage(&self) -> StageKind {
        StageKind::Featurize
    }

    fn execute(&self, ctx: &StageContext) -> Result<Value, CoreError> {
        let StageParams::Featurize(params) = &ctx.params else {
            return Err(CoreError::Internal("featurize executor received wrong params".to_string()));
        };
        let mut items: Vec<Value> = Vec::with_capacity(ctx.inputs.len());
        for input in &ctx.inputs {
            let key = input.payload
                           .get("inchikey")
                           .and_then(Value::as_str)
                           .ok_or_else(|| CoreError::Internal("ingest artifact missing inchikey".to_string()))?;
            let smiles = input.payload
                              .get("smiles")
                              .and_then(Value::as_str)
                              .ok_or_else(|| CoreError::Internal("ingest artifact missing smiles".to_string()))?;
            let (atoms, edges) = molecular_graph(smiles, params.max_atoms);
            let mut degrees = vec![0usize; atoms.len()];
            for (a, b) in &edges {
                degrees[*a] += 1;
                degrees[*b] += 1;
            }
            let degree_sum: usize = degrees.iter().sum();
            let mut item = json!({
                "key": key,
                "atoms": atoms.len(),
                "bonds": edges.len(),
                "elements": atoms,
                "edges": edges.iter().map(|(a, b)| json!([a, b])).collect::<Vec<_>>(),
                "degree_sum": degree_sum,
            });
            if params.include_degree {
                item["degrees"] = json!(degrees);
            }
            items.push(item);
        }
        Ok(json!({ "items": items }))
    }
}

/// Escaneo SMILES mínimo: solo conectividad.
/// - letra mayúscula (con `l`/`r` siguiente para Cl/Br) o aromática
///   minúscula ⇒ átomo nuevo, enlazado al anterior de la cadena;
/// - `(` / `)` ⇒ pila de ramas; `.` corta la cadena (componentes
///   desconectados);
/// - dígito ⇒ apertura/cierre de anillo (par de apariciones ⇒ arista);
/// - `[...]` ⇒ átomo entre corchetes, se toma el símbolo alfabético;
/// - símbolos de enlace (`=`, `#`, `-`, `/`, `\`) se ignoran: el grado no
///   distingue orden de enlace.
fn molecular_graph(smiles: &str, max_atoms: usize) -> (Vec<String>, Vec<(usize, usize)>) {
    let chars: Vec<char> = smiles.chars().collect();
    let mut atoms: Vec<String> = Vec::new();
    let mut edges: Vec<(usize, usize)> = Vec::new();
    let mut prev: Option<usize> = None;
    let mut branches: Vec<Option<usize>> = Vec::new();
    let mut rings: HashMap<char, usize> = HashMap::new();

    let push_atom = |symbol: String, prev: &mut Option<usize>, atoms: &mut Vec<String>,
                     edges: &mut Vec<(usize, usize)>| {
        if atoms.len() >= max_atoms {
            return;
        }
        let idx = atoms.len();
        atoms.push(symbol);
        if let Some(p) = *prev {
            edges.push((p, idx));
        }
        *prev = Some(idx);
    };

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => branches.push(prev),
            ')' => prev = branches.pop().flatten(),
            '.' => prev = None,
            '0'..='9' => {
                if let Some(here) = prev {
                    match rings.remove(&c) {
                        Some(open) if open != here => edges.push((open.min(here), open.max(here))),
                        Some(_) => {}
                        None => {
                            rings.insert(c, here);
                        }
                    }
                }
            }
            '[' => {
                let mut symbol = String::new();
                while i + 1 < chars.len() && chars[i + 1] != ']' {
                    i += 1;
                    if chars[i].is_ascii_alphabetic() && symbol.len() < 2 {
                        symbol.push(chars[i]);
                    }
                }
                i += 1; // consumir ']'
                if !symbol.is_empty() {
                    push_atom(capitalize(&symbol), &mut prev, &mut atoms, &mut edges);
                }
            }
            'A'..='Z' => {
                let symbol = if i + 1 < chars.len()
                                && ((c == 'C' && chars[i + 1] == 'l') || (c == 'B' && chars[i + 1] == 'r'))
                {
                    i += 1;
                    format!("{}{}", c, chars[i])
                } else {
                    c.to_string()
                };
                push_atom(symbol, &mut prev, &mut atoms, &mut edges);
            }
            'b' | 'c' | 'n' | 'o' | 'p' | 's' => {
                push_atom(c.to_ascii_uppercase().to_string(), &mut prev, &mut atoms, &mut edges);
            }
            _ => {}
        }
        i += 1;
    }
    (atoms, edges)
}

fn capitalize(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for (i, c) in symbol.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
