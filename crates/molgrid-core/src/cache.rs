//! Cache de artifacts content-addressable.
//!
//! Estado compartido a nivel de proceso, inyectado explícitamente a builder,
//! dispatcher y aggregator (nunca un singleton de módulo). El loop
//! coordinador es el único escritor, por lo que no hace falta locking más
//! allá del chequeo de conflicto por fingerprint.
//!
//! Semántica de `put`:
//! - mismo fingerprint + mismo payload canónico ⇒ no-op exitoso
//!   (`Deduplicated`), lo que hace seguras las carreras de re-cómputo;
//! - mismo fingerprint + payload distinto ⇒ `Conflict` (bug de
//!   fingerprinting): el write se descarta, el original se retiene y se
//!   loguea a nivel error.
//!
//! Eviction: LRU hasta el presupuesto configurado en bytes; nunca remueve
//! entradas con pin count > 0. El dispatcher pinnea cada input durante toda
//! la vida de su task consumidora (no solo el intento en vuelo) y los
//! outputs de los sinks hasta que el aggregator los lee, de modo que la
//! eviction jamás deja a una task pendiente sin sus insumos.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, error};

use crate::errors::CoreError;
use crate::model::{Artifact, Fingerprint};

/// Resultado de un `put` exitoso.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// Ya existía contenido idéntico bajo el fingerprint.
    Deduplicated,
}

pub struct ArtifactCache {
    /// Orden de inserción = recencia (menos reciente primero).
    entries: IndexMap<Fingerprint, Artifact>,
    pins: HashMap<Fingerprint, usize>,
    budget_bytes: u64,
    total_bytes: u64,
}

impl ArtifactCache {
    pub fn new(budget_bytes: u64) -> Self {
        Self { entries: IndexMap::new(),
               pins: HashMap::new(),
               budget_bytes,
               total_bytes: 0 }
    }

    /// Lookup por fingerprint. Refresca la recencia LRU de la entrada; no
    /// tiene otros efectos observables.
    pub fn get(&mut self, fp: &Fingerprint) -> Option<&Artifact> {
        self.touch(fp);
        self.entries.get(fp)
    }

    /// Consulta hit/miss sin refrescar recencia.
    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.entries.contains_key(fp)
    }

    pub fn put(&mut self, artifact: Artifact) -> Result<PutOutcome, CoreError> {
        let fp = artifact.fingerprint.clone();
        if let Some(existing) = self.entries.get(&fp) {
            if existing.canonical_payload() == artifact.canonical_payload() {
                self.touch(&fp);
                return Ok(PutOutcome::Deduplicated);
            }
            error!(fingerprint = %fp, stage = %artifact.meta.stage,
                   "fingerprint collision with differing content; write discarded");
            return Err(CoreError::Conflict { fingerprint: fp.to_string() });
        }
        self.total_bytes += artifact.meta.size;
        self.entries.insert(fp, artifact);
        Ok(PutOutcome::Inserted)
    }

    /// Incrementa el pin count: la entrada queda protegida de eviction
    /// mientras alguna task no-terminal (o el aggregator) la necesite. Puede
    /// pinnearse un fingerprint aún no commiteado; el pin protege la entrada
    /// desde el momento en que se inserta.
    pub fn pin(&mut self, fp: &Fingerprint) {
        *self.pins.entry(fp.clone()).or_insert(0) += 1;
    }

    pub fn unpin(&mut self, fp: &Fingerprint) {
        if let Some(count) = self.pins.get_mut(fp) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(fp);
            }
        }
    }

    fn is_pinned(&self, fp: &Fingerprint) -> bool {
        self.pins.get(fp).copied().unwrap_or(0) > 0
    }

    /// Remueve entradas LRU hasta volver al presupuesto, saltando las
    /// pinneadas. Devuelve cuántas se removieron.
    pub fn evict_to_budget(&mut self) -> usize {
        let mut evicted = 0;
        while self.total_bytes > self.budget_bytes {
            let victim = self.entries
                             .keys()
                             .find(|fp| !self.is_pinned(fp))
                             .cloned();
            let Some(fp) = victim else { break };
            if let Some(art) = self.entries.shift_remove(&fp) {
                self.total_bytes -= art.meta.size;
                evicted += 1;
                debug!(fingerprint = %fp, size = art.meta.size, "evicted artifact");
            }
        }
        evicted
    }

    fn touch(&mut self, fp: &Fingerprint) {
        if let Some(index) = self.entries.get_index_of(fp) {
            // mover al final = más reciente
            self.entries.move_index(index, self.entries.len() - 1);
        }
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn total_bytes(&self) -> u64 { self.total_bytes }
}
