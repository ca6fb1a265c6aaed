//! Contabilidad de WorkerSlots por clase de capacidad.
//!
//! Un slot se reserva al despachar una task ready y se libera cuando la
//! task alcanza estado terminal o se reencola para retry. La tabla está
//! acotada por la capacidad del pool: imposible sobre-suscribir (p. ej. dos
//! tasks GPU-class sobre un único slot GPU).

use std::collections::HashMap;

use crate::model::CapacityClass;

pub struct SlotTable {
    free: HashMap<CapacityClass, usize>,
    total: HashMap<CapacityClass, usize>,
}

impl SlotTable {
    pub fn new(capacities: &[(CapacityClass, usize)]) -> Self {
        let total: HashMap<CapacityClass, usize> = capacities.iter().copied().collect();
        Self { free: total.clone(), total }
    }

    pub fn total(&self, class: CapacityClass) -> usize {
        self.total.get(&class).copied().unwrap_or(0)
    }

    /// Reserva un slot de la clase si hay libre.
    pub fn acquire(&mut self, class: CapacityClass) -> bool {
        match self.free.get_mut(&class) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self, class: CapacityClass) {
        let total = self.total(class);
        if let Some(n) = self.free.get_mut(&class) {
            debug_assert!(*n < total, "slot release without acquire");
            *n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_bounded_per_class() {
        let mut slots = SlotTable::new(&[(CapacityClass::Cpu, 2), (CapacityClass::Gpu, 1)]);
        assert!(slots.acquire(CapacityClass::Gpu));
        assert!(!slots.acquire(CapacityClass::Gpu), "single GPU slot must not oversubscribe");
        assert!(slots.acquire(CapacityClass::Cpu));
        assert!(slots.acquire(CapacityClass::Cpu));
        assert!(!slots.acquire(CapacityClass::Cpu));
        slots.release(CapacityClass::Gpu);
        assert!(slots.acquire(CapacityClass::Gpu));
    }
}
