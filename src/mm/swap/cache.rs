//! Swap cache: entradas de swap com um frame em trânsito.
//!
//! Durante o writeback o frame continua aqui até o backend confirmar; um
//! fault que encontra a entrada reaproveita o frame em vez de ler do disco.
//! Durante um swap-in a entrada fica `Reading` e outros faults na mesma
//! entrada esperam.

use super::SwapEntry;
use crate::mm::addr::Pfn;
use crate::sync::{LockRank, Spinlock};
use alloc::collections::BTreeMap;

/// Direção do I/O em andamento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Página sendo gravada; o frame ainda tem o conteúdo válido
    Writeback,
    /// Página sendo lida para o frame
    Reading,
}

pub struct SwapCache {
    slots: Spinlock<BTreeMap<u32, (Pfn, SlotState)>>,
}

impl SwapCache {
    pub fn new() -> Self {
        Self {
            slots: Spinlock::new(LockRank::SwapCache, BTreeMap::new()),
        }
    }

    /// Registra o frame da entrada. Falha se já havia um.
    pub fn insert(&self, entry: SwapEntry, pfn: Pfn, state: SlotState) -> bool {
        let mut slots = self.slots.lock_irqsave();
        if slots.contains_key(&entry.id()) {
            return false;
        }
        slots.insert(entry.id(), (pfn, state));
        true
    }

    pub fn lookup(&self, entry: SwapEntry) -> Option<(Pfn, SlotState)> {
        self.slots.lock_irqsave().get(&entry.id()).copied()
    }

    pub fn remove(&self, entry: SwapEntry) -> Option<(Pfn, SlotState)> {
        self.slots.lock_irqsave().remove(&entry.id())
    }

    pub fn len(&self) -> usize {
        self.slots.lock_irqsave().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Algum slot aponta para este frame?
    pub fn contains_frame(&self, pfn: Pfn) -> bool {
        self.slots.lock_irqsave().values().any(|&(p, _)| p == pfn)
    }
}

impl Default for SwapCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_frame_per_entry() {
        let cache = SwapCache::new();
        let e = SwapEntry::new(7).unwrap();
        assert!(cache.insert(e, Pfn::new(100), SlotState::Writeback));
        assert!(!cache.insert(e, Pfn::new(101), SlotState::Reading));
        assert_eq!(cache.lookup(e), Some((Pfn::new(100), SlotState::Writeback)));
        assert!(cache.contains_frame(Pfn::new(100)));

        assert_eq!(cache.remove(e).map(|(p, _)| p), Some(Pfn::new(100)));
        assert!(cache.is_empty());
    }
}
