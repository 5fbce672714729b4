//! # Address Space Manager
//!
//! Um address space é um page directory raiz + VMAs ordenadas por início.
//! O VMM guarda todos num registro (arena) e entrega `Asid`s: handles com
//! geração, de modo que um handle de um address space já destruído é
//! rejeitado em vez de apontar para o sucessor no mesmo slot.
//!
//! ## Locks
//!
//! - `Registry` protege só os slots; nunca é adquirido com um address space
//!   travado.
//! - O lock do address space cobre as VMAs, RSS e as PTEs folha. Ao travar
//!   dois (fork), a ordem é a do índice no registro.

pub mod vma;

pub use vma::{Protection, Sharing, Vma, VmaBacking, VmaFlags};

use crate::core::smp::AtomicCpuMask;
use crate::mm::addr::{Pfn, VirtAddr};
use crate::mm::error::{MmError, MmResult};
use crate::sync::{LockRank, Spinlock, SpinlockGuard};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// Handle de address space: `geração << 32 | (índice + 1)`. Nunca zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Asid(u64);

impl Asid {
    fn new(index: usize, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Valor cru (carregado nos registros por CPU e nas tarefas).
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstrói a partir de `raw`. A validade só é conferida no registro.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        ((self.0 & 0xFFFF_FFFF) as usize).wrapping_sub(1)
    }

    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asid({}#{})", self.index(), self.generation())
    }
}

/// Estado protegido pelo lock do address space
pub struct SpaceInner {
    /// VMAs indexadas pelo início
    pub vmas: BTreeMap<u32, Vma>,
    /// Páginas residentes mapeadas
    pub rss: usize,
    /// Page tables de usuário alocadas
    pub pt_frames: usize,
    /// Desmontado: I/O em andamento descarta o resultado
    pub dead: bool,
}

impl SpaceInner {
    /// VMA que contém `va`.
    pub fn find(&self, va: VirtAddr) -> Option<&Vma> {
        self.vmas
            .range(..=va.as_u32())
            .next_back()
            .map(|(_, vma)| vma)
            .filter(|vma| vma.contains(va))
    }

    /// Primeira VMA que começa acima de `va`.
    pub fn next_above(&self, va: VirtAddr) -> Option<&Vma> {
        self.vmas.range(va.as_u32().saturating_add(1)..).next().map(|(_, vma)| vma)
    }

    /// VMA imediatamente abaixo de `va`.
    pub fn prev_below(&self, va: VirtAddr) -> Option<&Vma> {
        self.vmas.range(..va.as_u32()).next_back().map(|(_, vma)| vma)
    }

    /// VMAs que cruzam `[start, end)`, em ordem.
    pub fn overlapping(&self, start: VirtAddr, end: VirtAddr) -> Vec<Vma> {
        let first = self.find(start).map_or(start.as_u32(), |v| v.start.as_u32());
        self.vmas
            .range(first..end.as_u32())
            .map(|(_, vma)| *vma)
            .filter(|vma| vma.overlaps(start, end))
            .collect()
    }

    /// Insere uma VMA; falha se cruzar alguma existente.
    pub fn insert(&mut self, vma: Vma) -> MmResult<()> {
        if !self.overlapping(vma.start, vma.end).is_empty() {
            return Err(MmError::AlreadyMapped);
        }
        self.vmas.insert(vma.start.as_u32(), vma);
        Ok(())
    }

    /// Tira `[start, end)` das VMAs, devolvendo as partes removidas.
    pub fn remove_range(&mut self, start: VirtAddr, end: VirtAddr) -> Vec<Vma> {
        let hit = self.overlapping(start, end);
        for vma in &hit {
            self.vmas.remove(&vma.start.as_u32());
            let (before, after) = vma.carve(start, end);
            for rest in [before, after].into_iter().flatten() {
                self.vmas.insert(rest.start.as_u32(), rest);
            }
        }
        hit.iter().map(|vma| vma.clip(start, end)).collect()
    }

    /// Troca a proteção de `[start, end)`, dividindo nas bordas.
    pub fn reprotect(&mut self, start: VirtAddr, end: VirtAddr, prot: Protection) -> Vec<Vma> {
        let parts = self.remove_range(start, end);
        for part in &parts {
            let mut vma = *part;
            vma.prot = prot;
            self.vmas.insert(vma.start.as_u32(), vma);
        }
        parts
    }

    /// Pares de VMAs cruzados (devia estar sempre vazio).
    pub fn check_disjoint(&self) -> Result<(), VirtAddr> {
        let mut last_end = 0u32;
        for vma in self.vmas.values() {
            if vma.start.as_u32() < last_end || vma.start >= vma.end {
                return Err(vma.start);
            }
            last_end = vma.end.as_u32();
        }
        Ok(())
    }
}

/// Address space de usuário
pub struct AddressSpace {
    asid: Asid,
    root: Pfn,
    inner: Spinlock<SpaceInner>,
    /// CPUs com esta raiz carregada (alvos de shootdown)
    loaded: AtomicCpuMask,
}

impl AddressSpace {
    pub(crate) fn new(asid: Asid, root: Pfn) -> Self {
        Self {
            asid,
            root,
            inner: Spinlock::new(
                LockRank::AddressSpace,
                SpaceInner {
                    vmas: BTreeMap::new(),
                    rss: 0,
                    pt_frames: 0,
                    dead: false,
                },
            ),
            loaded: AtomicCpuMask::new(),
        }
    }

    pub fn asid(&self) -> Asid {
        self.asid
    }

    pub fn root(&self) -> Pfn {
        self.root
    }

    pub fn lock(&self) -> SpinlockGuard<'_, SpaceInner> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, SpaceInner>> {
        self.inner.try_lock()
    }

    pub fn loaded(&self) -> &AtomicCpuMask {
        &self.loaded
    }

    pub fn rss(&self) -> usize {
        self.lock().rss
    }

    pub fn vmas(&self) -> Vec<Vma> {
        self.lock().vmas.values().copied().collect()
    }
}

struct Slot {
    generation: u32,
    space: Option<Arc<AddressSpace>>,
}

/// Arena de address spaces
pub struct Registry {
    slots: Spinlock<Vec<Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: Spinlock::new(LockRank::Registry, Vec::new()),
        }
    }

    /// Ocupa um slot livre (ou novo) com o address space construído por
    /// `build`, que recebe o handle definitivo.
    pub fn insert(&self, build: impl FnOnce(Asid) -> AddressSpace) -> Arc<AddressSpace> {
        let mut slots = self.slots.lock_irqsave();
        let index = match slots.iter().position(|s| s.space.is_none()) {
            Some(i) => i,
            None => {
                slots.push(Slot {
                    generation: 0,
                    space: None,
                });
                slots.len() - 1
            }
        };
        let slot = &mut slots[index];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        let space = Arc::new(build(Asid::new(index, slot.generation)));
        slot.space = Some(space.clone());
        space
    }

    pub fn get(&self, asid: Asid) -> MmResult<Arc<AddressSpace>> {
        let slots = self.slots.lock_irqsave();
        slots
            .get(asid.index())
            .filter(|s| s.generation == asid.generation())
            .and_then(|s| s.space.clone())
            .ok_or(MmError::InvalidParameter)
    }

    pub fn remove(&self, asid: Asid) -> MmResult<Arc<AddressSpace>> {
        let mut slots = self.slots.lock_irqsave();
        slots
            .get_mut(asid.index())
            .filter(|s| s.generation == asid.generation())
            .and_then(|s| s.space.take())
            .ok_or(MmError::InvalidParameter)
    }

    /// Todos os address spaces vivos, em ordem de índice.
    pub fn snapshot(&self) -> Vec<Arc<AddressSpace>> {
        self.slots
            .lock_irqsave()
            .iter()
            .filter_map(|s| s.space.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock_irqsave().iter().filter(|s| s.space.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_is_rejected() {
        let registry = Registry::new();
        let a = registry.insert(|asid| AddressSpace::new(asid, Pfn::new(1))).asid();
        assert!(registry.remove(a).is_ok());

        let b = registry.insert(|asid| AddressSpace::new(asid, Pfn::new(2))).asid();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(registry.get(a).err(), Some(MmError::InvalidParameter));
        assert_eq!(registry.get(b).map(|s| s.root()), Ok(Pfn::new(2)));
    }

    #[test]
    fn vma_insert_rejects_overlap_and_range_removal_splits() {
        let space = AddressSpace::new(Asid::new(0, 1), Pfn::new(1));
        let mut inner = space.lock();
        inner.insert(Vma::anonymous(0x1000, 0x4000, Protection::RW)).unwrap();
        assert_eq!(
            inner.insert(Vma::anonymous(0x3000, 0x5000, Protection::RW)),
            Err(MmError::AlreadyMapped)
        );
        inner.insert(Vma::anonymous(0x4000, 0x6000, Protection::READ)).unwrap();

        let removed = inner.remove_range(VirtAddr::new(0x2000), VirtAddr::new(0x5000));
        assert_eq!(removed.len(), 2);
        let left: Vec<_> = inner.vmas.values().map(|v| (v.start.as_u32(), v.end.as_u32())).collect();
        assert_eq!(left, [(0x1000, 0x2000), (0x5000, 0x6000)]);
        assert_eq!(removed[1].prot, Protection::READ);
        assert!(inner.check_disjoint().is_ok());
    }
}
