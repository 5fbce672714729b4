//! # Evicção e Reclaim
//!
//! Página anônima com um único dono vai para o swap; página do page cache
//! só é desmapeada (volta a ser lida no próximo fault).
//!
//! ```text
//! [lock] PTE ← entrada, swap cache ← (entrada, frame, Writeback)
//!    │   flush da TLB
//!    ▼
//! [sem lock] backend.write(entrada, frame)
//!    │
//!    ▼
//! [lock] PTE ainda é a entrada?  sim ─▶ frame volta ao PMM
//!                                não ─▶ alguém reinstalou/desmapeou:
//!                                       libera a entrada
//! ```

use super::{table, PendingFlush, Pte, PteFlags, Vmm};
use crate::mm::addr::VirtAddr;
use crate::mm::aspace::{AddressSpace, Asid, VmaBacking};
use crate::mm::error::{MmError, MmResult};
use crate::mm::pmm::{FrameUsage, Reclaim};
use crate::mm::swap::{SlotState, SwapEntry};
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

/// Resultado de uma evicção
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evicted {
    /// Conteúdo salvo nesta entrada
    Swapped(SwapEntry),
    /// Página do page cache desmapeada
    Dropped,
}

impl Vmm {
    /// Tira a página de `va` da memória.
    ///
    /// `Busy` se a página está travada, compartilhada ou mudou durante o
    /// writeback; `Io` se a escrita falhou (o mapeamento é restaurado).
    pub fn evict(&self, asid: Asid, va: VirtAddr) -> MmResult<Evicted> {
        let space = self.space(asid)?;
        self.evict_page(&space, va.page_base())
    }

    fn evict_page(&self, space: &AddressSpace, page: VirtAddr) -> MmResult<Evicted> {
        let mut flush = PendingFlush::new();
        let (entry, frame, original) = {
            let mut inner = space.lock();
            let vma = *inner.find(page).ok_or(MmError::NotMapped)?;
            let slot = table::walk(self.pmm(), space.root(), page).ok_or(MmError::NotMapped)?;
            let pte = table::load(slot);
            let pfn = pte.pfn().ok_or(MmError::NotMapped)?;

            if vma.is_locked() || matches!(vma.backing, VmaBacking::Device { .. }) {
                return Err(MmError::Busy);
            }

            if self.pmm().usage(pfn) == FrameUsage::PageCache {
                table::store(slot, Pte::EMPTY);
                inner.rss = inner.rss.saturating_sub(1);
                flush.add_page(page);
                flush.release(pfn);
                drop(inner);
                self.flush(flush, space);
                return Ok(Evicted::Dropped);
            }

            if self.pmm().refcount(pfn) != 1 {
                return Err(MmError::Busy);
            }
            let swap = self.swap().ok_or(MmError::SwapFull)?;
            let entry = swap.backend().alloc().map_err(MmError::from)?;
            swap.cache().insert(entry, pfn, SlotState::Writeback);
            table::store(slot, Pte::swap(entry));
            inner.rss = inner.rss.saturating_sub(1);
            flush.add_page(page);
            (entry, pfn, pte)
        };
        // Nenhuma CPU escreve no frame depois daqui
        self.flush(flush, space);

        let swap = self.swap().ok_or(MmError::SwapFull)?;
        let written = self
            .pmm()
            .with_page(frame, |data| swap.backend().write(entry, data));

        let mut inner = space.lock();
        swap.cache().remove(entry);
        let slot = table::walk(self.pmm(), space.root(), page);
        let unchanged = !inner.dead && slot.is_some_and(|s| table::load(s) == Pte::swap(entry));

        match (written, slot) {
            (Ok(()), Some(_)) if unchanged => {
                drop(inner);
                self.pmm().put(frame);
                swap.count_out();
                crate::ktrace!("(Swap) Página escrita na entrada ", entry.id() as u64);
                Ok(Evicted::Swapped(entry))
            }
            (Err(err), Some(slot)) if unchanged => {
                // A referência do mapeamento volta para a PTE
                table::store(slot, original);
                inner.rss += 1;
                drop(inner);
                swap.backend().free(entry);
                crate::kwarn!("(Swap) Falha de escrita, página restaurada em ", page.as_u32());
                Err(MmError::from(err))
            }
            _ => {
                drop(inner);
                swap.backend().free(entry);
                self.pmm().put(frame);
                Err(MmError::Busy)
            }
        }
    }

    /// Envelhece as páginas de um address space (sem esperar pelo lock) e
    /// devolve até `want` candidatas: páginas não acessadas desde a última
    /// passada.
    fn age(&self, space: &AddressSpace, want: usize) -> Vec<VirtAddr> {
        let mut candidates = Vec::new();
        let Some(inner) = space.try_lock() else {
            return candidates;
        };
        let swapping = self.swap().is_some();

        for (pd, pt) in table::user_tables(self.pmm(), space.root()) {
            for (i, slot) in table::slots(self.pmm(), pt).iter().enumerate() {
                let pte = table::load(slot);
                let Some(pfn) = pte.pfn() else { continue };
                let va = table::va_of(pd, i);
                let Some(vma) = inner.find(va) else { continue };
                if vma.is_locked() || matches!(vma.backing, VmaBacking::Device { .. }) {
                    continue;
                }

                if pte.flags().contains(PteFlags::ACCESSED) {
                    table::clear_bits(slot, PteFlags::ACCESSED);
                    self.pmm().set_active(pfn, true);
                    continue;
                }
                self.pmm().set_active(pfn, false);
                let cached = self.pmm().usage(pfn) == FrameUsage::PageCache;
                if (cached || swapping) && candidates.len() < want {
                    candidates.push(va);
                }
            }
        }
        candidates
    }

    /// Libera até `target` frames: varredura em relógio pelos address
    /// spaces, depois encolhe o page cache. Chamado pelo PMM sem lock de
    /// zona.
    pub fn reclaim(&self, target: usize) -> usize {
        let spaces = self.spaces();
        let mut freed = 0;

        if !spaces.is_empty() {
            let start = self.clock_hand.fetch_add(1, Ordering::Relaxed) % spaces.len();
            for i in 0..spaces.len() {
                if freed >= target {
                    break;
                }
                let space = &spaces[(start + i) % spaces.len()];
                for va in self.age(space, target - freed) {
                    if freed >= target {
                        break;
                    }
                    if let Ok(Evicted::Swapped(_)) = self.evict_page(space, va) {
                        freed += 1;
                    }
                }
            }
        }

        if freed < target {
            freed += self.page_cache().shrink(self.pmm(), target - freed);
        }
        crate::kdebug!("(VMM) Reclaim liberou frames: ", freed as u64);
        freed
    }
}

impl Reclaim for Vmm {
    fn reclaim(&self, target: usize) -> usize {
        Vmm::reclaim(self, target)
    }
}
