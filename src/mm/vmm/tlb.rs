//! # TLB Management e Shootdown
//!
//! Toda atualização que reduz permissão (unmap, COW, proteção, evict) é
//! registrada num [`PendingFlush`] com o lock do address space segurado e
//! executada depois de soltá-lo:
//!
//! 1. invalidação local (`invlpg`, ou flush completo acima do limiar);
//! 2. shootdown nas CPUs que têm o address space carregado, esperando o ACK;
//! 3. só então os frames e page tables soltos voltam ao PMM.
//!
//! ## ⚠️ CRÍTICO para SMP
//!
//! Sem o passo 2 outra CPU continuaria lendo um frame já reutilizado pela
//! entrada antiga da TLB dela.

use crate::core::smp::{ipi, Smp};
use crate::mm::addr::{Pfn, VirtAddr};
use crate::mm::aspace::AddressSpace;
use crate::mm::config::PAGE_SIZE;
use crate::mm::pmm::Pmm;
use alloc::vec::Vec;

/// Invalidações e liberações adiadas até depois do lock.
#[derive(Default)]
#[must_use = "o flush precisa ser executado com finish()"]
pub struct PendingFlush {
    range: Option<(u32, u32)>,
    frames: Vec<Pfn>,
}

impl PendingFlush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marca a página de `va` para invalidação.
    pub fn add_page(&mut self, va: VirtAddr) {
        let start = va.page_base().as_u32();
        let end = start.saturating_add(PAGE_SIZE as u32);
        self.range = Some(match self.range {
            Some((s, e)) => (s.min(start), e.max(end)),
            None => (start, end),
        });
    }

    /// Marca um intervalo inteiro.
    pub fn add_range(&mut self, start: VirtAddr, end: VirtAddr) {
        if start >= end {
            return;
        }
        self.range = Some(match self.range {
            Some((s, e)) => (s.min(start.as_u32()), e.max(end.as_u32())),
            None => (start.as_u32(), end.as_u32()),
        });
    }

    /// Referência a soltar depois do flush (frame de dados ou page table).
    pub fn release(&mut self, pfn: Pfn) {
        self.frames.push(pfn);
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_none() && self.frames.is_empty()
    }

    /// Invalida localmente e nas CPUs com `space` carregado, depois solta
    /// as referências. Chamar sem nenhum spinlock segurado.
    pub fn finish(self, pmm: &Pmm, smp: &Smp, space: &AddressSpace) {
        if let Some((start, end)) = self.range {
            // A TLB local pode ter entradas de acessos pelo kernel mesmo sem
            // o address space carregado.
            ipi::invalidate_local(start, end);

            #[cfg(feature = "tlb_shootdown")]
            smp.tlb_shootdown(space.loaded().load(), space.asid().raw(), start, end);
            #[cfg(not(feature = "tlb_shootdown"))]
            let _ = (smp, space);
        }

        for pfn in self.frames {
            pmm.put(pfn);
        }
    }
}
