//! # Auditor de memória
//!
//! Varre o estado vivo e devolve a primeira violação encontrada:
//!
//! 1. contabilidade de frames por zona (`livres + reservados + alocados = total`);
//! 2. um frame aparece em no máximo `refcount` mapeamentos e em no máximo
//!    uma entrada do page cache;
//! 3. nenhuma PTE com WRITABLE e COW ao mesmo tempo;
//! 4. VMAs disjuntas, e toda página mapeada dentro de uma VMA compatível;
//! 5. toda entrada de swap numa PTE está alocada e tem um único dono.
//!
//! Cada address space é travado por vez; roda fora de IRQ (via deferred work).

use crate::mm::addr::{Pfn, VirtAddr};
use crate::mm::aspace::Asid;
use crate::mm::pmm::ZoneType;
use crate::mm::swap::SwapEntry;
use crate::mm::vmm::{table, PteFlags, PteKind, Vmm};
use alloc::collections::BTreeMap;

/// Invariante quebrado
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    FrameAccounting { zone: ZoneType, pfn: Pfn },
    FrameOverMapped { pfn: Pfn, mappings: usize, refcount: u32 },
    FrameMultiplyCached { pfn: Pfn },
    CowWritable { asid: Asid, va: VirtAddr },
    VmaOverlap { asid: Asid, va: VirtAddr },
    MappedOutsideVma { asid: Asid, va: VirtAddr },
    SwapEntryFree { asid: Asid, va: VirtAddr, entry: SwapEntry },
    SwapEntryShared { entry: SwapEntry },
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrameAccounting { .. } => "contabilidade de zona inconsistente",
            Self::FrameOverMapped { .. } => "frame com mais mapeamentos que referências",
            Self::FrameMultiplyCached { .. } => "frame em mais de uma entrada do page cache",
            Self::CowWritable { .. } => "PTE gravável marcada COW",
            Self::VmaOverlap { .. } => "VMAs sobrepostas",
            Self::MappedOutsideVma { .. } => "página mapeada fora de VMA compatível",
            Self::SwapEntryFree { .. } => "PTE aponta para entrada de swap livre",
            Self::SwapEntryShared { .. } => "entrada de swap com mais de um dono",
        }
    }
}

/// Roda todas as verificações.
pub fn audit(vmm: &Vmm) -> Result<(), Violation> {
    let pmm = vmm.pmm();
    for zone in pmm.zones() {
        if zone.span().is_empty() {
            continue;
        }
        pmm.check_zone(zone).map_err(|pfn| Violation::FrameAccounting {
            zone: zone.kind(),
            pfn,
        })?;
    }

    let mut mappings: BTreeMap<Pfn, usize> = BTreeMap::new();
    let mut owners: BTreeMap<SwapEntry, usize> = BTreeMap::new();

    for space in vmm.spaces() {
        let asid = space.asid();
        let inner = space.lock();
        inner
            .check_disjoint()
            .map_err(|va| Violation::VmaOverlap { asid, va })?;

        for (pd, pt) in table::user_tables(pmm, space.root()) {
            for (i, pte) in table::table_entries(pmm, pt) {
                let va = table::va_of(pd, i);
                match pte.kind() {
                    PteKind::Present(pfn, flags) => {
                        if flags.contains(PteFlags::WRITABLE | PteFlags::COW) {
                            return Err(Violation::CowWritable { asid, va });
                        }
                        let compatible = inner.find(va).is_some_and(|vma| {
                            !flags.contains(PteFlags::WRITABLE) || vma.prot.can_write()
                        });
                        if !compatible {
                            return Err(Violation::MappedOutsideVma { asid, va });
                        }
                        if pmm.is_managed(pfn) {
                            *mappings.entry(pfn).or_default() += 1;
                        }
                    }
                    PteKind::Swap(entry) => {
                        let allocated = vmm
                            .swap()
                            .is_some_and(|swap| swap.backend().is_allocated(entry));
                        if !allocated {
                            return Err(Violation::SwapEntryFree { asid, va, entry });
                        }
                        *owners.entry(entry).or_default() += 1;
                    }
                    PteKind::None => {}
                }
            }
        }
    }

    for (&pfn, &count) in &mappings {
        let refcount = pmm.refcount(pfn);
        if count > refcount as usize {
            return Err(Violation::FrameOverMapped {
                pfn,
                mappings: count,
                refcount,
            });
        }
        if vmm.page_cache().entries_for(pfn) > 1 {
            return Err(Violation::FrameMultiplyCached { pfn });
        }
    }

    if let Some((&entry, _)) = owners.iter().find(|(_, &n)| n > 1) {
        return Err(Violation::SwapEntryShared { entry });
    }
    Ok(())
}

/// Versão para o tick: registra a violação em vez de devolvê-la.
pub fn audit_and_log(vmm: &Vmm) -> bool {
    match audit(vmm) {
        Ok(()) => true,
        Err(violation) => {
            crate::kerror!("(VMM) Auditoria falhou: ");
            crate::kerror!(violation.as_str());
            false
        }
    }
}
