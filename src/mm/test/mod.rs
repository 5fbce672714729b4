//! # Testes do Subsistema de Memória
//!
//! Rodam sobre a HAL simulada (`klib::testkit::Memory`):
//! - `pmm` - buddy, zonas, reservas, referências
//! - `vmm` - map/unmap, demand-zero, COW, mprotect, fork, pilha
//! - `swap` - evict / swap-in, falhas de I/O, reclaim
//! - `file` - páginas de arquivo via page cache
//! - `shootdown` - invalidação de TLB em outra CPU
//! - `audit` - auditor de invariantes

mod pmm;
#[cfg(feature = "tlb_shootdown")]
mod shootdown;
mod swap;
mod vmm;

use crate::arch::hosted::enter_cpu;
use crate::core::smp::Smp;
use crate::klib::testkit::Memory;
use crate::mm::{Asid, Protection, Vma, VirtAddr, VirtRange};
use alloc::sync::Arc;

/// Uma CPU, memória simulada com swap em RAM.
pub(super) fn memory() -> Memory {
    enter_cpu(0);
    let smp = Arc::new(Smp::new(1));
    smp.mark_boot_cpu_online(0);
    Memory::new(smp)
}

/// Address space com uma VMA anônima `[start, end)`.
pub(super) fn space_with(mem: &Memory, start: u32, end: u32, prot: Protection) -> Asid {
    let asid = mem.vmm.create_space().unwrap();
    mem.vmm.map_region(asid, Vma::anonymous(start, end, prot)).unwrap();
    asid
}

pub(super) fn va(addr: u32) -> VirtAddr {
    VirtAddr::new(addr)
}

pub(super) fn range(start: u32, len: u32) -> VirtRange {
    VirtRange::new(start, len).unwrap()
}
