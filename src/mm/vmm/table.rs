//! # Page Tables de 2 níveis
//!
//! Page directory (1024 PDEs) → page table (1024 PTEs). Os nós são frames
//! do PMM acessados pelo mapa linear do kernel; cada entrada é lida e
//! escrita como `AtomicU32`, assim a tradução não precisa de lock e os bits
//! A/D podem ser ligados em paralelo pelo walker.
//!
//! Regras:
//! - PTEs folha só mudam com o lock do address space.
//! - PDEs do kernel (a partir de `KERNEL_PDE_START`) são copiadas da raiz
//!   do kernel na criação e nunca tocadas por operações de usuário.

use super::pte::{Pte, PteFlags};
use crate::mm::addr::{Pfn, VirtAddr};
use crate::mm::config::{ENTRIES_PER_TABLE, KERNEL_PDE_START};
use crate::mm::error::MmResult;
use crate::mm::pmm::{AllocFlags, FrameUsage, Pmm};
use core::sync::atomic::{AtomicU32, Ordering};

/// Flags de uma PDE de usuário: as permissões efetivas ficam na PTE.
const USER_PDE: PteFlags = PteFlags::PRESENT
    .union(PteFlags::WRITABLE)
    .union(PteFlags::USER);

/// Entradas de um nó (diretório ou tabela).
fn entries(pmm: &Pmm, node: Pfn) -> &[AtomicU32] {
    let Some(ptr) = pmm.frame_to_virt(node) else {
        panic!("VMM: page table fora do mapa linear");
    };
    // SAFETY: o nó é um frame inteiro (1024 × u32, alinhado a 4 KiB) dentro
    // do mapa linear, vivo enquanto a page table existir.
    unsafe { core::slice::from_raw_parts(ptr as *const AtomicU32, ENTRIES_PER_TABLE) }
}

/// Slots de um nó, para varreduras que reescrevem entradas.
pub fn slots(pmm: &Pmm, node: Pfn) -> &[AtomicU32] {
    entries(pmm, node)
}

/// PDE que cobre `va`.
pub fn pde(pmm: &Pmm, root: Pfn, va: VirtAddr) -> Pte {
    Pte::from_raw(entries(pmm, root)[va.pd_index()].load(Ordering::Acquire))
}

/// Slot da PTE de `va`, se a page table existir.
pub fn walk(pmm: &Pmm, root: Pfn, va: VirtAddr) -> Option<&AtomicU32> {
    let table = pde(pmm, root, va).pfn()?;
    Some(&entries(pmm, table)[va.pt_index()])
}

/// PTE atual de `va` (vazia se não há tabela).
pub fn read(pmm: &Pmm, root: Pfn, va: VirtAddr) -> Pte {
    walk(pmm, root, va).map_or(Pte::EMPTY, |slot| Pte::from_raw(slot.load(Ordering::Acquire)))
}

/// Como [`walk`], criando a page table se faltar. Devolve também o frame
/// da tabela nova, quando houve.
///
/// Chamado com o lock do address space: a alocação é ATOMIC (sem reclaim).
pub fn walk_alloc(pmm: &Pmm, root: Pfn, va: VirtAddr) -> MmResult<(&AtomicU32, Option<Pfn>)> {
    let pd = entries(pmm, root);
    let slot = &pd[va.pd_index()];
    let current = Pte::from_raw(slot.load(Ordering::Acquire));

    if let Some(table) = current.pfn() {
        return Ok((&entries(pmm, table)[va.pt_index()], None));
    }

    let table = pmm.alloc_page(FrameUsage::PageTable, AllocFlags::ATOMIC | AllocFlags::ZERO)?;
    slot.store(Pte::new(table, USER_PDE).raw(), Ordering::Release);
    Ok((&entries(pmm, table)[va.pt_index()], Some(table)))
}

/// Desliga a page table de `va` se todas as entradas estão vazias.
/// Devolve o frame, que só pode voltar ao PMM depois do flush de TLB.
pub fn detach_if_empty(pmm: &Pmm, root: Pfn, va: VirtAddr) -> Option<Pfn> {
    let slot = &entries(pmm, root)[va.pd_index()];
    let table = Pte::from_raw(slot.load(Ordering::Acquire)).pfn()?;
    let empty = entries(pmm, table).iter().all(|e| e.load(Ordering::Acquire) == 0);
    if !empty {
        return None;
    }
    slot.store(0, Ordering::Release);
    Some(table)
}

/// Aloca um page directory zerado com a metade do kernel copiada de
/// `kernel_root`.
pub fn new_root(pmm: &Pmm, kernel_root: Option<Pfn>) -> MmResult<Pfn> {
    let root = pmm.alloc_page(FrameUsage::PageTable, AllocFlags::ZERO)?;
    if let Some(kernel) = kernel_root {
        let src = entries(pmm, kernel);
        let dst = entries(pmm, root);
        for i in KERNEL_PDE_START..ENTRIES_PER_TABLE {
            dst[i].store(src[i].load(Ordering::Acquire), Ordering::Relaxed);
        }
    }
    Ok(root)
}

/// Page tables de usuário presentes: `(índice do diretório, frame)`.
pub fn user_tables(pmm: &Pmm, root: Pfn) -> impl Iterator<Item = (usize, Pfn)> + '_ {
    entries(pmm, root)[..KERNEL_PDE_START]
        .iter()
        .enumerate()
        .filter_map(|(i, e)| Pte::from_raw(e.load(Ordering::Acquire)).pfn().map(|pfn| (i, pfn)))
}

/// PTEs não vazias de uma page table: `(índice, pte)`.
pub fn table_entries(pmm: &Pmm, table: Pfn) -> impl Iterator<Item = (usize, Pte)> + '_ {
    entries(pmm, table)
        .iter()
        .enumerate()
        .map(|(i, e)| (i, Pte::from_raw(e.load(Ordering::Acquire))))
        .filter(|(_, pte)| !pte.is_empty())
}

/// Endereço virtual de `(pd, pt)`.
pub fn va_of(pd: usize, pt: usize) -> VirtAddr {
    VirtAddr::new(((pd << 22) | (pt << 12)) as u32)
}

/// Liga bits de flag sem perder atualizações concorrentes (A/D).
pub fn set_bits(slot: &AtomicU32, flags: PteFlags) -> Pte {
    Pte::from_raw(slot.fetch_or(flags.bits(), Ordering::AcqRel))
}

/// Desliga bits de flag; devolve a PTE anterior.
pub fn clear_bits(slot: &AtomicU32, flags: PteFlags) -> Pte {
    Pte::from_raw(slot.fetch_and(!flags.bits(), Ordering::AcqRel))
}

pub fn load(slot: &AtomicU32) -> Pte {
    Pte::from_raw(slot.load(Ordering::Acquire))
}

pub fn store(slot: &AtomicU32, pte: Pte) {
    slot.store(pte.raw(), Ordering::Release);
}

/// Troca a PTE só se ela ainda for `expected`.
pub fn replace(slot: &AtomicU32, expected: Pte, new: Pte) -> bool {
    slot.compare_exchange(expected.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}
