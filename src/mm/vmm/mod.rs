//! # Virtual Memory Manager (VMM)
//!
//! Gerencia address spaces de usuário, page tables de 2 níveis e a máquina
//! de estados de cada página:
//!
//! ```text
//!              map / fault                evict
//!  unmapped ──────────────▶ resident ─────────────▶ swapped
//!      ▲                     │   ▲  ◀──────────────   │
//!      └──── unmap ──────────┘   │     swap-in        │
//!      ▲                         └── COW break        │
//!      └──────────────── unmap (libera a entrada) ────┘
//! ```
//!
//! ## Regras
//!
//! - PTEs folha e VMAs mudam só com o lock do address space.
//! - Reduções de permissão passam por [`tlb::PendingFlush`]: frames só
//!   voltam ao PMM depois da invalidação em todas as CPUs.
//! - I/O (swap, arquivo) nunca roda com lock do VMM; quem volta a travar
//!   revalida a PTE.
//! - Com o lock de um address space só se aloca com `ATOMIC`.

pub mod evict;
pub mod pte;
pub mod table;
pub mod tlb;

pub use evict::Evicted;
pub use pte::{Pte, PteFlags, PteKind};
pub use tlb::PendingFlush;

use crate::arch::{Cpu, CpuOps};
use crate::core::smp::Smp;
use crate::mm::addr::{Pfn, VirtAddr, VirtRange};
use crate::mm::aspace::{AddressSpace, Asid, Protection, Registry, SpaceInner, Vma, VmaBacking};
use crate::mm::cache::{FileBacking, PageCache};
use crate::mm::config::{KERNEL_PDE_START, PAGE_SHIFT, PDE_SPAN, USER_END};
use crate::mm::error::{MmError, MmResult};
use crate::mm::fault::{Failure, FaultError};
use crate::mm::pmm::Pmm;
use crate::mm::swap::{Swap, SwapBackend, SwapEntry};
use crate::sched::MmContext;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicUsize;
use spin::Once;

/// Resultado de [`Vmm::translate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Mapped { pfn: Pfn, flags: PteFlags },
    Swapped(SwapEntry),
    NotMapped,
}

pub struct Vmm {
    pmm: Arc<Pmm>,
    smp: Arc<Smp>,
    spaces: Registry,
    /// Diretório do kernel de onde as PDEs altas são copiadas
    kernel_root: Option<Pfn>,
    swap: Once<Swap>,
    files: Once<Arc<dyn FileBacking>>,
    page_cache: PageCache,
    /// Próximo address space visitado pelo reclaim
    clock_hand: AtomicUsize,
}

impl Vmm {
    pub fn new(pmm: Arc<Pmm>, smp: Arc<Smp>, kernel_root: Option<Pfn>) -> Self {
        crate::kinfo!("(VMM) Inicializado");
        Self {
            pmm,
            smp,
            spaces: Registry::new(),
            kernel_root,
            swap: Once::new(),
            files: Once::new(),
            page_cache: PageCache::new(),
            clock_hand: AtomicUsize::new(0),
        }
    }

    pub fn pmm(&self) -> &Pmm {
        &self.pmm
    }

    pub fn smp(&self) -> &Smp {
        &self.smp
    }

    pub fn page_cache(&self) -> &PageCache {
        &self.page_cache
    }

    /// Liga o backend de swap (uma vez).
    pub fn set_swap(&self, backend: Arc<dyn SwapBackend>) {
        self.swap.call_once(|| Swap::new(backend));
    }

    pub fn swap(&self) -> Option<&Swap> {
        self.swap.get()
    }

    /// Liga o colaborador que lê páginas de arquivo (uma vez).
    pub fn set_file_backing(&self, files: Arc<dyn FileBacking>) {
        self.files.call_once(|| files);
    }

    pub(crate) fn files(&self) -> Option<&dyn FileBacking> {
        self.files.get().map(|f| &**f)
    }

    pub fn space(&self, asid: Asid) -> MmResult<Arc<AddressSpace>> {
        self.spaces.get(asid)
    }

    pub fn spaces(&self) -> Vec<Arc<AddressSpace>> {
        self.spaces.snapshot()
    }

    pub(crate) fn flush(&self, flush: PendingFlush, space: &AddressSpace) {
        flush.finish(&self.pmm, &self.smp, space);
    }

    // =========================================================================
    // CICLO DE VIDA
    // =========================================================================

    /// Address space vazio (só a metade do kernel mapeada).
    pub fn create_space(&self) -> MmResult<Asid> {
        let root = table::new_root(&self.pmm, self.kernel_root)?;
        let space = self.spaces.insert(|asid| AddressSpace::new(asid, root));
        crate::kdebug!("(VMM) Address space criado, raiz=", root.as_u32());
        Ok(space.asid())
    }

    /// Desmonta tudo: páginas, entradas de swap, page tables e a raiz.
    pub fn destroy_space(&self, asid: Asid) -> MmResult<()> {
        let space = self.spaces.remove(asid)?;
        self.unload_everywhere(&space);

        let mut flush = PendingFlush::new();
        {
            let mut inner = space.lock();
            inner.dead = true;
            inner.vmas.clear();
            self.zap_range(&space, &mut inner, VirtAddr::new(0), VirtAddr::new(USER_END), &mut flush);
            self.free_empty_tables(&space, &mut inner, VirtAddr::new(0), VirtAddr::new(USER_END), &mut flush);
        }
        self.flush(flush, &space);
        self.pmm.put(space.root());
        crate::kdebug!("(VMM) Address space destruído");
        Ok(())
    }

    /// Tira o address space de toda CPU que ainda o tem carregado.
    fn unload_everywhere(&self, space: &AddressSpace) {
        let kernel = self.kernel_root.map_or(0, root_phys);
        let raw = space.asid().raw();
        let targets = space.loaded().load();
        if targets.is_empty() {
            return;
        }

        if targets.contains(Cpu::current_id()) {
            unload_local(&self.smp, raw, kernel);
        }
        let others = targets.without(Cpu::current_id()).and(self.smp.online_mask());
        if !others.is_empty() {
            let smp = self.smp.clone();
            let result = self.smp.smp_call(others, move |_| unload_local(&smp, raw, kernel), true);
            if result.is_err() {
                crate::kwarn!("(VMM) Falha ao descarregar address space em outras CPUs");
            }
        }
    }

    /// Carrega o address space na CPU atual (CR3) e entra no conjunto de
    /// CPUs alvo de shootdown.
    pub fn activate(&self, asid: Asid) -> MmResult<()> {
        let space = self.space(asid)?;
        let me = Cpu::current_id();
        let root = root_phys(space.root());

        // Entrar no conjunto antes de carregar: um shootdown concorrente
        // ou nos alcança ou acontece antes do flush do CR3.
        space.loaded().set(me);
        let prev = self.smp.this_cpu().set_loaded(root, asid.raw());
        // SAFETY: raiz válida com a metade do kernel copiada
        unsafe { Cpu::write_cr3(root) };

        if prev != 0 && prev != asid.raw() {
            if let Ok(old) = self.spaces.get(Asid::from_raw(prev)) {
                old.loaded().clear(me);
            }
        }
        Ok(())
    }

    // =========================================================================
    // MAPEAMENTO
    // =========================================================================

    /// Instala uma VMA. Falha se cruzar uma existente.
    pub fn map_region(&self, asid: Asid, vma: Vma) -> MmResult<()> {
        check_user_range(vma.start, vma.end)?;
        let space = self.space(asid)?;
        let mut inner = space.lock();
        inner.insert(vma)
    }

    /// munmap: remove VMAs (dividindo nas bordas) e desmonta as páginas.
    pub fn unmap_region(&self, asid: Asid, range: VirtRange) -> MmResult<usize> {
        check_user_range(range.start, range.end)?;
        let space = self.space(asid)?;
        let mut flush = PendingFlush::new();
        let zapped = {
            let mut inner = space.lock();
            inner.remove_range(range.start, range.end);
            let n = self.zap_range(&space, &mut inner, range.start, range.end, &mut flush);
            self.free_empty_tables(&space, &mut inner, range.start, range.end, &mut flush);
            n
        };
        self.flush(flush, &space);
        Ok(zapped)
    }

    /// Instala `pfn` em `va`. A referência do chamador passa para o
    /// mapeamento. `AlreadyMapped` se a PTE não está vazia.
    pub fn map(
        &self,
        asid: Asid,
        va: VirtAddr,
        pfn: Pfn,
        prot: Protection,
        extra: PteFlags,
    ) -> MmResult<()> {
        if !va.is_page_aligned() {
            return Err(MmError::NotAligned);
        }
        if va.as_u32() >= USER_END {
            return Err(MmError::InvalidAddress);
        }
        let space = self.space(asid)?;
        let mut inner = space.lock();
        let vma = *inner.find(va).ok_or(MmError::NoVma)?;
        if !vma.prot.contains(prot) {
            return Err(MmError::ProtectionFault);
        }

        let (slot, created) = table::walk_alloc(&self.pmm, space.root(), va)?;
        if created.is_some() {
            inner.pt_frames += 1;
        }
        if !table::load(slot).is_empty() {
            return Err(MmError::AlreadyMapped);
        }

        let mut flags = PteFlags::USER | (extra & (PteFlags::PWT | PteFlags::PCD));
        if prot.can_write() {
            flags |= PteFlags::WRITABLE;
        }
        table::store(slot, Pte::new(pfn, flags));
        inner.rss += 1;
        Ok(())
    }

    /// Desmonta as páginas de `range` sem mexer nas VMAs. Page tables que
    /// ficam vazias são liberadas. Devolve quantas PTEs foram limpas.
    pub fn unmap(&self, asid: Asid, range: VirtRange) -> MmResult<usize> {
        check_user_range(range.start, range.end)?;
        let space = self.space(asid)?;
        let mut flush = PendingFlush::new();
        let zapped = {
            let mut inner = space.lock();
            let n = self.zap_range(&space, &mut inner, range.start, range.end, &mut flush);
            self.free_empty_tables(&space, &mut inner, range.start, range.end, &mut flush);
            n
        };
        self.flush(flush, &space);
        Ok(zapped)
    }

    /// Tradução sem lock.
    pub fn translate(&self, asid: Asid, va: VirtAddr) -> MmResult<Translation> {
        let space = self.space(asid)?;
        Ok(match table::read(&self.pmm, space.root(), va).kind() {
            PteKind::Present(pfn, flags) => Translation::Mapped { pfn, flags },
            PteKind::Swap(entry) => Translation::Swapped(entry),
            PteKind::None => Translation::NotMapped,
        })
    }

    /// mprotect: reescreve a proteção das VMAs (dividindo nas bordas) e
    /// das PTEs presentes. Escrita liberada entra preguiçosamente no
    /// próximo fault de escrita; reduções invalidam a TLB.
    pub fn protect(&self, asid: Asid, range: VirtRange, prot: Protection) -> MmResult<()> {
        check_user_range(range.start, range.end)?;
        let space = self.space(asid)?;
        let mut flush = PendingFlush::new();
        {
            let mut inner = space.lock();
            let covered: u32 = inner
                .overlapping(range.start, range.end)
                .iter()
                .map(|vma| vma.clip(range.start, range.end).len())
                .sum();
            if covered != range.end.as_u32() - range.start.as_u32() {
                return Err(MmError::NoVma);
            }
            inner.reprotect(range.start, range.end, prot);

            for va in range.iter_pages() {
                let Some(slot) = table::walk(&self.pmm, space.root(), va) else {
                    continue;
                };
                let pte = table::load(slot);
                if !pte.is_present() {
                    continue;
                }
                let mut flags = pte.flags();
                if prot.can_read() {
                    flags |= PteFlags::USER;
                } else {
                    flags -= PteFlags::USER;
                }
                if !prot.can_write() {
                    flags -= PteFlags::WRITABLE;
                }
                if flags == pte.flags() {
                    continue;
                }
                let reduced = !flags.contains(pte.flags() & (PteFlags::USER | PteFlags::WRITABLE));
                table::store(slot, pte.with_flags(flags));
                if reduced {
                    flush.add_page(va);
                }
            }
        }
        self.flush(flush, &space);
        Ok(())
    }

    // =========================================================================
    // FORK
    // =========================================================================

    /// Duplica o address space: páginas privadas viram COW nos dois lados
    /// (refcount +1), VMAs compartilhadas continuam graváveis.
    /// Páginas no swap são trazidas antes, assim cada entrada de swap
    /// segue com um único dono.
    pub fn clone_space(&self, asid: Asid) -> MmResult<Asid> {
        let src = self.space(asid)?;
        let child = self.create_space()?;
        let dst = self.space(child)?;

        let mut flush = PendingFlush::new();
        let outcome = loop {
            let (mut s, mut d) = if src.asid().index() < dst.asid().index() {
                let s = src.lock();
                (s, dst.lock())
            } else {
                let d = dst.lock();
                (src.lock(), d)
            };

            if let Some(va) = self.first_swapped(&src, &s) {
                drop(d);
                drop(s);
                if let Err(err) = self.swap_in_for_fork(asid, va) {
                    break Err(err);
                }
                continue;
            }

            break self.copy_mappings(&src, &mut s, &dst, &mut d, &mut flush);
        };

        self.flush(flush, &src);
        match outcome {
            Ok(()) => {
                crate::kdebug!("(VMM) Fork, páginas=", dst.rss() as u64);
                Ok(child)
            }
            Err(err) => {
                let _ = self.destroy_space(child);
                Err(err)
            }
        }
    }

    fn first_swapped(&self, space: &AddressSpace, inner: &SpaceInner) -> Option<VirtAddr> {
        if inner.vmas.is_empty() {
            return None;
        }
        table::user_tables(&self.pmm, space.root()).find_map(|(pd, pt)| {
            table::table_entries(&self.pmm, pt)
                .find(|(_, pte)| pte.swap_entry().is_some())
                .map(|(i, _)| table::va_of(pd, i))
        })
    }

    fn swap_in_for_fork(&self, asid: Asid, va: VirtAddr) -> MmResult<()> {
        let space = self.space(asid)?;
        self.resolve(&space, va, FaultError::USER, false)
            .map_err(Failure::into_mm_error)
    }

    fn copy_mappings(
        &self,
        src: &AddressSpace,
        s: &mut SpaceInner,
        dst: &AddressSpace,
        d: &mut SpaceInner,
        flush: &mut PendingFlush,
    ) -> MmResult<()> {
        for vma in s.vmas.values() {
            d.vmas.insert(vma.start.as_u32(), *vma);
        }

        let tables: Vec<(usize, Pfn)> = table::user_tables(&self.pmm, src.root()).collect();
        for (pd, pt) in tables {
            for (i, slot) in table::slots(&self.pmm, pt).iter().enumerate() {
                let pte = table::load(slot);
                let Some(pfn) = pte.pfn() else { continue };
                let va = table::va_of(pd, i);
                let Some(vma) = s.find(va).copied() else { continue };

                let mut child = pte;
                let device = matches!(vma.backing, VmaBacking::Device { .. });
                if !device && !vma.is_shared() {
                    let flags = (pte.flags() - PteFlags::WRITABLE) | PteFlags::COW;
                    child = pte.with_flags(flags);
                    if child.raw() != pte.raw() {
                        table::store(slot, child);
                    }
                    if pte.is_writable() {
                        flush.add_page(va);
                    }
                }

                let (dslot, created) = table::walk_alloc(&self.pmm, dst.root(), va)?;
                if created.is_some() {
                    d.pt_frames += 1;
                }
                if !device {
                    self.pmm.get(pfn);
                }
                table::store(dslot, child.with_flags(child.flags() - PteFlags::ACCESSED));
                d.rss += 1;
            }
        }
        Ok(())
    }

    // =========================================================================
    // HELPERS (lock do address space segurado)
    // =========================================================================

    /// Limpa as PTEs de `[start, end)`. Frames vão para `flush`; entradas
    /// de swap sem I/O em andamento são liberadas (com I/O em andamento,
    /// quem termina o I/O libera ao ver a PTE trocada).
    pub(crate) fn zap_range(
        &self,
        space: &AddressSpace,
        inner: &mut SpaceInner,
        start: VirtAddr,
        end: VirtAddr,
        flush: &mut PendingFlush,
    ) -> usize {
        let mut zapped = 0;
        let tables: Vec<(usize, Pfn)> = table::user_tables(&self.pmm, space.root())
            .filter(|&(pd, _)| {
                let base = table::va_of(pd, 0).as_u32();
                base < end.as_u32() && start.as_u32() <= base + (PDE_SPAN - 1)
            })
            .collect();

        for (pd, pt) in tables {
            for (i, slot) in table::slots(&self.pmm, pt).iter().enumerate() {
                let va = table::va_of(pd, i);
                if va < start || va >= end {
                    continue;
                }
                let pte = table::load(slot);
                match pte.kind() {
                    PteKind::None => continue,
                    PteKind::Present(pfn, _) => {
                        table::store(slot, Pte::EMPTY);
                        inner.rss = inner.rss.saturating_sub(1);
                        flush.add_page(va);
                        if self.pmm.is_managed(pfn) {
                            flush.release(pfn);
                        }
                    }
                    PteKind::Swap(entry) => {
                        table::store(slot, Pte::EMPTY);
                        if let Some(swap) = self.swap() {
                            if swap.cache().lookup(entry).is_none() {
                                swap.backend().free(entry);
                            }
                        }
                    }
                }
                zapped += 1;
            }
        }
        zapped
    }

    /// Solta page tables vazias que cruzam `[start, end)`.
    pub(crate) fn free_empty_tables(
        &self,
        space: &AddressSpace,
        inner: &mut SpaceInner,
        start: VirtAddr,
        end: VirtAddr,
        flush: &mut PendingFlush,
    ) {
        let first = start.pd_index();
        let last = (end.as_u32().saturating_sub(1) >> 22) as usize;
        for pd in first..=last.min(KERNEL_PDE_START - 1) {
            let va = table::va_of(pd, 0);
            if let Some(pt) = table::detach_if_empty(&self.pmm, space.root(), va) {
                inner.pt_frames = inner.pt_frames.saturating_sub(1);
                flush.add_range(va, VirtAddr::new(va.as_u32().saturating_add(PDE_SPAN - 1)));
                flush.release(pt);
            }
        }
    }
}

/// Endereço físico da raiz como vai no CR3.
pub(crate) fn root_phys(root: Pfn) -> u32 {
    root.as_u32() << PAGE_SHIFT
}

fn check_user_range(start: VirtAddr, end: VirtAddr) -> MmResult<()> {
    if !start.is_page_aligned() || !end.is_page_aligned() {
        return Err(MmError::NotAligned);
    }
    if start >= end {
        return Err(MmError::InvalidSize);
    }
    if end.as_u32() > USER_END {
        return Err(MmError::InvalidAddress);
    }
    Ok(())
}

/// Troca para a raiz do kernel se `space` está carregado nesta CPU.
fn unload_local(smp: &Smp, space: u64, kernel_root: u32) {
    let cpu = smp.this_cpu();
    if cpu.loaded_space() == space {
        cpu.set_loaded(kernel_root, 0);
        // SAFETY: a raiz do kernel mapeia todo o kernel
        unsafe { Cpu::write_cr3(kernel_root) };
    }
}

impl MmContext for Vmm {
    fn switch_mm(&self, next: Asid) {
        if self.activate(next).is_err() {
            crate::kwarn!("(VMM) switch_mm com address space inválido: ", next.raw());
        }
    }
}
