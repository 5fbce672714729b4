//! # Page Fault Handler
//!
//! Classifica um #PF e resolve sob o lock do address space. Primeira regra
//! que casa vence:
//!
//! | Situação                                  | Ação                      |
//! |-------------------------------------------|---------------------------|
//! | sem VMA (fora da guarda de pilha)         | SIGSEGV / Fatal           |
//! | permissão da VMA não cobre o acesso       | SIGSEGV / Fatal           |
//! | escrita em página presente sem WRITABLE   | COW break ou grant        |
//! | PTE vazia, VMA anônima                    | demand-zero               |
//! | PTE com entrada de swap                   | swap-in                   |
//! | PTE vazia, VMA de arquivo                 | page cache                |
//! | PTE vazia, VMA de dispositivo             | frame do dispositivo      |
//! | presente e permitido                      | espúrio (TLB velha)       |
//!
//! Alocação e I/O nunca acontecem com o lock: o passo devolve o que falta
//! (frame, página de arquivo, leitura de swap), o laço providencia e tenta
//! de novo, revalidando tudo.

use crate::arch::{Cpu, CpuOps};
use crate::core::smp::ipi;
use crate::mm::addr::{Pfn, VirtAddr};
use crate::mm::aspace::{AddressSpace, Asid, SpaceInner, Vma, VmaBacking, VmaFlags};
use crate::mm::cache::pagecache::{Inode, PageIndex};
use crate::mm::config::{PAGE_SIZE, STACK_GUARD_GAP, USER_END};
use crate::mm::error::MmError;
use crate::mm::pmm::{AllocFlags, FrameUsage};
use crate::mm::swap::{SlotState, SwapEntry};
use crate::mm::vmm::{root_phys, table, PendingFlush, Pte, PteFlags, PteKind, Vmm};
use crate::sys::{Errno, Signal};

bitflags::bitflags! {
    /// Código de erro empilhado pelo #PF
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultError: u32 {
        /// Página presente (violação de proteção)
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        /// Acesso em ring 3
        const USER = 1 << 2;
        /// Bit reservado ligado numa entrada
        const RSVD = 1 << 3;
        const IFETCH = 1 << 4;
    }
}

/// Resultado de [`Vmm::fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResult {
    Handled,
    Signal(Signal),
    /// Fault do kernel sem conserto
    Fatal,
}

/// Por que a resolução falhou
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Segv,
    Oom,
    Io,
}

impl Failure {
    fn signal(self) -> Signal {
        match self {
            Self::Segv => Signal::SigSegv,
            Self::Oom => Signal::SigKill,
            Self::Io => Signal::SigBus,
        }
    }

    fn errno(self) -> Errno {
        match self {
            Self::Segv => Errno::EFAULT,
            Self::Oom => Errno::ENOMEM,
            Self::Io => Errno::EIO,
        }
    }

    pub(crate) fn into_mm_error(self) -> MmError {
        match self {
            Self::Segv => MmError::NoVma,
            Self::Oom => MmError::OutOfMemory,
            Self::Io => MmError::Io,
        }
    }

    fn from_mm(err: MmError) -> Self {
        match err {
            MmError::OutOfMemory => Self::Oom,
            _ => Self::Io,
        }
    }
}

/// O que o passo sob lock pediu ao laço
enum Step {
    Done,
    Retry,
    NeedFrame,
    NeedFilePage(Inode, PageIndex),
    SwapRead { entry: SwapEntry, frame: Pfn },
    /// Outro CPU está lendo a mesma entrada de swap
    Wait,
}

/// Recursos preparados fora do lock
#[derive(Default)]
struct Prepared {
    frame: Option<Pfn>,
    file_page: Option<Pfn>,
}

/// Tentativas de `read_user`/`write_user` por página antes de desistir.
const USER_ACCESS_RETRIES: usize = 8;

impl Vmm {
    /// Ponto de entrada do #PF. Faults de usuário nunca são `Fatal`.
    pub fn fault(&self, asid: Asid, va: VirtAddr, error: FaultError) -> FaultResult {
        let user = error.contains(FaultError::USER);
        let reject = || {
            if user {
                FaultResult::Signal(Signal::SigSegv)
            } else {
                crate::kerror!("(VMM) Page fault do kernel em ", va.as_u32());
                FaultResult::Fatal
            }
        };

        if error.contains(FaultError::RSVD) || va.as_u32() >= USER_END {
            return reject();
        }
        let Ok(space) = self.space(asid) else {
            return reject();
        };

        match self.resolve(&space, va, error, true) {
            Ok(()) => FaultResult::Handled,
            Err(failure) if user => {
                crate::kdebug!("(VMM) Fault de usuário não resolvido em ", va.as_u32());
                FaultResult::Signal(failure.signal())
            }
            Err(_) => {
                crate::kerror!("(VMM) Fault do kernel não resolvido em ", va.as_u32());
                FaultResult::Fatal
            }
        }
    }

    /// Laço de resolução. `check_prot = false` só é usado para trazer do
    /// swap páginas de VMAs sem permissão de leitura (fork).
    pub(crate) fn resolve(
        &self,
        space: &AddressSpace,
        va: VirtAddr,
        error: FaultError,
        check_prot: bool,
    ) -> Result<(), Failure> {
        let mut prepared = Prepared::default();
        let outcome = loop {
            let mut flush = PendingFlush::new();
            let step = {
                let mut inner = space.lock();
                self.step(space, &mut inner, va, error, check_prot, &mut prepared, &mut flush)
            };
            self.flush(flush, space);

            match step {
                Ok(Step::Done) => break Ok(()),
                Ok(Step::Retry) => continue,
                Ok(Step::Wait) => Cpu::pause(),
                Ok(Step::NeedFrame) => {
                    match self.pmm().alloc_page(FrameUsage::Anon, AllocFlags::ZERO) {
                        Ok(pfn) => prepared.frame = Some(pfn),
                        Err(_) => break Err(Failure::Oom),
                    }
                }
                Ok(Step::NeedFilePage(inode, index)) => {
                    let Some(files) = self.files() else {
                        break Err(Failure::Io);
                    };
                    match self.page_cache().get(self.pmm(), files, inode, index) {
                        Ok(pfn) => prepared.file_page = Some(pfn),
                        Err(err) => break Err(Failure::from_mm(err)),
                    }
                }
                Ok(Step::SwapRead { entry, frame }) => {
                    if let Err(failure) = self.finish_swap_in(space, va, entry, frame) {
                        break Err(failure);
                    }
                }
                Err(failure) => break Err(failure),
            }
        };

        for pfn in [prepared.frame, prepared.file_page].into_iter().flatten() {
            self.pmm().put(pfn);
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        space: &AddressSpace,
        inner: &mut SpaceInner,
        va: VirtAddr,
        error: FaultError,
        check_prot: bool,
        prepared: &mut Prepared,
        flush: &mut PendingFlush,
    ) -> Result<Step, Failure> {
        let page = va.page_base();
        let write = error.contains(FaultError::WRITE);

        if inner.dead {
            return Err(Failure::Segv);
        }
        let vma = match inner.find(va) {
            Some(vma) => *vma,
            None => grow_stack(inner, page).ok_or(Failure::Segv)?,
        };
        if check_prot && !permits(&vma, error) {
            return Err(Failure::Segv);
        }

        let (slot, created) = table::walk_alloc(self.pmm(), space.root(), page)
            .map_err(|_| Failure::Oom)?;
        if created.is_some() {
            inner.pt_frames += 1;
        }
        let pte = table::load(slot);

        match pte.kind() {
            PteKind::Present(pfn, flags) => {
                if write && !flags.contains(PteFlags::WRITABLE) {
                    return Ok(self.write_protected(&vma, slot, page, pte, pfn, prepared, flush));
                }
                // Permitido e presente: TLB velha ou USER concedido depois
                // de um mprotect.
                let mut touched = PteFlags::ACCESSED;
                if write {
                    touched |= PteFlags::DIRTY;
                }
                if check_prot {
                    touched |= PteFlags::USER;
                }
                table::set_bits(slot, touched);
                ipi::invalidate_local(page.as_u32(), page.as_u32() + PAGE_SIZE as u32);
                Ok(Step::Done)
            }
            PteKind::Swap(entry) => self.swap_in_step(inner, &vma, slot, entry, write, prepared),
            PteKind::None => self.populate(inner, &vma, slot, page, write, prepared),
        }
    }

    /// Escrita numa página presente sem WRITABLE dentro de VMA gravável.
    fn write_protected(
        &self,
        vma: &Vma,
        slot: &core::sync::atomic::AtomicU32,
        page: VirtAddr,
        pte: Pte,
        pfn: Pfn,
        prepared: &mut Prepared,
        flush: &mut PendingFlush,
    ) -> Step {
        let granted = (pte.flags() - PteFlags::COW)
            | vma.pte_flags(true)
            | PteFlags::ACCESSED
            | PteFlags::DIRTY;

        let device = matches!(vma.backing, VmaBacking::Device { .. });
        let exclusive = self.pmm().refcount(pfn) == 1 && self.pmm().usage(pfn) == FrameUsage::Anon;
        if vma.is_shared() || device || exclusive {
            table::store(slot, pte.with_flags(granted));
            ipi::invalidate_local(page.as_u32(), page.as_u32() + PAGE_SIZE as u32);
            return Step::Done;
        }

        // COW com outros donos: copia
        let Some(copy) = prepared.frame.take() else {
            return Step::NeedFrame;
        };
        self.pmm().copy_frame(copy, pfn);
        table::store(slot, Pte::new(copy, granted));
        flush.add_page(page);
        flush.release(pfn);
        crate::ktrace!("(VMM) COW break em ", page.as_u32());
        Step::Done
    }

    /// PTE vazia: demand-zero, page cache ou dispositivo.
    fn populate(
        &self,
        inner: &mut SpaceInner,
        vma: &Vma,
        slot: &core::sync::atomic::AtomicU32,
        page: VirtAddr,
        write: bool,
        prepared: &mut Prepared,
    ) -> Result<Step, Failure> {
        let mut touched = PteFlags::ACCESSED;
        if write {
            touched |= PteFlags::DIRTY;
        }

        match vma.backing {
            VmaBacking::Anonymous => {
                let Some(frame) = prepared.frame.take() else {
                    return Ok(Step::NeedFrame);
                };
                table::store(slot, Pte::new(frame, vma.pte_flags(true) | touched));
                inner.rss += 1;
                Ok(Step::Done)
            }
            VmaBacking::File { .. } => {
                let Some((inode, index)) = vma.file_page(page) else {
                    return Err(Failure::Segv);
                };
                let Some(frame) = prepared.file_page.take() else {
                    return Ok(Step::NeedFilePage(inode, index));
                };
                let flags = if vma.is_shared() {
                    vma.pte_flags(true) | touched
                } else if vma.prot.can_write() {
                    vma.pte_flags(false) | PteFlags::COW | PteFlags::ACCESSED
                } else {
                    vma.pte_flags(false) | PteFlags::ACCESSED
                };
                table::store(slot, Pte::new(frame, flags));
                inner.rss += 1;
                // Escrita em privada: o próximo passo quebra o COW
                Ok(if write && !flags.contains(PteFlags::WRITABLE) {
                    Step::Retry
                } else {
                    Step::Done
                })
            }
            VmaBacking::Device { .. } => {
                let frame = vma.device_frame(page).ok_or(Failure::Segv)?;
                table::store(slot, Pte::new(frame, vma.pte_flags(true) | touched));
                inner.rss += 1;
                Ok(Step::Done)
            }
        }
    }

    /// PTE com entrada de swap. Se a entrada ainda está em writeback, o
    /// frame volta direto do swap cache.
    fn swap_in_step(
        &self,
        inner: &mut SpaceInner,
        vma: &Vma,
        slot: &core::sync::atomic::AtomicU32,
        entry: SwapEntry,
        write: bool,
        prepared: &mut Prepared,
    ) -> Result<Step, Failure> {
        let swap = self.swap().ok_or(Failure::Io)?;

        match swap.cache().lookup(entry) {
            Some((frame, SlotState::Writeback)) => {
                // A entrada é liberada por quem terminar o writeback
                self.pmm().get(frame);
                table::store(slot, Pte::new(frame, vma.pte_flags(true) | swapped_in_flags(write)));
                inner.rss += 1;
                Ok(Step::Done)
            }
            Some((_, SlotState::Reading)) => Ok(Step::Wait),
            None => {
                let Some(frame) = prepared.frame.take() else {
                    return Ok(Step::NeedFrame);
                };
                swap.cache().insert(entry, frame, SlotState::Reading);
                Ok(Step::SwapRead { entry, frame })
            }
        }
    }

    /// Lê a entrada sem locks e instala o frame se a PTE não mudou.
    fn finish_swap_in(
        &self,
        space: &AddressSpace,
        va: VirtAddr,
        entry: SwapEntry,
        frame: Pfn,
    ) -> Result<(), Failure> {
        let swap = self.swap().ok_or(Failure::Io)?;
        let read = self
            .pmm()
            .with_page_mut(frame, |page| swap.backend().read(entry, page));

        let mut inner = space.lock();
        swap.cache().remove(entry);

        let page = va.page_base();
        let current = table::walk(self.pmm(), space.root(), page);
        let unchanged = !inner.dead && current.is_some_and(|slot| table::load(slot) == Pte::swap(entry));

        if !unchanged {
            // Desmapeado durante a leitura: a entrada ficou para nós
            drop(inner);
            self.pmm().put(frame);
            swap.backend().free(entry);
            return Ok(());
        }
        if read.is_err() {
            drop(inner);
            self.pmm().put(frame);
            crate::kwarn!("(Swap) Erro de leitura, entrada ", entry.id() as u64);
            return Err(Failure::Io);
        }

        let flags = inner
            .find(page)
            .map_or(PteFlags::empty(), |vma| vma.pte_flags(true))
            | PteFlags::ACCESSED;
        if let Some(slot) = current {
            table::store(slot, Pte::new(frame, flags));
        }
        inner.rss += 1;
        drop(inner);

        swap.backend().free(entry);
        swap.count_in();
        crate::ktrace!("(Swap) Página trazida de volta: ", entry.id() as u64);
        Ok(())
    }

    // =========================================================================
    // ACESSO A MEMÓRIA DE USUÁRIO
    // =========================================================================

    /// Copia de memória de usuário, trazendo páginas via fault quando
    /// preciso. Erros viram errno em vez de sinal.
    pub fn read_user(&self, asid: Asid, va: VirtAddr, buf: &mut [u8]) -> Result<(), Errno> {
        let space = self.space(asid).map_err(|_| Errno::EFAULT)?;
        let mut done = 0;
        while done < buf.len() {
            let cur = user_addr(va, done)?;
            let n = (PAGE_SIZE - cur.page_offset()).min(buf.len() - done);
            let pfn = self.user_frame(&space, cur, false)?;
            self.pmm().read_bytes(pfn, cur.page_offset(), &mut buf[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Copia para memória de usuário (quebrando COW quando preciso).
    pub fn write_user(&self, asid: Asid, va: VirtAddr, data: &[u8]) -> Result<(), Errno> {
        let space = self.space(asid).map_err(|_| Errno::EFAULT)?;
        let mut done = 0;
        while done < data.len() {
            let cur = user_addr(va, done)?;
            let n = (PAGE_SIZE - cur.page_offset()).min(data.len() - done);
            let pfn = self.user_frame(&space, cur, true)?;
            self.pmm().write_bytes(pfn, cur.page_offset(), &data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Tradução como a MMU faria: TLB, depois walk em software (ligando
    /// A/D e enchendo a TLB), depois fault.
    fn user_frame(&self, space: &AddressSpace, va: VirtAddr, write: bool) -> Result<Pfn, Errno> {
        let root = root_phys(space.root());
        let allows = |pte: Pte| {
            pte.is_present()
                && pte.flags().contains(PteFlags::USER)
                && (!write || pte.flags().contains(PteFlags::WRITABLE))
        };

        for _ in 0..USER_ACCESS_RETRIES {
            if let Some(cached) = Cpu::tlb_lookup(root, va.as_u32()).map(Pte::from_raw) {
                if allows(cached) {
                    if let Some(pfn) = cached.pfn() {
                        return Ok(pfn);
                    }
                }
            }

            let mut error = FaultError::USER;
            if let Some(slot) = table::walk(self.pmm(), space.root(), va) {
                let pte = table::load(slot);
                if allows(pte) {
                    let mut touched = PteFlags::ACCESSED;
                    if write {
                        touched |= PteFlags::DIRTY;
                    }
                    let old = table::set_bits(slot, touched);
                    // Re-checa: a PTE pode ter sido trocada entre load e set
                    if let (true, Some(pfn)) = (allows(old), old.pfn()) {
                        Cpu::tlb_fill(root, va.as_u32(), old.raw() | touched.bits());
                        return Ok(pfn);
                    }
                }
                if pte.is_present() {
                    error |= FaultError::PRESENT;
                }
            }
            if write {
                error |= FaultError::WRITE;
            }
            self.resolve(space, va, error, true).map_err(Failure::errno)?;
        }
        Err(Errno::EFAULT)
    }
}

fn user_addr(base: VirtAddr, offset: usize) -> Result<VirtAddr, Errno> {
    let va = base.checked_add(offset as u32).ok_or(Errno::EFAULT)?;
    if va.as_u32() >= USER_END {
        return Err(Errno::EFAULT);
    }
    Ok(va)
}

fn swapped_in_flags(write: bool) -> PteFlags {
    if write {
        PteFlags::ACCESSED | PteFlags::DIRTY
    } else {
        PteFlags::ACCESSED
    }
}

/// A VMA cobre o tipo de acesso?
fn permits(vma: &Vma, error: FaultError) -> bool {
    if error.contains(FaultError::WRITE) {
        vma.prot.can_write()
    } else if error.contains(FaultError::IFETCH) {
        vma.prot.can_exec()
    } else {
        vma.prot.can_read()
    }
}

/// Fault logo abaixo de uma pilha: estende a VMA até `page` se estiver
/// dentro da guarda e o buraco estiver livre.
fn grow_stack(inner: &mut SpaceInner, page: VirtAddr) -> Option<Vma> {
    let stack = *inner.next_above(page)?;
    if !stack.flags.contains(VmaFlags::GROWS_DOWN) || stack.backing != VmaBacking::Anonymous {
        return None;
    }
    if stack.start.as_u32() - page.as_u32() > STACK_GUARD_GAP {
        return None;
    }
    if inner.prev_below(stack.start).is_some_and(|prev| prev.end > page) {
        return None;
    }

    inner.vmas.remove(&stack.start.as_u32());
    let mut grown = stack;
    grown.start = page;
    inner.vmas.insert(page.as_u32(), grown);
    crate::kdebug!("(VMM) Pilha estendida até ", page.as_u32());
    Some(grown)
}
