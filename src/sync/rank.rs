//! # Ordem de Locks (Lock Rank)
//!
//! Todo spinlock declara um rank. Um CPU só pode adquirir um lock de rank
//! igual ou mais interno que todos os que já segura; adquirir um lock mais
//! externo enquanto segura um mais interno é um bug (possível deadlock ABBA).
//!
//! ```text
//! Registry → AddressSpace → SwapCache → PageCache → SwapDevice → Zone
//!          → WaitQueue → RunQueue → PerCpu → IrqChip → Log
//! ```
//!
//! A verificação só existe com `debug_assertions`. O `try_lock` não é
//! verificado (não pode bloquear), mas o lock obtido entra na pilha.

/// Ranks, do mais externo para o mais interno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockRank {
    /// Registros globais (address spaces, tarefas por handle)
    Registry = 0,
    /// VMAs e folhas de page table de um address space
    AddressSpace = 1,
    /// Swap cache (páginas em writeback / swap-in)
    SwapCache = 2,
    /// Page cache de arquivos
    PageCache = 3,
    /// Estado interno de um backend de swap
    SwapDevice = 4,
    /// Listas livres de uma zona do PMM
    Zone = 5,
    /// Fila de espera
    WaitQueue = 6,
    /// Filas de execução do scheduler
    RunQueue = 7,
    /// Filas por CPU (chamadas cruzadas, shootdown, deferred work)
    PerCpu = 8,
    /// Estado de uma linha de IRQ / controlador
    IrqChip = 9,
    /// Sink de log
    Log = 10,
}

impl LockRank {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Registry => "Registry",
            Self::AddressSpace => "AddressSpace",
            Self::SwapCache => "SwapCache",
            Self::PageCache => "PageCache",
            Self::SwapDevice => "SwapDevice",
            Self::Zone => "Zone",
            Self::WaitQueue => "WaitQueue",
            Self::RunQueue => "RunQueue",
            Self::PerCpu => "PerCpu",
            Self::IrqChip => "IrqChip",
            Self::Log => "Log",
        }
    }
}

/// Profundidade máxima de aninhamento rastreada.
const MAX_HELD: usize = 16;

/// Pilha de ranks segurados por um contexto de execução.
#[derive(Clone, Copy)]
struct HeldRanks {
    len: usize,
    ranks: [LockRank; MAX_HELD],
}

impl HeldRanks {
    const fn new() -> Self {
        Self {
            len: 0,
            ranks: [LockRank::Registry; MAX_HELD],
        }
    }

    fn innermost(&self) -> Option<LockRank> {
        self.ranks[..self.len].iter().copied().max()
    }

    fn push(&mut self, rank: LockRank) {
        // Aninhamento além do limite só perde rastreio, não é erro.
        if self.len < MAX_HELD {
            self.ranks[self.len] = rank;
            self.len += 1;
        }
    }

    fn pop(&mut self, rank: LockRank) {
        // Guards podem ser soltos fora de ordem: remove a ocorrência mais recente.
        if let Some(pos) = self.ranks[..self.len].iter().rposition(|&r| r == rank) {
            self.ranks.copy_within(pos + 1..self.len, pos);
            self.len -= 1;
        }
    }
}

#[cfg(all(debug_assertions, not(target_os = "none")))]
mod held {
    use super::HeldRanks;
    use std::cell::RefCell;

    std::thread_local! {
        static HELD: RefCell<HeldRanks> = const { RefCell::new(HeldRanks::new()) };
    }

    pub(super) fn with<R>(f: impl FnOnce(&mut HeldRanks) -> R) -> R {
        HELD.with(|h| f(&mut h.borrow_mut()))
    }
}

#[cfg(all(debug_assertions, target_os = "none"))]
mod held {
    use super::HeldRanks;
    use crate::arch::{Cpu, CpuOps};
    use crate::core::config::MAX_CPUS;
    use core::cell::UnsafeCell;

    struct PerCpuHeld([UnsafeCell<HeldRanks>; MAX_CPUS]);

    // SAFETY: cada CPU só toca a própria entrada, com interrupções desligadas.
    unsafe impl Sync for PerCpuHeld {}

    static HELD: PerCpuHeld = PerCpuHeld([const { UnsafeCell::new(HeldRanks::new()) }; MAX_CPUS]);

    pub(super) fn with<R>(f: impl FnOnce(&mut HeldRanks) -> R) -> R {
        let flags = Cpu::irq_disable_save();
        let id = Cpu::current_id() % MAX_CPUS;
        // SAFETY: entrada exclusiva desta CPU e IRQs desabilitadas
        let result = f(unsafe { &mut *HELD.0[id].get() });
        Cpu::irq_restore(flags);
        result
    }
}

/// Registra a aquisição bloqueante de `rank`, verificando a ordem.
#[inline]
pub fn acquire(rank: LockRank) {
    #[cfg(debug_assertions)]
    held::with(|h| {
        if let Some(inner) = h.innermost() {
            if rank < inner {
                panic!(
                    "violação de ordem de locks: {} adquirido segurando {}",
                    rank.name(),
                    inner.name()
                );
            }
        }
        h.push(rank);
    });
    #[cfg(not(debug_assertions))]
    let _ = rank;
}

/// Registra um lock obtido por `try_lock` (sem verificação de ordem).
#[inline]
pub fn acquired_unchecked(rank: LockRank) {
    #[cfg(debug_assertions)]
    held::with(|h| h.push(rank));
    #[cfg(not(debug_assertions))]
    let _ = rank;
}

/// Registra a liberação de `rank`.
#[inline]
pub fn release(rank: LockRank) {
    #[cfg(debug_assertions)]
    held::with(|h| h.pop(rank));
    #[cfg(not(debug_assertions))]
    let _ = rank;
}

/// Quantos locks o contexto atual segura (0 sem `debug_assertions`).
pub fn held_count() -> usize {
    #[cfg(debug_assertions)]
    {
        held::with(|h| h.len)
    }
    #[cfg(not(debug_assertions))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_declared_order() {
        assert!(LockRank::Registry < LockRank::AddressSpace);
        assert!(LockRank::AddressSpace < LockRank::Zone);
        assert!(LockRank::Zone < LockRank::WaitQueue);
        assert!(LockRank::WaitQueue < LockRank::IrqChip);
    }

    #[test]
    fn out_of_order_release_keeps_stack_consistent() {
        acquire(LockRank::AddressSpace);
        acquire(LockRank::Zone);
        release(LockRank::AddressSpace);
        assert_eq!(held_count(), 1);
        release(LockRank::Zone);
        assert_eq!(held_count(), 0);
    }

    #[test]
    #[should_panic(expected = "violação de ordem de locks")]
    fn outer_rank_under_inner_panics() {
        acquire(LockRank::Zone);
        acquire(LockRank::AddressSpace);
    }
}
