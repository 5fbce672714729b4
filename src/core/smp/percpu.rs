/// Arquivo: core/smp/percpu.rs
///
/// Propósito: Dados Por-CPU.
/// Cada CPU lógica tem um `CpuData` com a tarefa corrente, contadores de
/// tick, IPIs pendentes e as filas de trabalho que outras CPUs lhe entregam.
///
/// Detalhes de Implementação:
/// - Tabela densa indexada por `CpuId`, construída no boot (sem lazy init).
/// - Campos escalares são atômicos: a CPU dona escreve, as demais só leem
///   (ou escrevem sob IPI, como `ipi_pending`).
/// - Filas (chamadas cruzadas, shootdown, deferred) têm lock próprio de rank
///   `PerCpu` e são consumidas apenas pela CPU dona.

use super::call::CallRecord;
use super::ipi::TlbRequest;
use crate::arch::CpuId;
use crate::core::work::DeferredQueue;
use crate::sync::{LockRank, Spinlock};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Máquina de estados de uma CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    Offline = 0,
    Starting = 1,
    Online = 2,
    Stopped = 3,
}

impl CpuState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Online,
            3 => Self::Stopped,
            _ => Self::Offline,
        }
    }
}

/// Categoria de um tick para contabilidade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    User,
    System,
    Irq,
    Idle,
    IoWait,
}

#[derive(Debug, Default)]
pub struct TickCounters {
    pub user: AtomicU64,
    pub system: AtomicU64,
    pub irq: AtomicU64,
    pub idle: AtomicU64,
    pub iowait: AtomicU64,
}

impl TickCounters {
    pub fn account(&self, kind: TickKind) {
        let counter = match kind {
            TickKind::User => &self.user,
            TickKind::System => &self.system,
            TickKind::Irq => &self.irq,
            TickKind::Idle => &self.idle,
            TickKind::IoWait => &self.iowait,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        [&self.user, &self.system, &self.irq, &self.idle, &self.iowait]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

/// Handle de tarefa inexistente nos campos `current`/`idle`.
pub const NO_TASK: u64 = 0;

pub struct CpuData {
    id: CpuId,
    state: AtomicU8,
    current: AtomicU64,
    idle: AtomicU64,
    /// Tarefa que acabou de sair desta CPU; `finish_switch` a libera.
    prev: AtomicU64,
    need_resched: AtomicBool,
    pub(super) ipi_pending: AtomicU32,
    pub(super) calls: Spinlock<VecDeque<Arc<CallRecord>>>,
    pub(super) tlb_requests: Spinlock<VecDeque<Arc<TlbRequest>>>,
    pub deferred: DeferredQueue,
    pub ticks: TickCounters,
    ctx_switches: AtomicU64,
    ipis_received: AtomicU64,
    irq_depth: AtomicU32,
    loaded_root: AtomicU32,
    loaded_space: AtomicU64,
    stack_base: AtomicUsize,
}

impl CpuData {
    pub fn new(id: CpuId) -> Self {
        Self {
            id,
            state: AtomicU8::new(CpuState::Offline as u8),
            current: AtomicU64::new(NO_TASK),
            idle: AtomicU64::new(NO_TASK),
            prev: AtomicU64::new(NO_TASK),
            need_resched: AtomicBool::new(false),
            ipi_pending: AtomicU32::new(0),
            calls: Spinlock::new(LockRank::PerCpu, VecDeque::new()),
            tlb_requests: Spinlock::new(LockRank::PerCpu, VecDeque::new()),
            deferred: DeferredQueue::new(),
            ticks: TickCounters::default(),
            ctx_switches: AtomicU64::new(0),
            ipis_received: AtomicU64::new(0),
            irq_depth: AtomicU32::new(0),
            loaded_root: AtomicU32::new(0),
            loaded_space: AtomicU64::new(0),
            stack_base: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    pub fn state(&self) -> CpuState {
        CpuState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: CpuState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(super) fn transition(&self, from: CpuState, to: CpuState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // --- tarefas ---

    pub fn current_raw(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn set_current_raw(&self, task: u64) {
        self.current.store(task, Ordering::Release);
    }

    pub fn idle_raw(&self) -> u64 {
        self.idle.load(Ordering::Acquire)
    }

    pub fn set_idle_raw(&self, task: u64) {
        self.idle.store(task, Ordering::Release);
    }

    pub fn set_prev_raw(&self, task: u64) {
        self.prev.store(task, Ordering::Release);
    }

    pub fn take_prev_raw(&self) -> u64 {
        self.prev.swap(NO_TASK, Ordering::AcqRel)
    }

    // --- reescalonamento ---

    pub fn set_need_resched(&self) {
        self.need_resched.store(true, Ordering::Release);
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    pub fn clear_need_resched(&self) -> bool {
        self.need_resched.swap(false, Ordering::AcqRel)
    }

    // --- contadores ---

    pub fn count_switch(&self) {
        self.ctx_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ctx_switches(&self) -> u64 {
        self.ctx_switches.load(Ordering::Relaxed)
    }

    pub(super) fn count_ipi(&self) {
        self.ipis_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ipis_received(&self) -> u64 {
        self.ipis_received.load(Ordering::Relaxed)
    }

    pub fn pending_ipis(&self) -> u32 {
        self.ipi_pending.load(Ordering::Acquire)
    }

    // --- aninhamento de IRQ ---

    /// Entra em contexto de interrupção; devolve a nova profundidade.
    pub fn irq_enter(&self) -> u32 {
        self.irq_depth.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn irq_exit(&self) -> u32 {
        self.irq_depth.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn in_irq(&self) -> bool {
        self.irq_depth.load(Ordering::Acquire) > 0
    }

    // --- page tables carregadas ---

    pub fn loaded_root(&self) -> u32 {
        self.loaded_root.load(Ordering::Acquire)
    }

    pub fn loaded_space(&self) -> u64 {
        self.loaded_space.load(Ordering::Acquire)
    }

    /// Registra a raiz carregada; devolve o address space anterior.
    pub fn set_loaded(&self, root: u32, space: u64) -> u64 {
        self.loaded_root.store(root, Ordering::Release);
        self.loaded_space.swap(space, Ordering::AcqRel)
    }

    pub fn stack_base(&self) -> usize {
        self.stack_base.load(Ordering::Relaxed)
    }

    pub fn set_stack_base(&self, base: usize) {
        self.stack_base.store(base, Ordering::Relaxed);
    }
}
