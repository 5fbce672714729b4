/// Arquivo: sync/waitqueue.rs
///
/// Propósito: Fila de espera (wait queue).
/// Tarefas dormem aqui até uma condição valer; quem muda a condição acorda
/// uma ou todas.
///
/// Detalhes de Implementação:
/// - FIFO sob um spinlock de rank `WaitQueue`. A função de wake é chamada com
///   esse lock segurado e nunca o retoma.
/// - Protocolo `wait_event`: marca o estado de sono, entra na fila, testa a
///   condição, dorme, repete. Como o estado é marcado antes do teste, um wake
///   entre o teste e o `schedule()` não se perde.
/// - Um waiter exclusivo acordado que desiste (sinal ou prazo) repassa o
///   wake ao próximo exclusivo. O mesmo vale para o exclusivo que um
///   `wake_one` tirou da fila quando ele já estava acordado.
use crate::sched::{Scheduler, TaskId, TaskState};
use crate::sync::{LockRank, Spinlock};
use crate::sys::Errno;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u8 {
        /// `wake_one` acorda no máximo um waiter exclusivo
        const EXCLUSIVE = 1 << 0;
        /// Sinais interrompem a espera
        const INTERRUPTIBLE = 1 << 1;
    }
}

/// Motivo de uma espera terminar sem a condição.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Interrupted,
    TimedOut,
}

impl WaitError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupted => "espera interrompida por sinal",
            Self::TimedOut => "prazo da espera esgotado",
        }
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<WaitError> for Errno {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Interrupted => Errno::EINTR,
            WaitError::TimedOut => Errno::ETIMEDOUT,
        }
    }
}

/// Função chamada para acordar um waiter. `true` se acordou de fato.
pub type WakeFn = fn(&Scheduler, TaskId) -> bool;

fn default_wake(sched: &Scheduler, task: TaskId) -> bool {
    sched.wake_up(task)
}

pub struct WaitEntry {
    task: TaskId,
    flags: WaitFlags,
    wake: WakeFn,
    queued: AtomicBool,
    /// Tirado da fila por um `wake_one` enquanto já estava acordado
    missed: AtomicBool,
}

impl WaitEntry {
    pub fn new(task: TaskId, flags: WaitFlags) -> Self {
        Self::with_wake(task, flags, default_wake)
    }

    pub fn with_wake(task: TaskId, flags: WaitFlags, wake: WakeFn) -> Self {
        Self {
            task,
            flags,
            wake,
            queued: AtomicBool::new(false),
            missed: AtomicBool::new(false),
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn flags(&self) -> WaitFlags {
        self.flags
    }

    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }
}

pub struct WaitQueue {
    entries: Spinlock<VecDeque<Arc<WaitEntry>>>,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            entries: Spinlock::new(LockRank::WaitQueue, VecDeque::new()),
        }
    }

    pub fn add(&self, entry: &Arc<WaitEntry>) {
        let mut entries = self.entries.lock_irqsave();
        if !entry.queued.swap(true, Ordering::AcqRel) {
            entries.push_back(entry.clone());
        }
    }

    pub fn remove(&self, entry: &Arc<WaitEntry>) {
        let mut entries = self.entries.lock_irqsave();
        if entry.queued.swap(false, Ordering::AcqRel) {
            entries.retain(|e| !Arc::ptr_eq(e, entry));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock_irqsave().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acorda os waiters compartilhados à frente do primeiro exclusivo, e
    /// esse exclusivo.
    ///
    /// O primeiro exclusivo sai da fila mesmo que já estivesse acordado;
    /// nesse caso ele repassa o wake ao terminar a espera.
    pub fn wake_one(&self, sched: &Scheduler) -> usize {
        self.wake(sched, false)
    }

    pub fn wake_all(&self, sched: &Scheduler) -> usize {
        self.wake(sched, true)
    }

    fn wake(&self, sched: &Scheduler, all: bool) -> usize {
        let mut entries = self.entries.lock_irqsave();
        let mut woken = 0;
        let mut i = 0;
        while i < entries.len() {
            let entry = entries[i].clone();
            let stop = !all && entry.flags.contains(WaitFlags::EXCLUSIVE);
            let woke = (entry.wake)(sched, entry.task);
            if woke || stop {
                entries.remove(i);
                entry.queued.store(false, Ordering::Release);
            } else {
                i += 1;
            }
            if woke {
                woken += 1;
            } else if stop {
                entry.missed.store(true, Ordering::Release);
            }
            if stop {
                break;
            }
        }
        woken
    }

    /// Marca a tarefa corrente como dormindo e a coloca na fila.
    pub fn prepare_to_wait(&self, sched: &Scheduler, entry: &Arc<WaitEntry>, state: TaskState) {
        sched.set_current_state(state);
        self.add(entry);
    }

    /// Volta a `Running` e sai da fila (se nenhum wake já a tirou).
    pub fn finish_wait(&self, sched: &Scheduler, entry: &Arc<WaitEntry>) {
        sched.set_current_state(TaskState::Running);
        self.remove(entry);
    }

    /// Espera genérica: até `cond`, sinal (se interrompível) ou `deadline`
    /// (em ticks absolutos).
    pub fn wait_event_with(
        &self,
        sched: &Scheduler,
        flags: WaitFlags,
        deadline: Option<u64>,
        mut cond: impl FnMut() -> bool,
    ) -> Result<(), WaitError> {
        if cond() {
            return Ok(());
        }

        let current = sched.current();
        let entry = Arc::new(WaitEntry::new(current.id(), flags));
        let interruptible = flags.contains(WaitFlags::INTERRUPTIBLE);
        let state = if interruptible {
            TaskState::Interruptible
        } else {
            TaskState::Uninterruptible
        };

        let result = loop {
            self.prepare_to_wait(sched, &entry, state);
            if cond() {
                break Ok(());
            }
            if interruptible && current.signals.any_pending() {
                break Err(WaitError::Interrupted);
            }
            match deadline {
                None => sched.schedule(),
                Some(deadline) => {
                    if sched.schedule_timeout(deadline) {
                        // Prazo vencido: uma última checagem
                        break if cond() { Ok(()) } else { Err(WaitError::TimedOut) };
                    }
                }
            }
        };

        let consumed_wake = !entry.is_queued();
        self.finish_wait(sched, &entry);
        let missed = entry.missed.load(Ordering::Acquire);
        if flags.contains(WaitFlags::EXCLUSIVE) && ((result.is_err() && consumed_wake) || missed) {
            self.wake_one(sched);
        }
        result
    }

    /// Espera não interrompível até `cond`.
    pub fn wait_event(&self, sched: &Scheduler, cond: impl FnMut() -> bool) {
        // Sem sinal nem prazo não há erro possível
        let _ = self.wait_event_with(sched, WaitFlags::empty(), None, cond);
    }

    pub fn wait_event_interruptible(
        &self,
        sched: &Scheduler,
        cond: impl FnMut() -> bool,
    ) -> Result<(), WaitError> {
        self.wait_event_with(sched, WaitFlags::INTERRUPTIBLE, None, cond)
    }

    /// Espera até `cond` por no máximo `ticks`.
    pub fn wait_event_timeout(
        &self,
        sched: &Scheduler,
        ticks: u64,
        cond: impl FnMut() -> bool,
    ) -> Result<(), WaitError> {
        let deadline = sched.clock().deadline_in(ticks);
        self.wait_event_with(sched, WaitFlags::empty(), Some(deadline), cond)
    }
}
