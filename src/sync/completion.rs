//! Completion - "isto terminou" contável.
//!
//! `complete` libera um waiter; `complete_all` libera todos, para sempre
//! (até `reinit`).

use super::waitqueue::{WaitError, WaitFlags, WaitQueue};
use crate::sched::Scheduler;
use core::sync::atomic::{AtomicU32, Ordering};

/// Valor de `done` após `complete_all`.
const DONE_ALL: u32 = u32::MAX;

pub struct Completion {
    done: AtomicU32,
    wait: WaitQueue,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub const fn new() -> Self {
        Self {
            done: AtomicU32::new(0),
            wait: WaitQueue::new(),
        }
    }

    /// +1 e acorda um waiter.
    pub fn complete(&self, sched: &Scheduler) {
        let _ = self
            .done
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                d.checked_add(1).filter(|&n| n < DONE_ALL)
            });
        self.wait.wake_one(sched);
    }

    /// Satura o contador e acorda todos. Idempotente.
    pub fn complete_all(&self, sched: &Scheduler) {
        self.done.store(DONE_ALL, Ordering::Release);
        self.wait.wake_all(sched);
    }

    /// Consome uma conclusão, se houver.
    pub fn try_wait(&self) -> bool {
        self.done
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| match d {
                0 => None,
                DONE_ALL => Some(DONE_ALL),
                d => Some(d - 1),
            })
            .is_ok()
    }

    pub fn wait(&self, sched: &Scheduler) {
        // Sem sinal nem prazo a espera não falha
        let _ = self
            .wait
            .wait_event_with(sched, WaitFlags::EXCLUSIVE, None, || self.try_wait());
    }

    pub fn wait_interruptible(&self, sched: &Scheduler) -> Result<(), WaitError> {
        self.wait.wait_event_with(
            sched,
            WaitFlags::EXCLUSIVE | WaitFlags::INTERRUPTIBLE,
            None,
            || self.try_wait(),
        )
    }

    /// Espera por no máximo `ticks`.
    pub fn wait_timeout(&self, sched: &Scheduler, ticks: u64) -> Result<(), WaitError> {
        let deadline = sched.clock().deadline_in(ticks);
        self.wait
            .wait_event_with(sched, WaitFlags::EXCLUSIVE, Some(deadline), || self.try_wait())
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire) != 0
    }

    /// Volta ao estado inicial. Não pode haver waiters.
    pub fn reinit(&self) {
        debug_assert!(self.wait.is_empty(), "reinit com tarefas esperando");
        self.done.store(0, Ordering::Release);
    }
}
